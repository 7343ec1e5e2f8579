use rand::Rng;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{
    repo::StoreError,
    repo_types::{NewUser, User},
};
use crate::{
    config::{AppConfig, OAuthClientConfig},
    error::{AuthError, AuthResult},
    state::AppState,
};

/// Username collisions tolerated before giving up on a generated name.
const USERNAME_RETRIES: usize = 5;

/// Ways an account can authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    Local,
    Google,
    LinkedIn,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Local => "local",
            AuthMethod::Google => "google",
            AuthMethod::LinkedIn => "linkedin",
        }
    }

    fn scope(&self) -> &'static str {
        match self {
            AuthMethod::Google => "openid email profile",
            AuthMethod::LinkedIn => "openid profile email",
            AuthMethod::Local => "",
        }
    }
}

/// Identity asserted by a federated provider after a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedAssertion {
    pub provider: AuthMethod,
    pub subject: String,
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    pub avatar_url: Option<String>,
}

/// Resolves a federated assertion to a local account, creating or linking as needed.
///
/// Lookup order: provider subject, then email (linking the subject onto that
/// account), then a new federated-only account.
#[instrument(skip(st, assertion), fields(provider = assertion.provider.as_str()))]
pub async fn link_account(st: &AppState, assertion: &FederatedAssertion) -> AuthResult<User> {
    let method = assertion.provider;
    if method == AuthMethod::Local {
        return Err(AuthError::Validation("local login is not federated".into()));
    }
    let now = st.clock.now();

    if let Some(mut user) = st.store.user_by_subject(method, &assertion.subject).await? {
        st.store.touch_last_login(user.id, now).await?;
        user.last_login = Some(now);
        debug!(user_id = %user.id, "returning federated user");
        return Ok(user);
    }

    let email = assertion.email.trim().to_lowercase();
    if let Some(existing) = st.store.user_by_email(&email).await? {
        let user = st.store.link_subject(existing.id, method, &assertion.subject).await?;
        info!(user_id = %user.id, email = %user.email, "account linked");
        return Ok(user);
    }

    let base = username_base(&assertion.given_name);
    for attempt in 1..=USERNAME_RETRIES {
        let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
        let new_user = NewUser {
            google_id: (method == AuthMethod::Google).then(|| assertion.subject.clone()),
            linkedin_id: (method == AuthMethod::LinkedIn).then(|| assertion.subject.clone()),
            password_hash: None,
            first_name: assertion.given_name.clone(),
            last_name: assertion.family_name.clone(),
            email: email.clone(),
            username: format!("{base}{suffix}"),
            profile_image_url: assertion.avatar_url.clone(),
            created_at: now,
            last_login: Some(now),
        };
        match st.store.insert_user(new_user).await {
            Ok(user) => {
                info!(user_id = %user.id, email = %user.email, "federated account created");
                return Ok(user);
            }
            Err(StoreError::Conflict(field)) if field == "username" => {
                debug!(attempt, "generated username taken, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    warn!(base = %base, "could not find a free username");
    Err(AuthError::Conflict("Username already taken".into()))
}

/// Given name reduced to username-safe characters.
fn username_base(given_name: &str) -> String {
    let cleaned: String = given_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .take(24)
        .collect();
    if cleaned.is_empty() {
        "user".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OpenID Connect userinfo document.
#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

/// Authorization-code client for one federated provider.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    method: AuthMethod,
    cfg: OAuthClientConfig,
}

impl ProviderClient {
    pub fn new(method: AuthMethod, cfg: OAuthClientConfig) -> Self {
        Self { method, cfg }
    }

    /// Client for `method` when it is configured.
    pub fn for_method(config: &AppConfig, method: AuthMethod) -> Option<Self> {
        let cfg = match method {
            AuthMethod::Google => config.google.as_ref(),
            AuthMethod::LinkedIn => config.linkedin.as_ref(),
            AuthMethod::Local => None,
        }?;
        Some(Self::new(method, cfg.clone()))
    }

    pub fn authorize_url(&self, state: &str) -> AuthResult<String> {
        let url = Url::parse_with_params(
            &self.cfg.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.cfg.client_id.as_str()),
                ("redirect_uri", self.cfg.callback_url.as_str()),
                ("scope", self.method.scope()),
                ("state", state),
            ],
        )
        .map_err(|e| AuthError::Upstream(format!("bad authorize url: {e}")))?;
        Ok(url.into())
    }

    /// Trades an authorization code for the provider's view of the user.
    pub async fn exchange(
        &self,
        http: &reqwest::Client,
        code: &str,
    ) -> AuthResult<FederatedAssertion> {
        let provider = self.method.as_str();
        let token: TokenResponse = http
            .post(&self.cfg.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.cfg.callback_url.as_str()),
                ("client_id", self.cfg.client_id.as_str()),
                ("client_secret", self.cfg.client_secret.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Upstream(format!("{provider} token exchange: {e}")))?
            .json()
            .await
            .map_err(|e| AuthError::Upstream(format!("{provider} token response: {e}")))?;

        let info: UserInfo = http
            .get(&self.cfg.userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Upstream(format!("{provider} userinfo: {e}")))?
            .json()
            .await
            .map_err(|e| AuthError::Upstream(format!("{provider} userinfo body: {e}")))?;

        let email = info
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| AuthError::Unauthorized(format!("{provider} did not share an email")))?;

        Ok(FederatedAssertion {
            provider: self.method,
            subject: info.sub,
            email,
            given_name: info.given_name.unwrap_or_default(),
            family_name: info.family_name.unwrap_or_default(),
            avatar_url: info.picture,
        })
    }
}
