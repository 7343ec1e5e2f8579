use tracing::{debug, info, instrument, warn};

use super::{
    code::{self, CODE_TTL},
    jwt::TokenPair,
    oauth::{self, AuthMethod, FederatedAssertion},
    repo_types::{CodeOwner, CodePurpose, NewVerificationCode, User},
    validation,
};
use crate::{
    error::{AuthError, AuthResult},
    mail::{deliver, Effect, MailMessage},
    state::AppState,
};

const BAD_CREDENTIALS: &str = "Incorrect email or password";

/// What a caller presents to sign in.
#[derive(Debug, Clone)]
pub enum Credentials {
    Local { email: String, password: String },
    Federated(FederatedAssertion),
}

impl Credentials {
    pub fn method(&self) -> AuthMethod {
        match self {
            Credentials::Local { .. } => AuthMethod::Local,
            Credentials::Federated(a) => a.provider,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user: User,
    pub tokens: TokenPair,
}

/// Instruction for the transport holding the refresh credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialDirective {
    Discard,
}

/// Resolves credentials to an account and mints a token pair.
pub async fn authenticate(st: &AppState, credentials: Credentials) -> AuthResult<AuthOutcome> {
    debug!(method = credentials.method().as_str(), "authenticating");
    let user = match credentials {
        Credentials::Local { email, password } => check_password(st, &email, &password).await?,
        Credentials::Federated(assertion) => oauth::link_account(st, &assertion).await?,
    };
    let tokens = st.keys.issue(&user)?;
    Ok(AuthOutcome { user, tokens })
}

#[instrument(skip(st, password))]
pub async fn login(st: &AppState, email: &str, password: &str) -> AuthResult<AuthOutcome> {
    authenticate(
        st,
        Credentials::Local {
            email: email.to_string(),
            password: password.to_string(),
        },
    )
    .await
}

async fn check_password(st: &AppState, email: &str, password: &str) -> AuthResult<User> {
    let email = email.trim().to_lowercase();
    let Some(mut user) = st.store.user_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AuthError::Unauthorized(BAD_CREDENTIALS.into()));
    };
    let Some(digest) = user.password_hash.as_deref() else {
        warn!(user_id = %user.id, "password login on federated-only account");
        return Err(AuthError::Unauthorized("Account uses social login".into()));
    };
    if !st.verifier.verify(password, digest).await {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AuthError::Unauthorized(BAD_CREDENTIALS.into()));
    }

    let now = st.clock.now();
    st.store.touch_last_login(user.id, now).await?;
    user.last_login = Some(now);
    info!(user_id = %user.id, email = %user.email, "login");
    Ok(user)
}

/// Exchanges a refresh token for a new pair.
pub async fn refresh(st: &AppState, refresh_token: &str) -> AuthResult<AuthOutcome> {
    let (tokens, user) = st.keys.rotate(refresh_token, st.store.as_ref()).await?;
    debug!(user_id = %user.id, "tokens rotated");
    Ok(AuthOutcome { user, tokens })
}

/// Tokens are stateless; logging out only drops the client's refresh cookie.
pub fn logout() -> CredentialDirective {
    CredentialDirective::Discard
}

/// Mails a reset code when the account exists. Always reports success.
#[instrument(skip(st))]
pub async fn request_password_reset(st: &AppState, email: &str) -> AuthResult<()> {
    let email = email.trim().to_lowercase();
    let Some(user) = st.store.user_by_email(&email).await? else {
        debug!(email = %email, "reset requested for unknown email");
        return Ok(());
    };

    let now = st.clock.now();
    let code = code::generate_code();
    st.store
        .insert_code(NewVerificationCode {
            owner: CodeOwner::User(user.id),
            code: code.clone(),
            purpose: CodePurpose::PasswordReset,
            expires_at: now + CODE_TTL,
            created_at: now,
        })
        .await?;

    deliver(
        Effect::BestEffort,
        "password reset",
        st.mailer.send(MailMessage::PasswordReset { to: email, code }),
    )
    .await?;
    info!(user_id = %user.id, "password reset code issued");
    Ok(())
}

/// Replaces the password when `code` is a live reset code for `email`.
/// Reset codes are not subject to attempt lockout.
#[instrument(skip(st, code, new_password))]
pub async fn reset_password(
    st: &AppState,
    email: &str,
    code: &str,
    new_password: &str,
) -> AuthResult<()> {
    let email = email.trim().to_lowercase();
    let user = st
        .store
        .user_by_email(&email)
        .await?
        .ok_or_else(|| AuthError::NotFound("User not found".into()))?;

    let now = st.clock.now();
    let found = if code::is_well_formed(code) {
        st.store
            .find_code(CodeOwner::User(user.id), code, CodePurpose::PasswordReset)
            .await?
            .filter(|c| c.is_live(now))
    } else {
        None
    };
    let Some(found) = found else {
        warn!(user_id = %user.id, "wrong or expired reset code");
        return Err(AuthError::InvalidCode);
    };

    validation::check_password(new_password)?;
    let digest = st.verifier.hash(new_password).await?;
    st.store.set_password(user.id, &digest).await?;
    st.store.delete_code(found.id).await?;
    info!(user_id = %user.id, "password reset");
    Ok(())
}
