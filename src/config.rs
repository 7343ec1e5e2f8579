use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

impl JwtConfig {
    /// Access and refresh tokens must be signed with different secrets.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.access_secret.is_empty(), "JWT_ACCESS_SECRET is empty");
        anyhow::ensure!(!self.refresh_secret.is_empty(), "JWT_REFRESH_SECRET is empty");
        anyhow::ensure!(
            self.access_secret != self.refresh_secret,
            "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ"
        );
        anyhow::ensure!(
            self.access_ttl_minutes > 0 && self.refresh_ttl_minutes > 0,
            "token lifetimes must be positive"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

/// Client registration and endpoints for one federated provider.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub smtp: Option<SmtpConfig>,
    pub google: Option<OAuthClientConfig>,
    pub linkedin: Option<OAuthClientConfig>,
    pub frontend_url: String,
    pub production: bool,
    pub code_sweep_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store_backend = match env_or("IDENTITY_STORE", "postgres").as_str() {
            "memory" => StoreBackend::Memory,
            "postgres" => StoreBackend::Postgres,
            other => anyhow::bail!("unknown IDENTITY_STORE {:?}", other),
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when IDENTITY_STORE=postgres");
        }

        let jwt = JwtConfig {
            access_secret: std::env::var("JWT_ACCESS_SECRET").context("JWT_ACCESS_SECRET")?,
            refresh_secret: std::env::var("JWT_REFRESH_SECRET").context("JWT_REFRESH_SECRET")?,
            issuer: env_or("JWT_ISSUER", "scriptphi"),
            audience: env_or("JWT_AUDIENCE", "scriptphi-users"),
            access_ttl_minutes: env_parse("JWT_ACCESS_TTL_MINUTES", 15),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 7),
        };
        jwt.validate()?;

        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) => Some(SmtpConfig {
                host,
                port: env_parse("SMTP_PORT", 587),
                username: std::env::var("SMTP_USERNAME").context("SMTP_USERNAME")?,
                password: std::env::var("SMTP_PASSWORD").context("SMTP_PASSWORD")?,
                from_email: std::env::var("SMTP_FROM_EMAIL").context("SMTP_FROM_EMAIL")?,
                from_name: env_or("SMTP_FROM_NAME", "ScriptPhi"),
            }),
            Err(_) => None,
        };

        let google = oauth_client_from_env(
            "GOOGLE",
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
            "https://openidconnect.googleapis.com/v1/userinfo",
        )?;
        let linkedin = oauth_client_from_env(
            "LINKEDIN",
            "https://www.linkedin.com/oauth/v2/authorization",
            "https://www.linkedin.com/oauth/v2/accessToken",
            "https://api.linkedin.com/v2/userinfo",
        )?;

        Ok(Self {
            store_backend,
            database_url,
            jwt,
            smtp,
            google,
            linkedin,
            frontend_url: env_or("FRONTEND_URL", "http://localhost:5173"),
            production: env_or("APP_ENV", "development") == "production",
            code_sweep_interval_secs: env_parse("CODE_SWEEP_INTERVAL_SECS", 600),
        })
    }
}

#[cfg(test)]
impl AppConfig {
    /// Memory store, no SMTP, Google enabled against unroutable endpoints.
    pub(crate) fn for_tests() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            database_url: None,
            jwt: JwtConfig {
                access_secret: "test-access-secret".into(),
                refresh_secret: "test-refresh-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                access_ttl_minutes: 15,
                refresh_ttl_minutes: 60 * 24 * 7,
            },
            smtp: None,
            google: Some(OAuthClientConfig {
                client_id: "google-client".into(),
                client_secret: "google-secret".into(),
                callback_url: "http://localhost:8080/auth/google/callback".into(),
                authorize_url: "https://accounts.example/authorize".into(),
                token_url: "http://127.0.0.1:9/token".into(),
                userinfo_url: "http://127.0.0.1:9/userinfo".into(),
            }),
            linkedin: None,
            frontend_url: "http://localhost:5173".into(),
            production: false,
            code_sweep_interval_secs: 0,
        }
    }
}

/// A provider is enabled only when its client id is set.
fn oauth_client_from_env(
    prefix: &str,
    authorize_url: &str,
    token_url: &str,
    userinfo_url: &str,
) -> anyhow::Result<Option<OAuthClientConfig>> {
    let Ok(client_id) = std::env::var(format!("{prefix}_CLIENT_ID")) else {
        return Ok(None);
    };
    let secret_var = format!("{prefix}_CLIENT_SECRET");
    let callback_var = format!("{prefix}_CALLBACK_URL");
    Ok(Some(OAuthClientConfig {
        client_id,
        client_secret: std::env::var(&secret_var).context(secret_var)?,
        callback_url: std::env::var(&callback_var).context(callback_var)?,
        authorize_url: env_or(&format!("{prefix}_AUTHORIZE_URL"), authorize_url),
        token_url: env_or(&format!("{prefix}_TOKEN_URL"), token_url),
        userinfo_url: env_or(&format!("{prefix}_USERINFO_URL"), userinfo_url),
    }))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
