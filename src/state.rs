use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::{
    auth::{
        jwt::JwtKeys,
        memory::MemoryIdentityStore,
        password::CredentialVerifier,
        repo::{IdentityStore, PgIdentityStore},
    },
    clock::{Clock, SystemClock},
    config::{AppConfig, StoreBackend},
    db,
    mail::{self, Mailer},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn IdentityStore>,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn Mailer>,
    pub keys: Arc<JwtKeys>,
    pub verifier: CredentialVerifier,
    pub clock: Arc<dyn Clock>,
    pub http: reqwest::Client,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn IdentityStore> = match config.store_backend {
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL is not set")?;
                let pool = db::connect(url).await?;
                db::migrate(&pool).await;
                Arc::new(PgIdentityStore::new(pool))
            }
            StoreBackend::Memory => {
                info!("using in-memory identity store; data is lost on restart");
                Arc::new(MemoryIdentityStore::new())
            }
        };

        let mailer: Arc<dyn Mailer> = Arc::from(mail::mailer_from_config(config.smtp.as_ref()));
        let keys = Arc::new(JwtKeys::from_config(&config.jwt));
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("build http client")?;

        Ok(Self {
            store,
            config,
            mailer,
            keys,
            verifier: CredentialVerifier::default(),
            clock: Arc::new(SystemClock),
            http,
        })
    }
}

#[cfg(test)]
pub(crate) use harness::TestHarness;

#[cfg(test)]
mod harness {
    use std::sync::Arc;

    use time::OffsetDateTime;

    use super::AppState;
    use crate::{
        auth::{jwt::test_keys, memory::MemoryIdentityStore, password::cheap_verifier},
        clock::ManualClock,
        config::AppConfig,
        mail::testing::CapturingMailer,
    };

    /// State over in-memory collaborators, with handles to drive them.
    pub struct TestHarness {
        pub state: AppState,
        pub store: Arc<MemoryIdentityStore>,
        pub mailer: Arc<CapturingMailer>,
        pub clock: Arc<ManualClock>,
    }

    impl AppState {
        pub(crate) fn harness() -> TestHarness {
            Self::harness_with(AppConfig::for_tests())
        }

        pub(crate) fn harness_with(config: AppConfig) -> TestHarness {
            let store = Arc::new(MemoryIdentityStore::new());
            let mailer = Arc::new(CapturingMailer::default());
            let clock = Arc::new(ManualClock::new(OffsetDateTime::now_utc()));
            let state = AppState {
                store: store.clone(),
                config: Arc::new(config),
                mailer: mailer.clone(),
                keys: Arc::new(test_keys()),
                verifier: cheap_verifier(),
                clock: clock.clone(),
                http: reqwest::Client::new(),
            };
            TestHarness {
                state,
                store,
                mailer,
                clock,
            }
        }

        pub(crate) fn fake() -> Self {
            Self::harness().state
        }
    }
}
