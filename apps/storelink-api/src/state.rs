//! Wiring of the SSO core from configuration.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use storelink_sso::crypto::{PasswordGenerator, RelayStateSigner, SecretCodec};
use storelink_sso::providers::{
    DiscoveryService, IdTokenVerifier, ProviderDependencies, ProviderRegistry,
};
use storelink_sso::services::{
    AuthOrchestrator, HttpDirectoryFactory, InMemoryRecordStore, LoginStrategy,
    OrchestratorSettings, PgRecordStore, RecordStore, WebhookCodeDelivery,
};
use storelink_sso::state::{
    EphemeralStore, InMemoryEphemeralStore, PostgresEphemeralStore, StateService,
};
use storelink_sso::SsoState;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, StateBackend};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid secret: {0}")]
    Secret(String),

    #[error("HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migrations: {0}")]
    Migrations(#[from] storelink_db::DbError),
}

/// Everything `main` needs to serve and maintain the service.
pub struct AppState {
    pub sso: SsoState,
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub db: Option<PgPool>,
}

impl AppState {
    pub async fn build(config: &Config) -> Result<Self, StartupError> {
        let db = match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(url)
                    .await?;
                info!("Database connection established");
                storelink_db::run_migrations(&pool).await?;
                Some(pool)
            }
            None => {
                warn!("DATABASE_URL not set, tenant records are process-local");
                None
            }
        };

        let ephemeral: Arc<dyn EphemeralStore> = match (config.state_backend, &db) {
            (StateBackend::Postgres, Some(pool)) => {
                Arc::new(PostgresEphemeralStore::new(pool.clone()))
            }
            _ => Arc::new(InMemoryEphemeralStore::new()),
        };
        let records: Arc<dyn RecordStore> = match &db {
            Some(pool) => Arc::new(PgRecordStore::new(pool.clone())),
            None => Arc::new(InMemoryRecordStore::new()),
        };

        let http = storelink_sso::http_client(config.http_timeout)?;
        let state = StateService::new(ephemeral.clone());
        let codec = SecretCodec::from_key_material(&config.encryption_key)
            .map_err(|e| StartupError::Secret(format!("ENCRYPTION_KEY: {e}")))?;
        let relay_state = RelayStateSigner::new(config.relay_state_secret.as_bytes())
            .map_err(|e| StartupError::Secret(format!("RELAY_STATE_SECRET: {e}")))?;
        let passwords = PasswordGenerator::new(config.password_pepper.as_bytes())
            .map_err(|e| StartupError::Secret(format!("PASSWORD_PEPPER: {e}")))?;

        let registry = ProviderRegistry::new(ProviderDependencies {
            state: state.clone(),
            http: http.clone(),
            discovery: DiscoveryService::new(http.clone()),
            id_tokens: IdTokenVerifier::new(http.clone(), config.id_token_verification),
            relay_state,
        });

        let mut settings = OrchestratorSettings::new(config.public_base_url.clone());
        settings
            .storefront_login_path
            .clone_from(&config.storefront_login_path);

        let code_delivery = match &config.login_code_webhook {
            Some(webhook) => Some(
                WebhookCodeDelivery::new(http.clone(), webhook.url.clone(), webhook.secret.as_bytes())
                    .map_err(|e| StartupError::Secret(format!("LOGIN_CODE_WEBHOOK_SECRET: {e}")))?,
            ),
            None => None,
        };

        let mut orchestrator = AuthOrchestrator::new(
            Arc::new(registry),
            records,
            Arc::new(HttpDirectoryFactory::new(
                http,
                config.platform_api_version.clone(),
            )),
            Arc::new(codec),
            LoginStrategy::new(passwords, state, config.password_update_policy),
            settings,
        );
        if let Some(delivery) = code_delivery {
            orchestrator = orchestrator.with_code_delivery(Arc::new(delivery));
            info!("Login codes enabled");
        }

        Ok(Self {
            sso: SsoState::new(Arc::new(orchestrator)),
            ephemeral,
            db,
        })
    }
}
