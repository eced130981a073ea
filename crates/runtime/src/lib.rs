use std::sync::Arc;

use anyhow::Result;
use courier_auth::JwtVerifier;
use courier_config::AppConfig;
use courier_gateway::{RelayHub, RelaySettings};
use courier_store::{prepare_database, run_migrations, SqliteStore};
use sqlx::SqlitePool;
use tracing::info;

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::TRACE)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Everything the relay server needs, wired from configuration.
#[derive(Clone)]
pub struct RelayServices {
    pub db_pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub verifier: Arc<JwtVerifier>,
    pub hub: RelayHub,
}

impl RelayServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = prepare_database(&config.database).await?;
        run_migrations(&db_pool).await?;

        let store = Arc::new(SqliteStore::new(db_pool.clone()));
        let verifier = Arc::new(JwtVerifier::from_config(&config.auth));
        let settings = RelaySettings::from(&config.relay);

        info!(
            presence_grace_ms = settings.presence_grace.as_millis() as u64,
            typing_timeout_ms = settings.typing_timeout.as_millis() as u64,
            "relay hub ready"
        );
        let hub = RelayHub::new(store.clone(), verifier.clone(), settings);

        Ok(Self {
            db_pool,
            store,
            verifier,
            hub,
        })
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
