use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "courier.toml",
    "config/courier.toml",
    "crates/config/courier.toml",
    "../courier.toml",
    "../config/courier.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://courier.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Settings for the JWT identity verifier.
///
/// ```
/// use courier_config::AuthConfig;
///
/// let auth = AuthConfig::default();
/// assert_eq!(auth.issuer, "courier");
/// assert_eq!(auth.token_ttl_seconds, 86_400);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "AuthConfig::default_issuer")]
    pub issuer: String,
    #[serde(default = "AuthConfig::default_audience")]
    pub audience: String,
    #[serde(default = "AuthConfig::default_token_ttl")]
    pub token_ttl_seconds: u64,
}

impl AuthConfig {
    fn default_issuer() -> String {
        "courier".to_string()
    }

    fn default_audience() -> String {
        "courier-clients".to_string()
    }

    const fn default_token_ttl() -> u64 {
        86_400
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "default_secret_change_in_production".to_string(),
            issuer: Self::default_issuer(),
            audience: Self::default_audience(),
            token_ttl_seconds: Self::default_token_ttl(),
        }
    }
}

/// Timing knobs for the relay's debounced state machines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "RelayConfig::default_presence_grace")]
    pub presence_grace_ms: u64,
    #[serde(default = "RelayConfig::default_typing_timeout")]
    pub typing_timeout_ms: u64,
    #[serde(default = "RelayConfig::default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "RelayConfig::default_ack_ledger_capacity")]
    pub ack_ledger_capacity: usize,
}

impl RelayConfig {
    const fn default_presence_grace() -> u64 {
        3_000
    }

    const fn default_typing_timeout() -> u64 {
        3_000
    }

    const fn default_handshake_timeout() -> u64 {
        10_000
    }

    const fn default_ack_ledger_capacity() -> usize {
        10_000
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            presence_grace_ms: Self::default_presence_grace(),
            typing_timeout_ms: Self::default_typing_timeout(),
            handshake_timeout_ms: Self::default_handshake_timeout(),
            ack_ledger_capacity: Self::default_ack_ledger_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "ClientConfig::default_url")]
    pub url: String,
    #[serde(default = "ClientConfig::default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "ClientConfig::default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "ClientConfig::default_typing_idle")]
    pub typing_idle_ms: u64,
}

impl ClientConfig {
    fn default_url() -> String {
        "ws://127.0.0.1:7070/ws".to_string()
    }

    const fn default_max_reconnect_attempts() -> u32 {
        5
    }

    const fn default_reconnect_delay() -> u64 {
        1_000
    }

    const fn default_typing_idle() -> u64 {
        3_000
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            max_reconnect_attempts: Self::default_max_reconnect_attempts(),
            reconnect_delay_ms: Self::default_reconnect_delay(),
            typing_idle_ms: Self::default_typing_idle(),
        }
    }
}

fn clamp_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use courier_config::load;
///
/// std::env::remove_var("COURIER_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default("auth.jwt_secret", defaults.auth.jwt_secret.clone())?
        .set_default("auth.issuer", defaults.auth.issuer.clone())?
        .set_default("auth.audience", defaults.auth.audience.clone())?
        .set_default(
            "auth.token_ttl_seconds",
            clamp_to_i64(defaults.auth.token_ttl_seconds),
        )?
        .set_default(
            "relay.presence_grace_ms",
            clamp_to_i64(defaults.relay.presence_grace_ms),
        )?
        .set_default(
            "relay.typing_timeout_ms",
            clamp_to_i64(defaults.relay.typing_timeout_ms),
        )?
        .set_default(
            "relay.handshake_timeout_ms",
            clamp_to_i64(defaults.relay.handshake_timeout_ms),
        )?
        .set_default(
            "relay.ack_ledger_capacity",
            clamp_to_i64(defaults.relay.ack_ledger_capacity as u64),
        )?
        .set_default("client.url", defaults.client.url.clone())?
        .set_default(
            "client.max_reconnect_attempts",
            i64::from(defaults.client.max_reconnect_attempts),
        )?
        .set_default(
            "client.reconnect_delay_ms",
            clamp_to_i64(defaults.client.reconnect_delay_ms),
        )?
        .set_default(
            "client.typing_idle_ms",
            clamp_to_i64(defaults.client.typing_idle_ms),
        )?;

    let environment_overrides = config::Environment::with_prefix("COURIER").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("COURIER_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via COURIER_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    if config.relay.presence_grace_ms == 0 {
        debug!("presence grace of zero requested, falling back to default");
        config.relay.presence_grace_ms = RelayConfig::default().presence_grace_ms;
    }

    if config.auth.token_ttl_seconds > i64::MAX as u64 {
        config.auth.token_ttl_seconds = i64::MAX as u64;
    }

    debug!(
        http.port = config.http.port,
        relay.presence_grace_ms = config.relay.presence_grace_ms,
        "loaded relay configuration"
    );
    Ok(config)
}
