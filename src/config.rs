//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default HTTP port for the webhook server.
pub const DEFAULT_PORT: u16 = 8001;

/// Default location of the registration database.
pub const DEFAULT_DB_PATH: &str = "./data/registration.db";

/// Bot configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// LINE channel secret, used to verify webhook signatures.
    pub channel_secret: SecretString,
    /// LINE channel access token, used for the reply API.
    pub access_token: SecretString,
    /// Port the webhook server binds on.
    pub port: u16,
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Drop mid-flow sessions idle longer than this. `None` keeps them forever.
    pub session_idle_timeout: Option<Duration>,
    /// Directory for rolling log files. `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
}

impl BotConfig {
    /// Build the config from environment variables.
    ///
    /// `LINE_BOT_SECRET` and `LINE_BOT_TOKEN` are required; everything else
    /// has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let channel_secret = required_var("LINE_BOT_SECRET")?;
        let access_token = required_var("LINE_BOT_TOKEN")?;

        let port = match std::env::var("BOT_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "BOT_PORT".into(),
                message: format!("'{raw}' is not a valid port"),
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let db_path = std::env::var("BOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));

        let session_idle_timeout = std::env::var("SESSION_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let log_dir = std::env::var("LOG_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            channel_secret: SecretString::from(channel_secret),
            access_token: SecretString::from(access_token),
            port,
            db_path,
            session_idle_timeout,
            log_dir,
        })
    }
}

fn required_var(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}
