use crate::ingest::TopicRoutes;
use crate::query::PollPolicy;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_PREDICTION_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_POLL_ATTEMPTS: u32 = 30;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_TIMEZONE: &str = "Europe/Berlin";
pub const DEFAULT_LOCATION: &str = "2.09";
pub const DEFAULT_BROKER_PORT: u16 = 8883;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;
pub const DEFAULT_PRIMARY_MODEL_NAME: &str = "Logistic Regression";
pub const DEFAULT_SECONDARY_MODEL_NAME: &str = "Random Forest";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub broker: Option<BrokerSection>,
    #[serde(default)]
    pub topics: Option<TopicsSection>,
    #[serde(default)]
    pub database: Option<DatabaseSection>,
    #[serde(default)]
    pub models: Option<ModelsSection>,
    #[serde(default)]
    pub prediction: Option<PredictionSection>,
    #[serde(default)]
    pub query: Option<QuerySection>,
    #[serde(default)]
    pub ingest: Option<IngestSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSection {
    pub host: String,
    pub port: Option<u16>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// TLS towards the broker (default: true)
    pub tls: Option<bool>,
    pub keep_alive_secs: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TopicsSection {
    /// Temperature, humidity and CO2 uplinks
    pub climate: String,
    pub tvoc: String,
    /// Outdoor temperature uplinks
    pub ambient: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSection {
    pub url: String,
    /// Location tag stored with every reading (default: "2.09")
    pub location: Option<String>,
    /// Create the tables on startup when missing (default: false)
    pub create_schema: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsSection {
    pub primary_path: Option<PathBuf>,
    pub secondary_path: Option<PathBuf>,
    pub primary_name: Option<String>,
    pub secondary_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictionSection {
    /// Seconds between prediction cycles (default: 600)
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuerySection {
    /// Attempts of the waiting window query (default: 30)
    pub poll_attempts: Option<u32>,
    /// Seconds between attempts (default: 10)
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestSection {
    /// IANA zone used for time keys (default: Europe/Berlin)
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.timezone()?;
    Ok(config)
}

impl Config {
    /// Returns the broker settings, or None when no `[broker]` section is configured.
    pub fn broker_settings(&self) -> Option<BrokerSettings> {
        let broker = self.broker.as_ref()?;
        Some(BrokerSettings {
            host: broker.host.clone(),
            port: broker.port.unwrap_or(DEFAULT_BROKER_PORT),
            client_id: broker
                .client_id
                .clone()
                .unwrap_or_else(|| self.app.name.clone()),
            username: broker.username.clone(),
            password: broker.password.clone(),
            tls: broker.tls.unwrap_or(true),
            keep_alive: Duration::from_secs(
                broker.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
            ),
            reconnect_delay: Duration::from_secs(
                broker
                    .reconnect_delay_secs
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_SECS),
            ),
        })
    }

    pub fn topic_routes(&self) -> Option<TopicRoutes> {
        self.topics.as_ref().map(|topics| TopicRoutes {
            climate: topics.climate.clone(),
            tvoc: topics.tvoc.clone(),
            ambient: topics.ambient.clone(),
        })
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database
            .as_ref()
            .map(|db| db.url.as_str())
            .filter(|url| !url.is_empty())
    }

    pub fn location(&self) -> &str {
        self.database
            .as_ref()
            .and_then(|db| db.location.as_deref())
            .unwrap_or(DEFAULT_LOCATION)
    }

    pub fn create_schema(&self) -> bool {
        self.database
            .as_ref()
            .and_then(|db| db.create_schema)
            .unwrap_or(false)
    }

    pub fn primary_model_path(&self) -> Option<&Path> {
        non_empty_path(self.models.as_ref()?.primary_path.as_deref()?)
    }

    pub fn secondary_model_path(&self) -> Option<&Path> {
        non_empty_path(self.models.as_ref()?.secondary_path.as_deref()?)
    }

    pub fn primary_model_name(&self) -> &str {
        self.models
            .as_ref()
            .and_then(|m| m.primary_name.as_deref())
            .unwrap_or(DEFAULT_PRIMARY_MODEL_NAME)
    }

    pub fn secondary_model_name(&self) -> &str {
        self.models
            .as_ref()
            .and_then(|m| m.secondary_name.as_deref())
            .unwrap_or(DEFAULT_SECONDARY_MODEL_NAME)
    }

    /// Returns the prediction interval as Duration (default: 600 seconds)
    pub fn prediction_interval(&self) -> Duration {
        let secs = self
            .prediction
            .as_ref()
            .and_then(|p| p.interval_secs)
            .unwrap_or(DEFAULT_PREDICTION_INTERVAL_SECS);
        Duration::from_secs(secs)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        let query = self.query.as_ref();
        PollPolicy {
            attempts: query
                .and_then(|q| q.poll_attempts)
                .unwrap_or(DEFAULT_POLL_ATTEMPTS),
            interval: Duration::from_secs(
                query
                    .and_then(|q| q.poll_interval_secs)
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
        }
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        let name = self
            .ingest
            .as_ref()
            .and_then(|i| i.timezone.as_deref())
            .unwrap_or(DEFAULT_TIMEZONE);
        name.parse::<Tz>()
            .map_err(|_| ConfigError::Invalid(format!("unknown time zone: {name}")))
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}

fn non_empty_path(path: &Path) -> Option<&Path> {
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}
