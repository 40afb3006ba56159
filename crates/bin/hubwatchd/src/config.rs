//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `hubwatch.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use hubwatch_adapter_storage_sqlite_sqlx::DEFAULT_MAX_CONNECTIONS;
use hubwatch_app::rules::anomaly::AnomalySettings;
use hubwatch_app::rules::misconfig::MisconfigSettings;
use hubwatch_app::rules::offline::OfflineSettings;
use hubwatch_app::rules::schedule::ScheduleSettings;
use hubwatch_app::rules::weather::WeatherSettings;
use hubwatch_domain::schedule::MINUTES_PER_DAY;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Dispatcher, bus and clock settings.
    pub engine: EngineConfig,
    /// Where standards tables, models and schedule CSVs live.
    pub data: DataConfig,
    /// Per-rule tuning.
    pub rules: RulesConfig,
    /// Weather provider settings.
    pub weather: WeatherConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
    /// How long a writer waits for a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    /// Storage adapter configuration.
    #[must_use]
    pub fn storage(&self) -> hubwatch_adapter_storage_sqlite_sqlx::Config {
        hubwatch_adapter_storage_sqlite_sqlx::Config {
            database_url: self.url.clone(),
            max_connections: self.max_connections,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Rule engine configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dispatcher worker tasks.
    pub workers: usize,
    /// Queue capacity of each stream listener.
    pub bus_capacity: usize,
    /// Offset of the site's local time from UTC, in minutes.
    pub utc_offset_minutes: i32,
}

/// Data directory layout.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root of the data directory.
    pub dir: PathBuf,
}

impl DataConfig {
    /// Directory of learned schedule models.
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.dir.join("models")
    }

    /// Directory of labelled `<serial>.csv` schedule files.
    #[must_use]
    pub fn schedules_dir(&self) -> PathBuf {
        self.dir.join("schedules")
    }
}

/// Tuning of every rule, one table each.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// `[rules.anomaly]`
    pub anomaly: AnomalySettings,
    /// `[rules.misconfig]`
    pub misconfig: MisconfigSettings,
    /// `[rules.schedule]`
    pub schedule: ScheduleSettings,
    /// `[rules.offline]`
    pub offline: OfflineSettings,
    /// `[rules.weather]`
    pub weather: WeatherSettings,
}

/// Open-Meteo provider and snapshot cache configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Forecast endpoint.
    pub base_url: String,
    /// Site latitude.
    pub latitude: f64,
    /// Site longitude.
    pub longitude: f64,
    /// Canonical fields to request.
    pub fields: Vec<String>,
    /// How long a fetched snapshot is served from cache.
    pub cache_ttl_secs: u64,
    /// Connect timeout of provider requests.
    pub connect_timeout_secs: u64,
    /// Read timeout of provider requests.
    pub read_timeout_secs: u64,
}

impl WeatherConfig {
    /// Provider settings derived from this section.
    #[must_use]
    pub fn provider(&self) -> hubwatch_adapter_open_meteo::Config {
        hubwatch_adapter_open_meteo::Config {
            base_url: self.base_url.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            fields: self.fields.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
        }
    }
}

impl Config {
    /// Load configuration from `hubwatch.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("hubwatch.toml")?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("HUBWATCH_HOST") {
            self.server.host = val;
        }
        if let Some(port) = var("HUBWATCH_PORT").and_then(|val| val.parse().ok()) {
            self.server.port = port;
        }
        if let Some(val) = var("HUBWATCH_BIND")
            && let Some((host, port)) = val.rsplit_once(':')
        {
            self.server.host = host.to_string();
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Some(val) = var("HUBWATCH_DATABASE_URL") {
            self.database.url = val;
        }
        if let Some(val) = var("HUBWATCH_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("HUBWATCH_DATA_DIR") {
            self.data.dir = PathBuf::from(val);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.engine.workers == 0 {
            return Err(ConfigError::Validation(
                "engine.workers must be at least 1".to_string(),
            ));
        }
        if self.engine.bus_capacity == 0 {
            return Err(ConfigError::Validation(
                "engine.bus_capacity must be at least 1".to_string(),
            ));
        }
        let bin = self.rules.schedule.bin_minutes;
        if bin == 0 || MINUTES_PER_DAY % bin != 0 {
            return Err(ConfigError::Validation(format!(
                "rules.schedule.bin_minutes = {bin} does not divide a day"
            )));
        }
        let anomaly = &self.rules.anomaly;
        if !(0.0..=100.0).contains(&anomaly.p_low)
            || !(0.0..=100.0).contains(&anomaly.p_high)
            || anomaly.p_low >= anomaly.p_high
        {
            return Err(ConfigError::Validation(
                "rules.anomaly percentiles must satisfy 0 <= p_low < p_high <= 100".to_string(),
            ));
        }
        Ok(())
    }

    /// Return the `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:hubwatch.db?mode=rwc".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "hubwatchd=info,hubwatch=info,tower_http=debug".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            bus_capacity: hubwatch_app::event_bus::DEFAULT_CAPACITY,
            utc_offset_minutes: -240,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: hubwatch_adapter_open_meteo::DEFAULT_BASE_URL.to_string(),
            latitude: 10.6544,
            longitude: -71.6533,
            fields: ["temperature", "windspeed", "uv_index", "rain", "humidity"]
                .map(String::from)
                .to_vec(),
            cache_ttl_secs: 180,
            connect_timeout_secs: 3,
            read_timeout_secs: 5,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use hubwatch_app::rules::schedule::MaskSource;
    use hubwatch_app::rules::weather::ActionMode;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.url, "sqlite:hubwatch.db?mode=rwc");
        assert_eq!(config.engine.workers, 2);
        assert_eq!(config.engine.bus_capacity, 128);
        assert_eq!(config.rules.anomaly.cooldown_secs, 60);
        assert_eq!(config.rules.schedule.bin_minutes, 30);
        assert_eq!(config.weather.cache_ttl_secs, 180);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.data.dir, PathBuf::from("data"));
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [server]
            host = '127.0.0.1'
            port = 9090

            [database]
            url = 'sqlite:test.db'
            max_connections = 8
            busy_timeout_ms = 250

            [logging]
            filter = 'debug'

            [engine]
            workers = 4
            bus_capacity = 32
            utc_offset_minutes = 60

            [data]
            dir = '/var/lib/hubwatch'

            [rules.anomaly]
            cooldown_secs = 120

            [rules.schedule]
            bin_minutes = 15
            mask_source = 'csv'
            csv_serials = ['LGT0001']

            [rules.offline]
            offline_secs = 300

            [rules.weather]
            action_mode = 'notify'

            [weather]
            latitude = 48.85
            longitude = 2.35
            fields = ['temperature']
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:9090");
        assert_eq!(config.database.url, "sqlite:test.db");
        let storage = config.database.storage();
        assert_eq!(storage.max_connections, 8);
        assert_eq!(storage.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.engine.workers, 4);
        assert_eq!(config.engine.utc_offset_minutes, 60);
        assert_eq!(config.data.models_dir(), PathBuf::from("/var/lib/hubwatch/models"));
        assert_eq!(config.rules.anomaly.cooldown_secs, 120);
        assert_eq!(config.rules.anomaly.tol_abs, 0.5);
        assert_eq!(config.rules.schedule.bin_minutes, 15);
        assert_eq!(config.rules.schedule.mask_source, MaskSource::Csv);
        assert_eq!(config.rules.offline.offline_secs, 300);
        assert_eq!(config.rules.weather.action_mode, ActionMode::Notify);
        assert_eq!(config.weather.fields, vec!["temperature".to_string()]);
        assert_eq!(config.weather.read_timeout_secs, 5);
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn should_apply_env_overrides_with_bind_winning_over_host_and_port() {
        let mut config = Config::default();
        config.apply_overrides(overrides(&[
            ("HUBWATCH_HOST", "10.0.0.1"),
            ("HUBWATCH_PORT", "4000"),
            ("HUBWATCH_BIND", "127.0.0.1:5000"),
            ("HUBWATCH_DATABASE_URL", "sqlite::memory:"),
            ("HUBWATCH_LOG", "warn"),
            ("HUBWATCH_DATA_DIR", "/tmp/hw"),
        ]));

        assert_eq!(config.bind_addr(), "127.0.0.1:5000");
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.logging.filter, "warn");
        assert_eq!(config.data.schedules_dir(), PathBuf::from("/tmp/hw/schedules"));
    }

    #[test]
    fn should_prefer_rust_log_and_ignore_bad_port() {
        let mut config = Config::default();
        config.apply_overrides(overrides(&[
            ("HUBWATCH_LOG", "warn"),
            ("RUST_LOG", "trace"),
            ("HUBWATCH_PORT", "not-a-port"),
        ]));

        assert_eq!(config.logging.filter, "trace");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn should_reject_invalid_values() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.engine.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.engine.bus_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rules.schedule.bin_minutes = 7;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rules.anomaly.p_low = 99.0;
        config.rules.anomaly.p_high = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }
}
