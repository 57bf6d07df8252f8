use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::attribution::AttributionModel;
use crate::experiments::ConfidenceLevel;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub logging: LoggingConfig,
    pub attribution: AttributionConfig,
    pub reporting: ReportingConfig,
    pub realtime: RealtimeConfig,
    pub experiments: ExperimentConfig,
    pub tasks: TaskConfig,
    pub pagination: PaginationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }

    /// Read `LOG_FORMAT` on its own so tracing can start before the rest of
    /// the configuration. Returns the raw value as well when it was not recognised.
    pub fn from_env() -> (Self, Option<String>) {
        match std::env::var("LOG_FORMAT") {
            Ok(raw) => match Self::from_name(&raw) {
                Some(format) => (format, None),
                None => (Self::Pretty, Some(raw)),
            },
            Err(_) => (Self::Pretty, None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    /// Maximum lag between a click and the conversion it may be credited for
    pub window_days: i64,
    /// Half-life used by the time_decay model
    pub half_life_days: f64,
    /// Model used for the precomputed report after each conversion
    pub default_model: AttributionModel,
    /// Sessions required before data_driven stops falling back to linear
    pub data_driven_min_sessions: usize,
    /// How long a conversion request waits for its attribution job (0 = never wait)
    pub ack_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    pub query_timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
    pub default_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Bounded queue length per live subscriber
    pub subscriber_queue: usize,
    /// Idle time after which a session no longer counts as active
    pub session_ttl_secs: i64,
    pub sweep_interval_secs: u64,
    /// Offset of the server's local day used for the daily counter reset
    pub utc_offset_minutes: i32,
    /// Counter sets without clicks or subscribers for this long are dropped
    pub idle_evict_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub default_confidence: ConfidenceLevel,
    pub sequential_alpha: f64,
    pub sequential_beta: f64,
    /// Relative minimum detectable effect (0.10 = +10% over control)
    pub minimum_detectable_effect: f64,
    pub completion_sweep_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub queue_capacity: usize,
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// HMAC secret for signing cursors (random per process when unset)
    pub cursor_hmac_secret: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Sqlite,
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
        }
    }
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            half_life_days: 7.0,
            default_model: AttributionModel::LastTouch,
            data_driven_min_sessions: 100,
            ack_wait_ms: 0,
        }
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 2_000,
            cache_ttl_secs: 300,
            cache_max_entries: 10_000,
            default_days: 30,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            subscriber_queue: 64,
            session_ttl_secs: 300,
            sweep_interval_secs: 30,
            utc_offset_minutes: 0,
            idle_evict_secs: 86_400,
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            default_confidence: ConfidenceLevel::P95,
            sequential_alpha: 0.05,
            sequential_beta: 0.20,
            minimum_detectable_effect: 0.10,
            completion_sweep_secs: 60,
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_in_flight: 32,
        }
    }
}

/// Read and parse an optional variable, failing loudly on malformed values.
fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./linkscope.db?mode=rwc".to_string());
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 5u32)?;

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = env_parse("API_PORT", 8080u16)?;

        let (format, unknown_format) = LogFormat::from_env();
        if let Some(raw) = unknown_format {
            tracing::warn!(
                "Unknown LOG_FORMAT '{raw}', falling back to 'pretty'. Supported values: pretty, json"
            );
        }

        let attribution_defaults = AttributionConfig::default();
        let default_model = match std::env::var("ATTRIBUTION_DEFAULT_MODEL") {
            Ok(raw) => raw.parse::<AttributionModel>().unwrap_or_else(|_| {
                tracing::warn!(
                    "Unknown ATTRIBUTION_DEFAULT_MODEL '{raw}', falling back to '{}'",
                    attribution_defaults.default_model
                );
                attribution_defaults.default_model
            }),
            Err(_) => attribution_defaults.default_model,
        };

        let attribution = AttributionConfig {
            window_days: env_parse("ATTRIBUTION_WINDOW_DAYS", attribution_defaults.window_days)?,
            half_life_days: env_parse(
                "ATTRIBUTION_HALF_LIFE_DAYS",
                attribution_defaults.half_life_days,
            )?,
            default_model,
            data_driven_min_sessions: env_parse(
                "ATTRIBUTION_DATA_DRIVEN_MIN_SESSIONS",
                attribution_defaults.data_driven_min_sessions,
            )?,
            ack_wait_ms: env_parse("ATTRIBUTION_ACK_WAIT_MS", attribution_defaults.ack_wait_ms)?,
        };

        if attribution.window_days < 1 {
            anyhow::bail!("ATTRIBUTION_WINDOW_DAYS must be at least 1");
        }
        if !(attribution.half_life_days > 0.0) {
            anyhow::bail!("ATTRIBUTION_HALF_LIFE_DAYS must be positive");
        }

        let reporting_defaults = ReportingConfig::default();
        let reporting = ReportingConfig {
            query_timeout_ms: env_parse(
                "REPORT_QUERY_TIMEOUT_MS",
                reporting_defaults.query_timeout_ms,
            )?,
            cache_ttl_secs: env_parse("REPORT_CACHE_TTL_SECS", reporting_defaults.cache_ttl_secs)?,
            cache_max_entries: env_parse(
                "REPORT_CACHE_MAX_ENTRIES",
                reporting_defaults.cache_max_entries,
            )?,
            default_days: env_parse("REPORT_DEFAULT_DAYS", reporting_defaults.default_days)?,
        };

        let realtime_defaults = RealtimeConfig::default();
        let realtime = RealtimeConfig {
            subscriber_queue: env_parse(
                "REALTIME_SUBSCRIBER_QUEUE",
                realtime_defaults.subscriber_queue,
            )?
            .max(1),
            session_ttl_secs: env_parse(
                "REALTIME_SESSION_TTL_SECS",
                realtime_defaults.session_ttl_secs,
            )?,
            sweep_interval_secs: env_parse(
                "REALTIME_SWEEP_INTERVAL_SECS",
                realtime_defaults.sweep_interval_secs,
            )?
            .max(1),
            utc_offset_minutes: env_parse(
                "REALTIME_UTC_OFFSET_MINUTES",
                realtime_defaults.utc_offset_minutes,
            )?,
            idle_evict_secs: env_parse(
                "REALTIME_IDLE_EVICT_SECS",
                realtime_defaults.idle_evict_secs,
            )?,
        };

        let experiment_defaults = ExperimentConfig::default();
        let default_confidence = match std::env::var("EXPERIMENT_DEFAULT_CONFIDENCE") {
            Ok(raw) => raw.parse::<ConfidenceLevel>().unwrap_or_else(|_| {
                tracing::warn!(
                    "Unknown EXPERIMENT_DEFAULT_CONFIDENCE '{raw}', falling back to 95. Supported values: 90, 95, 99"
                );
                experiment_defaults.default_confidence
            }),
            Err(_) => experiment_defaults.default_confidence,
        };
        let experiments = ExperimentConfig {
            default_confidence,
            sequential_alpha: env_parse(
                "EXPERIMENT_SEQUENTIAL_ALPHA",
                experiment_defaults.sequential_alpha,
            )?,
            sequential_beta: env_parse(
                "EXPERIMENT_SEQUENTIAL_BETA",
                experiment_defaults.sequential_beta,
            )?,
            minimum_detectable_effect: env_parse(
                "EXPERIMENT_MDE",
                experiment_defaults.minimum_detectable_effect,
            )?,
            completion_sweep_secs: env_parse(
                "EXPERIMENT_COMPLETION_SWEEP_SECS",
                experiment_defaults.completion_sweep_secs,
            )?
            .max(1),
        };

        for (name, value) in [
            ("EXPERIMENT_SEQUENTIAL_ALPHA", experiments.sequential_alpha),
            ("EXPERIMENT_SEQUENTIAL_BETA", experiments.sequential_beta),
        ] {
            if !(value > 0.0 && value < 0.5) {
                anyhow::bail!("{name} must be within (0, 0.5), got {value}");
            }
        }
        if !(experiments.minimum_detectable_effect > 0.0) {
            anyhow::bail!("EXPERIMENT_MDE must be positive");
        }

        let task_defaults = TaskConfig::default();
        let tasks = TaskConfig {
            queue_capacity: env_parse("TASK_QUEUE_CAPACITY", task_defaults.queue_capacity)?.max(1),
            max_in_flight: env_parse("TASK_MAX_IN_FLIGHT", task_defaults.max_in_flight)?.max(1),
        };

        let cursor_hmac_secret = std::env::var("CURSOR_HMAC_SECRET").ok();

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            logging: LoggingConfig { format },
            attribution,
            reporting,
            realtime,
            experiments,
            tasks,
            pagination: PaginationConfig { cursor_hmac_secret },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_run_in_memory() {
        let config = Config::default();
        assert!(matches!(config.database.backend, DatabaseBackend::Sqlite));
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.attribution.default_model, AttributionModel::LastTouch);
        assert_eq!(config.experiments.default_confidence, ConfidenceLevel::P95);
        assert_eq!(config.realtime.idle_evict_secs, 86_400);
    }

    #[test]
    fn test_log_format_names() {
        assert_eq!(LogFormat::from_name(" JSON "), Some(LogFormat::Json));
        assert_eq!(LogFormat::from_name("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::from_name("xml"), None);

        std::env::set_var("LOG_FORMAT", "xml");
        assert_eq!(LogFormat::from_env(), (LogFormat::Pretty, Some("xml".to_string())));
        std::env::set_var("LOG_FORMAT", "json");
        assert_eq!(LogFormat::from_env(), (LogFormat::Json, None));
        std::env::remove_var("LOG_FORMAT");
    }

    #[test]
    fn test_env_parse() {
        // Names are unique to this test so parallel tests never see them
        std::env::set_var("LINKSCOPE_TEST_GOOD_PORT", " 9090 ");
        std::env::set_var("LINKSCOPE_TEST_BAD_PORT", "ninety");

        assert_eq!(env_parse("LINKSCOPE_TEST_GOOD_PORT", 8080u16).unwrap(), 9090);
        assert_eq!(env_parse("LINKSCOPE_TEST_UNSET_PORT", 8080u16).unwrap(), 8080);

        let err = env_parse("LINKSCOPE_TEST_BAD_PORT", 8080u16).unwrap_err();
        assert!(err.to_string().contains("LINKSCOPE_TEST_BAD_PORT"));
    }
}
