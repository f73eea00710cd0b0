use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::allocation::{EngineSettings, MatchingSettings, ReviewPolicy, RoomTieBreak};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine: load_engine_settings()?,
        })
    }
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}

fn load_engine_settings() -> Result<EngineSettings, ConfigError> {
    let defaults = EngineSettings::default();

    let worker_pool_size = parsed("ALLOC_WORKER_POOL_SIZE", defaults.worker_pool_size)?;
    if worker_pool_size == 0 {
        return Err(ConfigError::InvalidValue {
            name: "ALLOC_WORKER_POOL_SIZE",
            value: "0".to_string(),
        });
    }

    let checkpoint_interval = parsed(
        "ALLOC_CHECKPOINT_INTERVAL",
        defaults.matching.checkpoint_interval,
    )?;
    let batch_size = parsed("ALLOC_BATCH_SIZE", defaults.matching.batch_size)?;
    for (name, value) in [
        ("ALLOC_CHECKPOINT_INTERVAL", checkpoint_interval),
        ("ALLOC_BATCH_SIZE", batch_size),
    ] {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                name,
                value: value.to_string(),
            });
        }
    }

    let problem_threshold = parsed("ALLOC_PROBLEM_THRESHOLD", defaults.problem_threshold)?;
    if !(0.0..=100.0).contains(&problem_threshold) {
        return Err(ConfigError::InvalidValue {
            name: "ALLOC_PROBLEM_THRESHOLD",
            value: problem_threshold.to_string(),
        });
    }

    let reopen_confirmed = parsed(
        "ALLOC_REOPEN_CONFIRMED",
        defaults.review.reopen_confirmed,
    )?;

    let tie_break = match env::var("ALLOC_TIE_BREAK") {
        Ok(raw) => RoomTieBreak::parse(&raw).ok_or(ConfigError::InvalidValue {
            name: "ALLOC_TIE_BREAK",
            value: raw,
        })?,
        Err(_) => defaults.matching.tie_break,
    };

    Ok(EngineSettings {
        worker_pool_size,
        matching: MatchingSettings {
            batch_size,
            checkpoint_interval,
            tie_break,
        },
        problem_threshold,
        review: ReviewPolicy { reopen_confirmed },
    })
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { name, value } => {
                write!(f, "{name} has an invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
