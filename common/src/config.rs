//! Application configuration.
//!
//! Everything is read from environment variables once at startup. Values
//! that are present but malformed are fatal: the service must not start with
//! a configuration it did not ask for.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{AppError, AppResult};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;

/// Connection pool and session settings shared by every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub min_size: u32,
    pub max_size: u32,
    /// Idle connections older than this are closed (PostgreSQL pools).
    pub max_inactive_lifetime: Duration,
    /// Connections idle for longer than this are recycled (MySQL pools).
    pub recycle_time: Duration,
    pub acquire_timeout: Duration,
    /// Upper bound on draining a single pool at shutdown.
    pub close_timeout: Duration,
    /// Prepared statement cache capacity for PostgreSQL; 0 disables it.
    pub statement_cache_size: usize,
    /// PostgreSQL `statement_timeout`, applied once per connection.
    pub statement_timeout_ms: u64,
    /// MySQL `MAX_EXECUTION_TIME`, applied on every acquire.
    pub execution_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 4,
            max_inactive_lifetime: Duration::from_secs(300),
            recycle_time: Duration::from_secs(1800),
            acquire_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(10),
            statement_cache_size: 0,
            statement_timeout_ms: 180_000,
            execution_timeout_ms: 180_000,
        }
    }
}

/// Per-format row caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLimits {
    pub max_json_rows: usize,
    pub max_csv_rows: usize,
}

impl Default for RowLimits {
    fn default() -> Self {
        Self {
            max_json_rows: 10_000,
            max_csv_rows: 1_000_000,
        }
    }
}

/// CSV artifact settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvSettings {
    /// Filename announced in `Content-Disposition`.
    pub filename: String,
    /// Suffix of the transient file on disk.
    pub suffix: String,
    pub encoding: String,
}

impl Default for CsvSettings {
    fn default() -> Self {
        Self {
            filename: "results.csv".to_string(),
            suffix: ".csv".to_string(),
            encoding: "utf-8".to_string(),
        }
    }
}

/// CORS lists; a single `*` entry means "any".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsSettings {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
}

impl Default for CorsSettings {
    fn default() -> Self {
        let any = vec!["*".to_string()];
        Self {
            allow_origins: any.clone(),
            allow_methods: any.clone(),
            allow_headers: any.clone(),
            expose_headers: any,
        }
    }
}

/// Full service configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token every query request must present.
    pub api_key: String,
    pub pool: PoolSettings,
    pub limits: RowLimits,
    pub csv: CsvSettings,
    /// Rate limit expression, e.g. `100/hour`.
    pub rate_limit: String,
    pub cors: CorsSettings,
    /// Log level name, e.g. `DEBUG`.
    pub log_level: String,
}

impl AppConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("API_KEY")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::config("API_KEY env var not set"))?;

        let defaults = PoolSettings::default();
        let pool = PoolSettings {
            min_size: parse_var(&lookup, "DB_POOL_MIN_SIZE", defaults.min_size)?,
            max_size: parse_var(&lookup, "DB_POOL_MAX_SIZE", defaults.max_size)?,
            max_inactive_lifetime: Duration::from_secs(parse_var(
                &lookup,
                "DB_POOL_MAX_INACTIVE_LIFETIME",
                defaults.max_inactive_lifetime.as_secs(),
            )?),
            recycle_time: Duration::from_secs(parse_var(
                &lookup,
                "DB_POOL_RECYCLE_TIME",
                defaults.recycle_time.as_secs(),
            )?),
            acquire_timeout: Duration::from_secs(parse_var(
                &lookup,
                "DB_POOL_ACQUIRE_TIMEOUT",
                defaults.acquire_timeout.as_secs(),
            )?),
            close_timeout: Duration::from_secs(parse_var(
                &lookup,
                "DB_POOL_CLOSE_TIMEOUT",
                defaults.close_timeout.as_secs(),
            )?),
            statement_cache_size: parse_var(
                &lookup,
                "DB_STATEMENT_CACHE_SIZE",
                defaults.statement_cache_size,
            )?,
            statement_timeout_ms: parse_var(
                &lookup,
                "DB_STATEMENT_TIMEOUT_MS",
                defaults.statement_timeout_ms,
            )?,
            execution_timeout_ms: parse_var(
                &lookup,
                "DB_EXECUTION_TIMEOUT_MS",
                defaults.execution_timeout_ms,
            )?,
        };
        if pool.max_size == 0 || pool.min_size > pool.max_size {
            return Err(AppError::config(format!(
                "invalid pool bounds: min {} / max {}",
                pool.min_size, pool.max_size
            )));
        }

        let limits = RowLimits {
            max_json_rows: parse_var(&lookup, "MAX_JSON_ROWS", RowLimits::default().max_json_rows)?,
            max_csv_rows: parse_var(&lookup, "MAX_CSV_ROWS", RowLimits::default().max_csv_rows)?,
        };

        let csv_defaults = CsvSettings::default();
        let csv = CsvSettings {
            filename: string_var(&lookup, "CSV_FILENAME", &csv_defaults.filename),
            suffix: string_var(&lookup, "CSV_FILE_SUFFIX", &csv_defaults.suffix),
            encoding: string_var(&lookup, "CSV_ENCODING", &csv_defaults.encoding),
        };
        let normalized = csv.encoding.to_lowercase().replace('_', "-");
        if normalized != "utf-8" && normalized != "utf8" {
            return Err(AppError::config(format!(
                "unsupported CSV_ENCODING '{}'; only utf-8 is supported",
                csv.encoding
            )));
        }

        let cors = CorsSettings {
            allow_origins: list_var(&lookup, "CORS_ALLOW_ORIGINS"),
            allow_methods: list_var(&lookup, "CORS_ALLOW_METHODS"),
            allow_headers: list_var(&lookup, "CORS_ALLOW_HEADERS"),
            expose_headers: list_var(&lookup, "CORS_EXPOSE_HEADERS"),
        };

        Ok(Self {
            host: string_var(&lookup, "SERVER_HOST", DEFAULT_HOST),
            port: parse_var(&lookup, "SERVER_PORT", DEFAULT_PORT)?,
            api_key,
            pool,
            limits,
            csv,
            rate_limit: string_var(&lookup, "RATE_LIMIT", "100/hour"),
            cors,
            log_level: string_var(&lookup, "LOG_LEVEL", "DEBUG").to_uppercase(),
        })
    }

    /// Default `tracing` filter directive derived from `LOG_LEVEL`.
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.as_str() {
            "TRACE" => "trace",
            "DEBUG" => "debug",
            "INFO" => "info",
            "WARN" | "WARNING" => "warn",
            "ERROR" | "CRITICAL" | "FATAL" => "error",
            _ => "debug",
        }
    }

    /// `host:port` listen address.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &"***")
            .field("pool", &self.pool)
            .field("limits", &self.limits)
            .field("csv", &self.csv)
            .field("rate_limit", &self.rate_limit)
            .field("cors", &self.cors)
            .field("log_level", &self.log_level)
            .finish()
    }
}

fn string_var<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key).map(|v| v.trim().to_string()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|e| AppError::config(format!("{key}={v:?} is invalid: {e}"))),
    }
}

fn list_var<F>(lookup: &F, key: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = string_var(lookup, key, "*");
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        vec!["*".to_string()]
    } else {
        items
    }
}
