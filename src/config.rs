use std::fmt;
use std::path::PathBuf;

use ulid::Ulid;

use crate::model::UserId;

/// Server settings, read from `RESERVD_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub admins: Vec<UserId>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "reservd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            admins: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or empty keys keep their defaults;
    /// set keys that do not parse are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(v) = get("RESERVD_BIND") {
            config.bind = v;
        }
        if let Some(v) = get("RESERVD_PORT") {
            config.port = parse_number("RESERVD_PORT", &v)?;
        }
        if let Some(v) = get("RESERVD_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RESERVD_PASSWORD") {
            config.password = v;
        }
        if let Some(v) = get("RESERVD_MAX_CONNECTIONS") {
            config.max_connections = parse_number("RESERVD_MAX_CONNECTIONS", &v)?;
            if config.max_connections == 0 {
                return Err(ConfigError::Invalid {
                    key: "RESERVD_MAX_CONNECTIONS",
                    value: v,
                    reason: "must be at least 1".into(),
                });
            }
        }
        if let Some(v) = get("RESERVD_COMPACT_THRESHOLD") {
            config.compact_threshold = parse_number("RESERVD_COMPACT_THRESHOLD", &v)?;
        }
        if let Some(v) = get("RESERVD_METRICS_PORT") {
            config.metrics_port = Some(parse_number("RESERVD_METRICS_PORT", &v)?);
        }
        config.tls_cert = get("RESERVD_TLS_CERT").map(PathBuf::from);
        config.tls_key = get("RESERVD_TLS_KEY").map(PathBuf::from);
        if let Some(v) = get("RESERVD_ADMINS") {
            config.admins = parse_admins(&v)?;
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservd.wal")
    }
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_admins(value: &str) -> Result<Vec<UserId>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Ulid::from_string(s).map_err(|e| ConfigError::Invalid {
                key: "RESERVD_ADMINS",
                value: s.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { key, value, reason } => write!(f, "{key}={value:?}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
