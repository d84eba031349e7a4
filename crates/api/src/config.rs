use std::path::PathBuf;
use std::time::Duration;

use relay_comfyui::BackendConfig;

/// A configuration value that is missing or malformed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Where artifacts are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobBackend {
    S3 {
        bucket: String,
        endpoint_url: Option<String>,
    },
    Local {
        dir: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Backends in configuration order; the index is the backend id.
    pub backends: Vec<BackendConfig>,
    /// Unset selects the in-memory task store.
    pub database_url: Option<String>,
    pub blob: BlobBackend,
    pub key_prefix: String,
    pub fallback_dir: PathBuf,
    pub webhook_timeout_secs: u64,
    pub fetch_max_attempts: u32,
    pub request_timeout_secs: u64,
    pub shutdown_drain_secs: u64,
    pub log_format: LogFormat,
}

impl RelayConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                | Default                  |
    /// |------------------------|--------------------------|
    /// | `HOST`                 | `0.0.0.0`                |
    /// | `PORT`                 | `8000`                   |
    /// | `COMFYUI_URLS`         | required                 |
    /// | `DATABASE_URL`         | unset (in-memory store)  |
    /// | `BLOB_BACKEND`         | `s3`                     |
    /// | `S3_BUCKET`            | required for `s3`        |
    /// | `S3_KEY_PREFIX`        | empty                    |
    /// | `S3_ENDPOINT_URL`      | unset                    |
    /// | `BLOB_LOCAL_DIR`       | `./blobs`                |
    /// | `FALLBACK_DIR`         | `./fallback`             |
    /// | `WEBHOOK_TIMEOUT_SECS` | `10`                     |
    /// | `FETCH_MAX_ATTEMPTS`   | `3`                      |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                     |
    /// | `SHUTDOWN_DRAIN_SECS`  | `30`                     |
    /// | `LOG_FORMAT`           | `text`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process
    /// environment. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let urls = get("COMFYUI_URLS").ok_or(ConfigError::Missing("COMFYUI_URLS"))?;
        let backends = urls
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(|u| {
                BackendConfig::from_api_url(u).map_err(|e| ConfigError::Invalid {
                    key: "COMFYUI_URLS",
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if backends.is_empty() {
            return Err(ConfigError::Missing("COMFYUI_URLS"));
        }

        let blob = match get("BLOB_BACKEND").as_deref().unwrap_or("s3") {
            "s3" => BlobBackend::S3 {
                bucket: get("S3_BUCKET").ok_or(ConfigError::Missing("S3_BUCKET"))?,
                endpoint_url: get("S3_ENDPOINT_URL"),
            },
            "local" => BlobBackend::Local {
                dir: get("BLOB_LOCAL_DIR")
                    .unwrap_or_else(|| "./blobs".into())
                    .into(),
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "BLOB_BACKEND",
                    reason: format!("expected `s3` or `local`, got `{other}`"),
                })
            }
        };

        let log_format = match get("LOG_FORMAT").as_deref().unwrap_or("text") {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    reason: format!("expected `text` or `json`, got `{other}`"),
                })
            }
        };

        let fetch_max_attempts = parse(&get, "FETCH_MAX_ATTEMPTS", 3u32)?;
        if fetch_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "FETCH_MAX_ATTEMPTS",
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&get, "PORT", 8000u16)?,
            backends,
            database_url: get("DATABASE_URL"),
            blob,
            key_prefix: get("S3_KEY_PREFIX").unwrap_or_default(),
            fallback_dir: get("FALLBACK_DIR")
                .unwrap_or_else(|| "./fallback".into())
                .into(),
            webhook_timeout_secs: parse(&get, "WEBHOOK_TIMEOUT_SECS", 10u64)?,
            fetch_max_attempts,
            request_timeout_secs: parse(&get, "REQUEST_TIMEOUT_SECS", 30u64)?,
            shutdown_drain_secs: parse(&get, "SHUTDOWN_DRAIN_SECS", 30u64)?,
            log_format,
        })
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_secs)
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
    }
}
