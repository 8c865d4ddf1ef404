//! Server configuration: defaults, then an optional YAML file, then `SCOPEHUB_*`
//! environment variables. Later layers win.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ServerError};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7002";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
pub const BASE_DIR_NAME: &str = ".scopehub";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ServerError::Config(format!("unknown log format '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

/// YAML config file. Every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind_addr: Option<String>,
    pub base_dir: Option<PathBuf>,
    pub scope_api_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub polling_interval_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub publish_timeout_secs: Option<u64>,
    pub seed_file: Option<PathBuf>,
    pub log_format: Option<LogFormat>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let raw = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        serde_yaml::from_str(&raw).map_err(|source| ServerError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub bind_addr: Option<String>,
    pub base_dir: Option<PathBuf>,
    pub scope_api_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub polling_interval_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub publish_timeout_secs: Option<u64>,
    pub seed_file: Option<PathBuf>,
    pub log_format: Option<LogFormat>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            bind_addr: string_var("SCOPEHUB_BIND_ADDR"),
            base_dir: string_var("SCOPEHUB_BASE_DIR").map(PathBuf::from),
            scope_api_key: string_var("SCOPEHUB_SCOPE_API_KEY"),
            webhook_secret: string_var("SCOPEHUB_WEBHOOK_SECRET"),
            polling_interval_secs: parsed_var("SCOPEHUB_POLLING_INTERVAL_SECS"),
            fetch_timeout_secs: parsed_var("SCOPEHUB_FETCH_TIMEOUT_SECS"),
            publish_timeout_secs: parsed_var("SCOPEHUB_PUBLISH_TIMEOUT_SECS"),
            seed_file: string_var("SCOPEHUB_SEED_FILE").map(PathBuf::from),
            log_format: parsed_var("SCOPEHUB_LOG_FORMAT"),
        }
    }
}

fn string_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parsed_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = string_var(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparsable environment variable");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub base_dir: PathBuf,
    /// Bearer token for the admin endpoints; `None` rejects every admin call.
    pub scope_api_key: Option<String>,
    /// Webhook HMAC secret; `None` rejects every webhook.
    pub webhook_secret: Option<String>,
    /// Timer-driven sweep period; `None` disables the timer.
    pub polling_interval: Option<Duration>,
    pub fetch_timeout: Duration,
    pub publish_timeout: Duration,
    pub seed_file: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Built-in defaults rooted at `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7002)),
            base_dir: base_dir.into(),
            scope_api_key: None,
            webhook_secret: None,
            polling_interval: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            seed_file: None,
            log_format: LogFormat::Pretty,
        }
    }

    /// Read the optional file at `config_path`, then the process environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ServerError> {
        let file = config_path.map(FileConfig::load).transpose()?;
        Self::resolve(file.unwrap_or_default(), EnvConfig::gather())
    }

    pub fn resolve(file: FileConfig, env: EnvConfig) -> Result<Self, ServerError> {
        let base_dir = match env.base_dir.or(file.base_dir) {
            Some(dir) => dir,
            None => dirs::home_dir()
                .map(|home| home.join(BASE_DIR_NAME))
                .ok_or_else(|| ServerError::Config("cannot determine home directory".into()))?,
        };
        let mut config = Self::with_base_dir(base_dir);

        if let Some(raw) = env.bind_addr.or(file.bind_addr) {
            config.bind_addr = raw
                .parse()
                .map_err(|err| ServerError::Config(format!("invalid bind_addr '{raw}': {err}")))?;
        }
        config.scope_api_key = env.scope_api_key.or(file.scope_api_key).filter(|k| !k.is_empty());
        config.webhook_secret = env.webhook_secret.or(file.webhook_secret).filter(|s| !s.is_empty());
        config.polling_interval = env
            .polling_interval_secs
            .or(file.polling_interval_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        if let Some(secs) = env.fetch_timeout_secs.or(file.fetch_timeout_secs) {
            config.fetch_timeout = positive_secs("fetch_timeout_secs", secs)?;
        }
        if let Some(secs) = env.publish_timeout_secs.or(file.publish_timeout_secs) {
            config.publish_timeout = positive_secs("publish_timeout_secs", secs)?;
        }
        config.seed_file = env.seed_file.or(file.seed_file);
        if let Some(format) = env.log_format.or(file.log_format) {
            config.log_format = format;
        }
        Ok(config)
    }
}

fn positive_secs(key: &str, secs: u64) -> Result<Duration, ServerError> {
    if secs == 0 {
        return Err(ServerError::Config(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_secs(secs))
}
