//! Configuration for the Tavern client.
//!
//! Read from `~/.tavern/config.toml`. Every section and field is optional;
//! missing values fall back to the defaults below. String values may
//! reference environment variables as `${NAME}`.
//!
//! ```toml
//! [backend]
//! base_url = "https://game.example/"
//! long_poll_paths = ["api/events"]
//!
//! [transport]
//! default_timeout_ms = 5000
//! max_timeout_reissues = 3
//!
//! [device]
//! user_id = "${TAVERN_DEVICE_USER_ID}"
//! user_name = "Ada"
//!
//! [retry.identity]
//! per_attempt_timeout_ms = 10000
//! delay_ms = 2000
//!
//! [retry.calls]
//! max_attempts = 4
//! per_attempt_timeout_ms = 10000
//! delay_ms = 1000
//!
//! [log]
//! file = "${XDG_STATE_HOME}/tavern/tavern.log"
//! ```

use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tavern_net::{RetryPolicy, TransportError, TransportSettings};
use tavern_types::DeviceProfile;
use thiserror::Error;

/// Overrides `[backend] base_url` when set.
pub const BASE_URL_ENV: &str = "TAVERN_BASE_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:8080/";
const DEFAULT_IDENTITY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_IDENTITY_DELAY_MS: u64 = 2_000;
const DEFAULT_CALL_ATTEMPTS: u32 = 4;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CALL_DELAY_MS: u64 = 1_000;

#[derive(Debug, Default, Deserialize)]
pub struct TavernConfig {
    pub backend: Option<BackendConfig>,
    pub transport: Option<TransportConfig>,
    pub device: Option<DeviceConfig>,
    pub retry: Option<RetryConfig>,
    pub scene: Option<SceneConfig>,
    pub log: Option<LogConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid backend settings: {0}")]
    Backend(#[from] TransportError),
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::Backend(_) => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BackendConfig {
    pub base_url: Option<String>,
    /// Path prefixes exempt from the default timeout and re-issue.
    #[serde(default)]
    pub long_poll_paths: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransportConfig {
    pub default_timeout_ms: Option<u64>,
    /// Omit to re-issue on every timeout.
    pub max_timeout_reissues: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceConfig {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryConfig {
    /// Identity never gives up, so it has no attempt limit.
    pub identity: Option<IdentityRetryConfig>,
    /// Every other bootstrap call.
    pub calls: Option<CallRetryConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdentityRetryConfig {
    pub per_attempt_timeout_ms: Option<u64>,
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallRetryConfig {
    pub max_attempts: Option<u32>,
    pub per_attempt_timeout_ms: Option<u64>,
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SceneConfig {
    /// Where the CLI writes the composited scene.
    pub output: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogConfig {
    /// Tried before the default log locations.
    pub file: Option<String>,
}

/// Replace `${NAME}` with the value of environment variable `NAME`.
///
/// Unset variables expand to the empty string. An unterminated `${` is kept verbatim.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

fn expand_opt(value: Option<&String>) -> Option<String> {
    value
        .map(|v| expand_env_vars(v))
        .filter(|v| !v.trim().is_empty())
}

impl TavernConfig {
    /// Load from the default location. `Ok(None)` when no file exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path).map(Some),
            _ => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, source);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Backend base URL: env override, then config, then the local default.
    #[must_use]
    pub fn base_url(&self) -> String {
        if let Ok(url) = env::var(BASE_URL_ENV)
            && !url.trim().is_empty()
        {
            return url;
        }
        expand_opt(self.backend.as_ref().and_then(|b| b.base_url.as_ref()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn transport_settings(&self) -> Result<TransportSettings, ConfigError> {
        let mut settings = TransportSettings::new(&self.base_url())?;
        if let Some(transport) = &self.transport {
            if let Some(ms) = transport.default_timeout_ms {
                settings = settings.with_default_timeout(Duration::from_millis(ms));
            }
            settings = settings.with_max_timeout_reissues(transport.max_timeout_reissues);
        }
        if let Some(backend) = &self.backend {
            for prefix in &backend.long_poll_paths {
                settings = settings.with_long_poll_path(prefix.clone());
            }
        }
        Ok(settings)
    }

    /// Unbounded policy for the identity stage.
    #[must_use]
    pub fn identity_policy(&self) -> RetryPolicy {
        let identity = self.retry.as_ref().and_then(|r| r.identity.as_ref());
        RetryPolicy::unbounded(
            Duration::from_millis(
                identity
                    .and_then(|i| i.per_attempt_timeout_ms)
                    .unwrap_or(DEFAULT_IDENTITY_TIMEOUT_MS),
            ),
            Duration::from_millis(
                identity
                    .and_then(|i| i.delay_ms)
                    .unwrap_or(DEFAULT_IDENTITY_DELAY_MS),
            ),
        )
    }

    /// Bounded policy for every call after identity.
    #[must_use]
    pub fn call_policy(&self) -> RetryPolicy {
        let calls = self.retry.as_ref().and_then(|r| r.calls.as_ref());
        RetryPolicy::bounded(
            calls
                .and_then(|c| c.max_attempts)
                .unwrap_or(DEFAULT_CALL_ATTEMPTS),
            Duration::from_millis(
                calls
                    .and_then(|c| c.per_attempt_timeout_ms)
                    .unwrap_or(DEFAULT_CALL_TIMEOUT_MS),
            ),
            Duration::from_millis(
                calls
                    .and_then(|c| c.delay_ms)
                    .unwrap_or(DEFAULT_CALL_DELAY_MS),
            ),
        )
    }

    /// Device profile from config; `None` if no device user id is configured.
    #[must_use]
    pub fn device_profile(&self) -> Option<DeviceProfile> {
        let device = self.device.as_ref()?;
        let device_user_id = expand_opt(device.user_id.as_ref())?;
        Some(DeviceProfile {
            device_user_name: expand_opt(device.user_name.as_ref())
                .unwrap_or_else(|| device_user_id.clone()),
            device_user_id,
            device_user_photo_url: expand_opt(device.photo_url.as_ref()),
        })
    }

    #[must_use]
    pub fn scene_output(&self) -> Option<&Path> {
        self.scene.as_ref()?.output.as_deref()
    }

    /// Log files to try in order: `[log] file`, then `logs/tavern.log` next
    /// to the config file, then `./.tavern/logs/tavern.log`.
    #[must_use]
    pub fn log_file_candidates(&self) -> Vec<PathBuf> {
        let configured = expand_opt(self.log.as_ref().and_then(|l| l.file.as_ref()));
        let beside_config = config_path()
            .as_deref()
            .and_then(Path::parent)
            .map(|dir| dir.join("logs").join("tavern.log"));
        let local = Path::new(".tavern").join("logs").join("tavern.log");

        configured
            .map(PathBuf::from)
            .into_iter()
            .chain(beside_config)
            .chain(std::iter::once(local))
            .collect()
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tavern").join("config.toml"))
}
