// Конфигурация приложения.
// Фильтр логов по умолчанию зависит от режима сборки, всё остальное читается из TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::peer::negotiation::NegotiationTimeouts;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "babymon_lib=debug,babymon=debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "babymon_lib=info,babymon=info,webrtc=error";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// ICE сервер
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // only 'stun' is accepted
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IceConfig {
    #[serde(default = "default_ice_servers")]
    pub servers: Vec<ServerConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignalingConfig {
    /// База в стиле Firebase RTDB, например `https://<project>.firebasedatabase.app/signals`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_answer_poll_ms")]
    pub answer_poll_interval_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NegotiationConfig {
    #[serde(default = "default_gather_secs")]
    pub gather_timeout_secs: u64,
    #[serde(default = "default_connect_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_grace_secs")]
    pub grace_period_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ControlConfig {
    #[serde(default = "default_ping_ms")]
    pub ping_interval_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PairingConfig {
    /// Где камера запоминает последний код.
    #[serde(default)]
    pub code_file: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub ice: IceConfig,
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub negotiation: NegotiationConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

fn default_answer_poll_ms() -> u64 {
    1200
}

fn default_gather_secs() -> u64 {
    10
}

fn default_connect_secs() -> u64 {
    30
}

fn default_grace_secs() -> u64 {
    10
}

fn default_ping_ms() -> u64 {
    800
}

fn default_gain() -> f32 {
    0.28
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: default_ice_servers(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            answer_poll_interval_ms: default_answer_poll_ms(),
        }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            gather_timeout_secs: default_gather_secs(),
            connect_timeout_secs: default_connect_secs(),
            grace_period_secs: default_grace_secs(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_ms(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            gain: default_gain(),
            sample_rate: default_sample_rate(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Читает TOML конфиг; если файла нет, берутся значения по умолчанию.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Relay-серверы не поддерживаются: только STUN.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice.servers {
            if server.url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "ice server {} has an empty url",
                    server.id
                )));
            }
            if server.r#type != "stun" || server.url.starts_with("turn:") {
                return Err(ConfigError::Invalid(format!(
                    "ice server {} is not a STUN server",
                    server.id
                )));
            }
        }
        if self.control.ping_interval_ms == 0 || self.signaling.answer_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("intervals must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.audio.gain) {
            return Err(ConfigError::Invalid("audio gain must be within 0..=1".into()));
        }
        Ok(())
    }

    pub fn negotiation_timeouts(&self) -> NegotiationTimeouts {
        NegotiationTimeouts {
            gather: Duration::from_secs(self.negotiation.gather_timeout_secs),
            connect: Duration::from_secs(self.negotiation.connect_timeout_secs),
            grace: Duration::from_secs(self.negotiation.grace_period_secs),
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.control.ping_interval_ms)
    }

    pub fn answer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.signaling.answer_poll_interval_ms)
    }
}
