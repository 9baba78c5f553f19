//! Monitors: a type-independent envelope wrapping exactly one check
//! configuration, selected by the `kind` discriminator.

mod engine;
mod event;
mod http;
mod ping;
mod registry;
mod response;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::models::display_id_from;

pub use engine::{CheckEngine, DEFAULT_RETRY_DELAY, DEFAULT_USER_AGENT};
pub use event::{MonitorEvent, MonitorEventKind};
pub use http::{
    DEFAULT_HTTP_TIMEOUT, HTTP_METHODS, HttpCheckConfig, HttpClient, HttpConfigError, HttpRequest,
    HttpResponse, ReqwestClient, TransportError,
};
pub use ping::{NetProber, PingCheckConfig, PingConfigError, Prober, Protocol, join_host_port};
pub use registry::{ConfigDecoder, DecodeError, MonitorRegistry};
pub use response::{
    HttpAspect, MonitorResponse, RawHttpResponse, ResponseCookie, ResponseDetails,
    ResponseRecorder, ResponseStatus,
};

/// Discriminator selecting the configuration variant of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Http,
    Ping,
}

impl MonitorKind {
    pub const ALL: [MonitorKind; 2] = [MonitorKind::Http, MonitorKind::Ping];

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::Http => "http",
            MonitorKind::Ping => "ping",
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(DecodeError::MissingKind),
            "http" => Ok(MonitorKind::Http),
            "ping" => Ok(MonitorKind::Ping),
            other => Err(DecodeError::UnknownKind(other.to_string())),
        }
    }
}

/// Per-kind check parameters. Serialized without a tag: the envelope carries
/// the discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MonitorConfig {
    Http(HttpCheckConfig),
    Ping(PingCheckConfig),
}

impl MonitorConfig {
    pub fn kind(&self) -> MonitorKind {
        match self {
            MonitorConfig::Http(_) => MonitorKind::Http,
            MonitorConfig::Ping(_) => MonitorKind::Ping,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            MonitorConfig::Http(config) => config.validate().map_err(ValidationError::from),
            MonitorConfig::Ping(config) => config.validate().map_err(ValidationError::from),
        }
    }
}

impl From<HttpCheckConfig> for MonitorConfig {
    fn from(config: HttpCheckConfig) -> Self {
        MonitorConfig::Http(config)
    }
}

impl From<PingCheckConfig> for MonitorConfig {
    fn from(config: PingCheckConfig) -> Self {
        MonitorConfig::Ping(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("monitor name cannot be empty")]
    EmptyName,

    #[error("monitor interval must be greater than zero, got {0}")]
    NonPositiveInterval(i64),

    #[error("monitor id cannot be empty")]
    EmptyId,

    #[error("monitor group id cannot be empty")]
    EmptyGroupId,

    #[error("HTTP monitor config validation failed: {0}")]
    Http(#[from] HttpConfigError),

    #[error("ping monitor config validation failed: {0}")]
    Ping(#[from] PingConfigError),
}

/// A configured, periodically executed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monitor {
    /// Stable identifier derived from the name on creation.
    pub id: String,
    pub name: String,
    pub description: String,
    /// Seconds between two runs.
    pub interval: i64,
    pub team_id: String,
    pub group_id: String,
    pub config: MonitorConfig,
}

impl Monitor {
    pub fn new(
        name: impl Into<String>,
        interval: i64,
        group_id: impl Into<String>,
        config: impl Into<MonitorConfig>,
    ) -> Self {
        let name = name.into();
        Self {
            id: display_id_from(&name),
            name,
            description: String::new(),
            interval,
            team_id: String::new(),
            group_id: group_id.into(),
            config: config.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = team_id.into();
        self
    }

    pub fn kind(&self) -> MonitorKind {
        self.config.kind()
    }

    /// The run interval, `None` when the configured value is not positive.
    pub fn interval(&self) -> Option<Duration> {
        u64::try_from(self.interval)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Checks the envelope fields, then the variant. A failing envelope check
    /// is reported without looking at the variant.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.interval <= 0 {
            return Err(ValidationError::NonPositiveInterval(self.interval));
        }
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if self.group_id.is_empty() {
            return Err(ValidationError::EmptyGroupId);
        }
        self.config.validate()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MonitorWire<'a> {
    id: &'a str,
    kind: MonitorKind,
    name: &'a str,
    description: &'a str,
    interval: i64,
    team_id: &'a str,
    group_id: &'a str,
    config: &'a MonitorConfig,
}

impl Serialize for Monitor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MonitorWire {
            id: &self.id,
            kind: self.kind(),
            name: &self.name,
            description: &self.description,
            interval: self.interval,
            team_id: &self.team_id,
            group_id: &self.group_id,
            config: &self.config,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Monitor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        MonitorRegistry::builtin()
            .decode_value(value)
            .map_err(serde::de::Error::custom)
    }
}

/// Decodes a monitor with the built-in registry.
pub fn decode(bytes: &[u8]) -> Result<Monitor, DecodeError> {
    MonitorRegistry::builtin().decode(bytes)
}

/// Decodes only the variant of a monitor whose envelope is already known.
pub fn decode_config(kind: &str, bytes: &[u8]) -> Result<MonitorConfig, DecodeError> {
    MonitorRegistry::builtin().decode_config(kind, bytes)
}
