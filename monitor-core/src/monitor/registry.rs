use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

use super::{Monitor, MonitorConfig, MonitorKind};
use crate::models::display_id_from;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("monitor kind is missing")]
    MissingKind,

    #[error("unknown monitor kind: {0}")]
    UnknownKind(String),

    #[error("malformed monitor payload: {0}")]
    MalformedPayload(String),
}

impl DecodeError {
    fn malformed(err: impl std::fmt::Display) -> Self {
        DecodeError::MalformedPayload(err.to_string())
    }
}

/// Turns the raw `config` document of one kind into its typed variant.
pub type ConfigDecoder = fn(Value) -> Result<MonitorConfig, serde_json::Error>;

fn decode_http(value: Value) -> Result<MonitorConfig, serde_json::Error> {
    serde_json::from_value(value).map(MonitorConfig::Http)
}

fn decode_ping(value: Value) -> Result<MonitorConfig, serde_json::Error> {
    serde_json::from_value(value).map(MonitorConfig::Ping)
}

static BUILTIN: LazyLock<MonitorRegistry> = LazyLock::new(MonitorRegistry::with_builtin_kinds);

/// Envelope fields besides `kind` and `config`. Missing fields fall back to
/// empty values and are reported by validation instead.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Envelope {
    id: String,
    name: String,
    description: String,
    interval: i64,
    team_id: String,
    group_id: String,
}

/// Maps each monitor kind to the decoder of its configuration.
///
/// A registry is assembled once and then only read, so it can be shared
/// freely between tasks. Tests may build one with a subset of kinds.
#[derive(Debug, Clone, Default)]
pub struct MonitorRegistry {
    decoders: HashMap<MonitorKind, ConfigDecoder>,
}

impl MonitorRegistry {
    /// The process-wide registry holding every built-in kind.
    pub fn builtin() -> &'static MonitorRegistry {
        &BUILTIN
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_builtin_kinds() -> Self {
        Self::empty()
            .register(MonitorKind::Http, decode_http)
            .register(MonitorKind::Ping, decode_ping)
    }

    pub fn register(mut self, kind: MonitorKind, decoder: ConfigDecoder) -> Self {
        self.decoders.insert(kind, decoder);
        self
    }

    pub fn supports(&self, kind: MonitorKind) -> bool {
        self.decoders.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<MonitorKind> {
        let mut kinds: Vec<_> = self.decoders.keys().copied().collect();
        kinds.sort();
        kinds
    }

    fn resolve(&self, raw: &str) -> Result<MonitorKind, DecodeError> {
        let kind: MonitorKind = raw.parse()?;
        if self.supports(kind) {
            Ok(kind)
        } else {
            Err(DecodeError::UnknownKind(raw.to_string()))
        }
    }

    /// Decodes a full monitor document. The envelope is read first; the
    /// `config` sub-document is then handed to the decoder of its kind.
    pub fn decode(&self, bytes: &[u8]) -> Result<Monitor, DecodeError> {
        let value: Value = serde_json::from_slice(bytes).map_err(DecodeError::malformed)?;
        self.decode_value(value)
    }

    pub fn decode_value(&self, value: Value) -> Result<Monitor, DecodeError> {
        let Value::Object(mut fields) = value else {
            return Err(DecodeError::MalformedPayload(
                "monitor document must be a JSON object".to_string(),
            ));
        };

        let kind = match fields.remove("kind") {
            None | Some(Value::Null) => return Err(DecodeError::MissingKind),
            Some(Value::String(kind)) => self.resolve(&kind)?,
            Some(other) => return Err(DecodeError::UnknownKind(other.to_string())),
        };

        let config = match fields.remove("config") {
            None | Some(Value::Null) => {
                return Err(DecodeError::MalformedPayload(
                    "monitor config is missing".to_string(),
                ));
            }
            Some(config) => self.decode_kind(kind, config)?,
        };

        let envelope: Envelope =
            serde_json::from_value(Value::Object(fields)).map_err(DecodeError::malformed)?;

        let id = if envelope.id.is_empty() {
            display_id_from(&envelope.name)
        } else {
            envelope.id
        };

        Ok(Monitor {
            id,
            name: envelope.name,
            description: envelope.description,
            interval: envelope.interval,
            team_id: envelope.team_id,
            group_id: envelope.group_id,
            config,
        })
    }

    /// Decodes only a configuration document for a known kind, as stored
    /// alongside its envelope columns.
    pub fn decode_config(&self, kind: &str, bytes: &[u8]) -> Result<MonitorConfig, DecodeError> {
        let value: Value = serde_json::from_slice(bytes).map_err(DecodeError::malformed)?;
        self.decode_config_value(kind, value)
    }

    pub fn decode_config_value(
        &self,
        kind: &str,
        value: Value,
    ) -> Result<MonitorConfig, DecodeError> {
        let kind = self.resolve(kind)?;
        self.decode_kind(kind, value)
    }

    fn decode_kind(&self, kind: MonitorKind, value: Value) -> Result<MonitorConfig, DecodeError> {
        let decoder = self
            .decoders
            .get(&kind)
            .ok_or_else(|| DecodeError::UnknownKind(kind.to_string()))?;

        let config = decoder(value)
            .map_err(|err| DecodeError::MalformedPayload(format!("{kind} config: {err}")))?;

        if config.kind() != kind {
            return Err(DecodeError::MalformedPayload(format!(
                "decoder for {kind} produced a {} config",
                config.kind()
            )));
        }
        Ok(config)
    }
}
