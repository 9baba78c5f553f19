use serde::{Deserialize, Serialize};

use super::Monitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorEventKind {
    Created,
    Edited,
    Deleted,
    Started,
    Stopped,
}

impl MonitorEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorEventKind::Created => "created",
            MonitorEventKind::Edited => "edited",
            MonitorEventKind::Deleted => "deleted",
            MonitorEventKind::Started => "started",
            MonitorEventKind::Stopped => "stopped",
        }
    }
}

/// Lifecycle notification published to event subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorEvent {
    pub id: String,
    pub team_id: String,
    pub status: MonitorEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor: Option<Monitor>,
}

impl MonitorEvent {
    fn with_monitor(monitor: &Monitor, status: MonitorEventKind) -> Self {
        Self {
            id: monitor.id.clone(),
            team_id: monitor.team_id.clone(),
            status,
            monitor: Some(monitor.clone()),
        }
    }

    pub fn created(monitor: &Monitor) -> Self {
        Self::with_monitor(monitor, MonitorEventKind::Created)
    }

    pub fn edited(monitor: &Monitor) -> Self {
        Self::with_monitor(monitor, MonitorEventKind::Edited)
    }

    /// Deletions only carry the identity of the removed monitor.
    pub fn deleted(id: impl Into<String>, team_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            team_id: team_id.into(),
            status: MonitorEventKind::Deleted,
            monitor: None,
        }
    }

    pub fn started(monitor: &Monitor) -> Self {
        Self::with_monitor(monitor, MonitorEventKind::Started)
    }

    pub fn stopped(monitor: &Monitor) -> Self {
        Self::with_monitor(monitor, MonitorEventKind::Stopped)
    }
}
