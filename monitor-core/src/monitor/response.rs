//! The outcome of a single check execution and the recorder that builds it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::MonitorKind;

/// Outcome classification. The ordering is the precedence: once a response
/// reached a status it never goes back to a lower one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    #[default]
    Success,
    Failure,
    Error,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Success => "success",
            ResponseStatus::Failure => "failure",
            ResponseStatus::Error => "error",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Part of an HTTP exchange that did not meet expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpAspect {
    StatusCode,
    ResponseTime,
    Headers,
    Body,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCookie {
    pub name: String,
    pub value: String,
}

/// Snapshot of what the server answered. Headers and body are only kept when
/// the monitor asks for them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHttpResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    pub proto: String,
    #[serde(default)]
    pub cookies: Vec<ResponseCookie>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResponseDetails {
    #[serde(rename_all = "camelCase")]
    Http {
        failed_aspects: Vec<HttpAspect>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_response: Option<RawHttpResponse>,
    },
    Ping {
        tries: u32,
    },
}

/// Immutable result of one check execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResponse {
    status: ResponseStatus,
    /// Milliseconds.
    duration: u64,
    /// Unix seconds at which the execution started.
    timestamp: i64,
    errors: Vec<String>,
    failures: Vec<String>,
    #[serde(flatten)]
    details: ResponseDetails,
}

impl MonitorResponse {
    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration)
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn details(&self) -> &ResponseDetails {
        &self.details
    }

    pub fn kind(&self) -> MonitorKind {
        match self.details {
            ResponseDetails::Http { .. } => MonitorKind::Http,
            ResponseDetails::Ping { .. } => MonitorKind::Ping,
        }
    }

    /// Empty for ping responses.
    pub fn failed_aspects(&self) -> &[HttpAspect] {
        match &self.details {
            ResponseDetails::Http { failed_aspects, .. } => failed_aspects,
            ResponseDetails::Ping { .. } => &[],
        }
    }

    pub fn raw_response(&self) -> Option<&RawHttpResponse> {
        match &self.details {
            ResponseDetails::Http { raw_response, .. } => raw_response.as_ref(),
            ResponseDetails::Ping { .. } => None,
        }
    }

    /// Number of probe attempts, `None` for HTTP responses.
    pub fn tries(&self) -> Option<u32> {
        match self.details {
            ResponseDetails::Ping { tries } => Some(tries),
            ResponseDetails::Http { .. } => None,
        }
    }
}

/// Mutable builder owned by a single execution. [`finish`](Self::finish)
/// hands out the read-only [`MonitorResponse`].
#[derive(Debug)]
pub struct ResponseRecorder {
    response: MonitorResponse,
}

impl ResponseRecorder {
    pub fn new(kind: MonitorKind) -> Self {
        let details = match kind {
            MonitorKind::Http => ResponseDetails::Http {
                failed_aspects: Vec::new(),
                raw_response: None,
            },
            MonitorKind::Ping => ResponseDetails::Ping { tries: 0 },
        };
        Self {
            response: MonitorResponse {
                status: ResponseStatus::Success,
                duration: 0,
                timestamp: Utc::now().timestamp(),
                errors: Vec::new(),
                failures: Vec::new(),
                details,
            },
        }
    }

    pub fn status(&self) -> ResponseStatus {
        self.response.status
    }

    /// The check could not be carried out.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.response.errors.push(message.into());
        self.escalate(ResponseStatus::Error);
    }

    /// The target answered but did not meet expectations.
    pub fn add_failure(&mut self, message: impl Into<String>) {
        self.response.failures.push(message.into());
        self.escalate(ResponseStatus::Failure);
    }

    /// Marks an aspect as failed; each aspect appears at most once. No-op on
    /// the status of ping responses.
    pub fn add_failed_aspect(&mut self, aspect: HttpAspect) {
        if let ResponseDetails::Http { failed_aspects, .. } = &mut self.response.details {
            if !failed_aspects.contains(&aspect) {
                failed_aspects.push(aspect);
            }
            self.escalate(ResponseStatus::Failure);
        }
    }

    pub fn record_try(&mut self) {
        if let ResponseDetails::Ping { tries } = &mut self.response.details {
            *tries += 1;
        }
    }

    pub fn set_duration(&mut self, elapsed: Duration) {
        self.response.duration = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn set_raw_response(&mut self, raw: RawHttpResponse) {
        if let ResponseDetails::Http { raw_response, .. } = &mut self.response.details {
            *raw_response = Some(raw);
        }
    }

    pub fn finish(self) -> MonitorResponse {
        self.response
    }

    fn escalate(&mut self, status: ResponseStatus) {
        self.response.status = self.response.status.max(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fresh_recorder_is_success() {
        let response = ResponseRecorder::new(MonitorKind::Ping).finish();

        assert_eq!(response.status(), ResponseStatus::Success);
        assert!(response.errors().is_empty());
        assert!(response.failures().is_empty());
        assert_eq!(response.tries(), Some(0));
        assert!(response.timestamp() > 0);
    }

    #[test]
    fn error_is_never_downgraded() {
        let mut recorder = ResponseRecorder::new(MonitorKind::Http);
        recorder.add_error("boom");
        recorder.add_failure("late failure");
        recorder.add_failed_aspect(HttpAspect::Body);

        let response = recorder.finish();
        assert_eq!(response.status(), ResponseStatus::Error);
        assert_eq!(response.failures(), ["late failure".to_string()]);
    }

    #[test]
    fn failed_aspects_are_deduplicated_in_order() {
        let mut recorder = ResponseRecorder::new(MonitorKind::Http);
        recorder.add_failed_aspect(HttpAspect::Headers);
        recorder.add_failed_aspect(HttpAspect::StatusCode);
        recorder.add_failed_aspect(HttpAspect::Headers);

        let response = recorder.finish();
        assert_eq!(response.status(), ResponseStatus::Failure);
        assert_eq!(
            response.failed_aspects(),
            [HttpAspect::Headers, HttpAspect::StatusCode]
        );
    }

    #[test]
    fn tries_only_count_for_ping() {
        let mut recorder = ResponseRecorder::new(MonitorKind::Http);
        recorder.record_try();
        assert_eq!(recorder.finish().tries(), None);

        let mut recorder = ResponseRecorder::new(MonitorKind::Ping);
        recorder.record_try();
        recorder.record_try();
        assert_eq!(recorder.finish().tries(), Some(2));
    }

    #[test]
    fn serializes_flat_with_kind_tag() {
        let mut recorder = ResponseRecorder::new(MonitorKind::Http);
        recorder.set_duration(Duration::from_millis(42));
        recorder.add_failed_aspect(HttpAspect::StatusCode);
        recorder.set_raw_response(RawHttpResponse {
            status_code: 503,
            proto: "HTTP/1.1".to_string(),
            ..RawHttpResponse::default()
        });

        let value = serde_json::to_value(recorder.finish()).unwrap();
        assert_eq!(value["kind"], "http");
        assert_eq!(value["status"], "failure");
        assert_eq!(value["duration"], 42);
        assert_eq!(value["failedAspects"], serde_json::json!(["StatusCode"]));
        assert_eq!(value["rawResponse"]["statusCode"], 503);
    }

    proptest! {
        #[test]
        fn final_status_follows_precedence(ops in proptest::collection::vec(any::<bool>(), 0..32)) {
            let mut recorder = ResponseRecorder::new(MonitorKind::Ping);
            for is_error in &ops {
                if *is_error {
                    recorder.add_error("error");
                } else {
                    recorder.add_failure("failure");
                }
            }

            let expected = if ops.iter().any(|is_error| *is_error) {
                ResponseStatus::Error
            } else if !ops.is_empty() {
                ResponseStatus::Failure
            } else {
                ResponseStatus::Success
            };

            let response = recorder.finish();
            prop_assert_eq!(response.status(), expected);
            prop_assert_eq!(response.errors().len() + response.failures().len(), ops.len());
        }
    }
}
