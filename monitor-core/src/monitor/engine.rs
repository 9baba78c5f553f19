use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::http::{HttpClient, ReqwestClient};
use super::ping::{NetProber, Prober};
use super::response::{MonitorResponse, ResponseRecorder};
use super::{Monitor, MonitorConfig};
use crate::config::ChecksConfig;
use crate::Result;

pub const DEFAULT_USER_AGENT: &str = concat!("monitor/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Executes monitors against the network through pluggable transports.
#[derive(Clone)]
pub struct CheckEngine {
    http: Arc<dyn HttpClient>,
    prober: Arc<dyn Prober>,
    user_agent: String,
    retry_delay: Duration,
}

impl CheckEngine {
    pub fn new(http: Arc<dyn HttpClient>, prober: Arc<dyn Prober>) -> Self {
        Self {
            http,
            prober,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Engine over the real network, tuned by the `checks` config section.
    pub fn from_config(config: &ChecksConfig) -> Result<Self> {
        let http = ReqwestClient::new(config.http_timeout())?;
        Ok(Self::new(Arc::new(http), Arc::new(NetProber))
            .with_user_agent(config.user_agent.clone())
            .with_retry_delay(config.ping_retry_delay()))
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Runs one check. Monitors that fail validation are not executed and
    /// yield an error response carrying the validation message.
    pub async fn run(&self, monitor: &Monitor) -> MonitorResponse {
        if let Err(err) = monitor.validate() {
            warn!(monitor_id = %monitor.id, error = %err, "refusing to run invalid monitor");
            let mut recorder = ResponseRecorder::new(monitor.kind());
            recorder.add_error(err.to_string());
            return recorder.finish();
        }

        debug!(monitor_id = %monitor.id, kind = %monitor.kind(), "running check");
        let response = match &monitor.config {
            MonitorConfig::Http(config) => config.run(self.http.as_ref(), &self.user_agent).await,
            MonitorConfig::Ping(config) => config.run(self.prober.as_ref(), self.retry_delay).await,
        };
        debug!(
            monitor_id = %monitor.id,
            status = %response.status(),
            duration_ms = response.duration_ms(),
            "check finished"
        );
        response
    }

    /// Like [`run`](Self::run), abandoning the check when `token` fires.
    pub async fn run_until_cancelled(
        &self,
        monitor: &Monitor,
        token: &CancellationToken,
    ) -> Option<MonitorResponse> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(monitor_id = %monitor.id, "check cancelled");
                None
            }
            response = self.run(monitor) => Some(response),
        }
    }
}

impl std::fmt::Debug for CheckEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckEngine")
            .field("user_agent", &self.user_agent)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::fixtures::*;
    use crate::monitor::{
        HttpRequest, HttpResponse, MonitorKind, Protocol, ResponseStatus, TransportError,
    };
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use std::io;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingClient {
        user_agents: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn execute(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
            let agent = request
                .headers
                .iter()
                .find(|(name, _)| name == "User-Agent")
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            self.user_agents.lock().unwrap().push(agent);
            Ok(HttpResponse {
                elapsed: Duration::from_millis(1),
                status: 200,
                version: "HTTP/1.1".to_string(),
                headers: HeaderMap::new(),
                content_length: None,
                body: Vec::new(),
            })
        }
    }

    /// Never completes a probe.
    struct HangingProber;

    #[async_trait]
    impl Prober for HangingProber {
        async fn probe(&self, _: Protocol, _: &str, _: Duration) -> io::Result<Duration> {
            std::future::pending().await
        }
    }

    fn engine(client: Arc<RecordingClient>) -> CheckEngine {
        CheckEngine::new(client, Arc::new(HangingProber)).with_user_agent("monitor/test")
    }

    #[tokio::test]
    async fn dispatches_on_kind() {
        let client = Arc::new(RecordingClient::default());

        let response = engine(client.clone()).run(&http_monitor()).await;

        assert_eq!(response.kind(), MonitorKind::Http);
        assert_eq!(response.status(), ResponseStatus::Success);
        assert_eq!(*client.user_agents.lock().unwrap(), ["monitor/test"]);
    }

    #[tokio::test]
    async fn invalid_monitor_is_not_executed() {
        let client = Arc::new(RecordingClient::default());
        let mut monitor = http_monitor();
        monitor.interval = -5;

        let response = engine(client.clone()).run(&monitor).await;

        assert_eq!(response.status(), ResponseStatus::Error);
        assert_eq!(
            response.errors(),
            ["monitor interval must be greater than zero, got -5".to_string()]
        );
        assert!(client.user_agents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_abandons_the_check() {
        let engine = engine(Arc::new(RecordingClient::default()));
        let token = CancellationToken::new();
        let monitor = ping_monitor();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        assert_eq!(engine.run_until_cancelled(&monitor, &token).await, None);
    }

    #[tokio::test]
    async fn completed_check_is_returned_when_not_cancelled() {
        let engine = engine(Arc::new(RecordingClient::default()));
        let token = CancellationToken::new();

        let response = engine.run_until_cancelled(&http_monitor(), &token).await;
        assert!(response.is_some_and(|r| r.is_success()));
    }

    #[test]
    fn from_config_uses_checks_section() {
        let config = crate::Config::defaults().unwrap();
        let engine = CheckEngine::from_config(&config.checks).unwrap();

        assert_eq!(engine.retry_delay, Duration::from_secs(1));
        assert!(engine.user_agent.starts_with("monitor/"));
    }
}
