//! HTTP checks: issue one request and compare the answer with the
//! configured expectations.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use reqwest::Method;
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::MonitorKind;
use super::response::{
    HttpAspect, MonitorResponse, RawHttpResponse, ResponseCookie, ResponseRecorder,
};

pub const HTTP_METHODS: [&str; 6] = ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS"];

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpCheckConfig {
    #[serde(rename = "httpMethod")]
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub save_response_body: bool,
    pub save_response_headers: bool,
    pub expected_status_codes: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_body_regex: Option<String>,
    pub expected_headers: HashMap<String, String>,
    /// Upper bound in milliseconds.
    #[serde(rename = "expectedResponseTime", skip_serializing_if = "Option::is_none")]
    pub expected_response_time_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpConfigError {
    #[error("URL cannot be empty")]
    EmptyUrl,

    #[error("HTTP method cannot be empty")]
    EmptyMethod,

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("expected status codes cannot be empty")]
    EmptyStatusCodes,

    #[error("invalid expected status code: {0}")]
    StatusCodeOutOfRange(i64),

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("expected response time cannot be negative, got {0}")]
    NegativeResponseTime(i64),

    #[error("invalid expected body regex {pattern}: {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

/// `.` also matches newlines so a pattern can span a multi-line body.
fn body_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).dot_matches_new_line(true).build()
}

impl HttpCheckConfig {
    pub fn validate(&self) -> Result<(), HttpConfigError> {
        if self.url.trim().is_empty() {
            return Err(HttpConfigError::EmptyUrl);
        }
        if self.method.is_empty() {
            return Err(HttpConfigError::EmptyMethod);
        }
        if !HTTP_METHODS.contains(&self.method.as_str()) {
            return Err(HttpConfigError::InvalidMethod(self.method.clone()));
        }
        if self.expected_status_codes.is_empty() {
            return Err(HttpConfigError::EmptyStatusCodes);
        }
        if let Some(code) = self
            .expected_status_codes
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(HttpConfigError::StatusCodeOutOfRange(*code));
        }

        let url = Url::parse(&self.url).map_err(|err| HttpConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: err.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(HttpConfigError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(HttpConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: "missing host".to_string(),
            });
        }

        if let Some(limit) = self.expected_response_time_ms.filter(|limit| *limit < 0) {
            return Err(HttpConfigError::NegativeResponseTime(limit));
        }

        if let Some(pattern) = self.body_pattern() {
            body_regex(pattern).map_err(|err| HttpConfigError::InvalidRegex {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }

    fn body_pattern(&self) -> Option<&str> {
        self.expected_body_regex.as_deref().filter(|p| !p.is_empty())
    }

    /// Sends the configured request and evaluates every expectation. A
    /// transport failure is an error and ends the check; otherwise status
    /// code, response time, headers and body are all evaluated.
    pub async fn run(&self, client: &dyn HttpClient, user_agent: &str) -> MonitorResponse {
        let mut recorder = ResponseRecorder::new(MonitorKind::Http);

        let request = match self.build_request(user_agent) {
            Ok(request) => request,
            Err(err) => {
                recorder.add_error(format!("HTTP request failed: {err}"));
                return recorder.finish();
            }
        };

        let started = Instant::now();
        let response = match client.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                recorder.set_duration(started.elapsed());
                warn!(url = %self.url, error = %err, "HTTP check transport failure");
                recorder.add_error(format!("HTTP request failed: {err}"));
                return recorder.finish();
            }
        };
        debug!(url = %self.url, status = response.status, elapsed_ms = response.elapsed.as_millis() as u64, "HTTP check answered");

        recorder.set_duration(response.elapsed);
        recorder.set_raw_response(self.snapshot(&response));
        self.check_status_code(&response, &mut recorder);
        self.check_response_time(response.elapsed, &mut recorder);
        self.check_headers(&response, &mut recorder);
        self.check_body(&response, &mut recorder);

        recorder.finish()
    }

    fn build_request(&self, user_agent: &str) -> Result<HttpRequest, TransportError> {
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
        let url = Url::parse(&self.url)
            .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;

        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("user-agent"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        headers.push(("User-Agent".to_string(), user_agent.to_string()));

        Ok(HttpRequest {
            method,
            url,
            headers,
            body: (!self.body.is_empty()).then(|| self.body.clone()),
        })
    }

    fn snapshot(&self, response: &HttpResponse) -> RawHttpResponse {
        RawHttpResponse {
            status_code: response.status,
            headers: self
                .save_response_headers
                .then(|| joined_headers(&response.headers)),
            body: self
                .save_response_body
                .then(|| response.body_text().into_owned()),
            content_length: response.content_length,
            proto: response.version.clone(),
            cookies: parse_cookies(&response.headers),
        }
    }

    fn check_status_code(&self, response: &HttpResponse, recorder: &mut ResponseRecorder) {
        if !self
            .expected_status_codes
            .contains(&i64::from(response.status))
        {
            recorder.add_failure(format!(
                "Unexpected status code: got {}, expected one of {:?}",
                response.status, self.expected_status_codes
            ));
            recorder.add_failed_aspect(HttpAspect::StatusCode);
        }
    }

    fn check_response_time(&self, elapsed: Duration, recorder: &mut ResponseRecorder) {
        let Some(limit) = self.expected_response_time_ms else {
            return;
        };
        let elapsed_ms = elapsed.as_millis();
        if elapsed_ms > u128::try_from(limit).unwrap_or(0) {
            recorder.add_failure(format!(
                "Response time exceeded: got {elapsed_ms}ms, expected <= {limit}ms"
            ));
            recorder.add_failed_aspect(HttpAspect::ResponseTime);
        }
    }

    fn check_headers(&self, response: &HttpResponse, recorder: &mut ResponseRecorder) {
        let expected: BTreeMap<_, _> = self.expected_headers.iter().collect();
        for (name, value) in expected {
            let actual = response
                .headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if actual != value {
                recorder.add_failure(format!(
                    "Header mismatch for {name}: got {actual}, expected {value}"
                ));
                recorder.add_failed_aspect(HttpAspect::Headers);
            }
        }
    }

    fn check_body(&self, response: &HttpResponse, recorder: &mut ResponseRecorder) {
        let Some(pattern) = self.body_pattern() else {
            return;
        };
        match body_regex(pattern) {
            Ok(regex) => {
                if !regex.is_match(&response.body_text()) {
                    recorder.add_failure(format!("Response body does not match regex: {pattern}"));
                    recorder.add_failed_aspect(HttpAspect::Body);
                }
            }
            Err(err) => {
                recorder.add_error(format!("Invalid regex for expected body: {pattern}: {err}"));
            }
        }
    }
}

/// All values of a header joined with `", "`, keyed by lowercase name.
fn joined_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .keys()
        .map(|name| {
            let values: Vec<&str> = headers
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .collect();
            (name.as_str().to_string(), values.join(", "))
        })
        .collect()
}

fn parse_cookies(headers: &HeaderMap) -> Vec<ResponseCookie> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| {
            let pair = raw.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| ResponseCookie {
                name: name.to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// A fully read response. The body is buffered once so it can be both
/// inspected and stored.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Time until the status line and headers arrived, excluding the body.
    pub elapsed: Duration,
    pub status: u16,
    pub version: String,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Client(#[from] reqwest::Error),

    #[error("{0}")]
    Unavailable(String),
}

/// Performs HTTP exchanges on behalf of the check engine.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.request(request.method, request.url);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let started = Instant::now();
        let response = builder.send().await?;
        let elapsed = started.elapsed();
        let status = response.status().as_u16();
        let version = format!("{:?}", response.version());
        let headers = response.headers().clone();
        let content_length = response.content_length();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            elapsed,
            status,
            version,
            headers,
            content_length,
            body,
        })
    }
}
