//! Reachability checks: open a TCP connection or a connected UDP socket to
//! `host:port`, retrying a bounded number of times.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tracing::{debug, warn};

use super::MonitorKind;
use super::response::{MonitorResponse, ResponseRecorder};

const MAX_TIMEOUT_SECS: i64 = 60;
pub const MAX_RETRY_COUNT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Tcp4,
    Tcp6,
    Udp4,
    Udp6,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Tcp4 => "tcp4",
            Protocol::Tcp6 => "tcp6",
            Protocol::Udp4 => "udp4",
            Protocol::Udp6 => "udp6",
        }
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Tcp4 | Protocol::Tcp6)
    }

    /// Whether `addr` belongs to the address family this protocol is pinned to.
    pub fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Protocol::Tcp | Protocol::Udp => true,
            Protocol::Tcp4 | Protocol::Udp4 => addr.is_ipv4(),
            Protocol::Tcp6 | Protocol::Udp6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = PingConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "tcp4" => Ok(Protocol::Tcp4),
            "tcp6" => Ok(Protocol::Tcp6),
            "udp4" => Ok(Protocol::Udp4),
            "udp6" => Ok(Protocol::Udp6),
            other => Err(PingConfigError::InvalidProtocol(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PingCheckConfig {
    pub host: String,
    pub port: String,
    pub protocol: String,
    /// Per-attempt timeout in seconds.
    #[serde(rename = "timeout")]
    pub timeout_secs: i64,
    pub retry_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PingConfigError {
    #[error("host cannot be empty")]
    EmptyHost,

    #[error("port cannot be empty")]
    EmptyPort,

    #[error("retry count must be greater than zero, got {0}")]
    NonPositiveRetryCount(i64),

    #[error("retry count must not exceed 100, got {0}")]
    RetryCountTooLarge(i64),

    #[error("timeout must be between 1 and 60 seconds, got {0}")]
    TimeoutOutOfRange(i64),

    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),
}

impl PingCheckConfig {
    pub fn validate(&self) -> Result<(), PingConfigError> {
        if self.host.is_empty() {
            return Err(PingConfigError::EmptyHost);
        }
        if self.port.is_empty() {
            return Err(PingConfigError::EmptyPort);
        }
        if self.retry_count <= 0 {
            return Err(PingConfigError::NonPositiveRetryCount(self.retry_count));
        }
        if self.retry_count > MAX_RETRY_COUNT {
            return Err(PingConfigError::RetryCountTooLarge(self.retry_count));
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(PingConfigError::TimeoutOutOfRange(self.timeout_secs));
        }
        self.protocol.parse::<Protocol>().map(|_| ())
    }

    pub fn address(&self) -> String {
        join_host_port(&self.host, &self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.timeout_secs).unwrap_or(0))
    }

    /// Probes the target up to `retry_count` times, sleeping `retry_delay`
    /// between attempts. Unreachable targets are failures, never errors.
    pub async fn run(&self, prober: &dyn Prober, retry_delay: Duration) -> MonitorResponse {
        let mut recorder = ResponseRecorder::new(MonitorKind::Ping);
        let address = self.address();

        let protocol = match self.protocol.parse::<Protocol>() {
            Ok(protocol) => protocol,
            Err(err) => {
                recorder.add_error(err.to_string());
                return recorder.finish();
            }
        };

        let attempts = u32::try_from(self.retry_count.max(0)).unwrap_or(u32::MAX);
        for attempt in 1..=attempts {
            recorder.record_try();
            match prober.probe(protocol, &address, self.timeout()).await {
                Ok(elapsed) => {
                    debug!(%address, %protocol, attempt, elapsed_ms = elapsed.as_millis() as u64, "probe succeeded");
                    recorder.set_duration(elapsed);
                    return recorder.finish();
                }
                Err(err) => {
                    debug!(%address, %protocol, attempt, error = %err, "probe failed");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(retry_delay).await;
            }
        }

        warn!(%address, %protocol, tries = attempts, "target unreachable");
        recorder.add_failure(format!(
            "Failed to probe {address} after {} tries",
            self.retry_count
        ));
        recorder.finish()
    }
}

/// Joins host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: &str) -> String {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Establishes a single connection attempt and reports how long it took.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(
        &self,
        protocol: Protocol,
        address: &str,
        timeout: Duration,
    ) -> io::Result<Duration>;
}

/// Probes over the real network with tokio sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetProber;

impl NetProber {
    async fn connect(protocol: Protocol, address: &str) -> io::Result<()> {
        let candidates: Vec<SocketAddr> = lookup_host(address)
            .await?
            .filter(|addr| protocol.accepts(addr))
            .collect();
        if candidates.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no {protocol} address found for {address}"),
            ));
        }

        let mut last_err = None;
        for addr in candidates {
            let result = if protocol.is_tcp() {
                TcpStream::connect(addr).await.map(drop)
            } else {
                connect_udp(addr).await
            };
            match result {
                Ok(()) => return Ok(()),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::other(format!("could not reach {address}"))))
    }
}

async fn connect_udp(addr: SocketAddr) -> io::Result<()> {
    let local: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await
}

#[async_trait]
impl Prober for NetProber {
    async fn probe(
        &self,
        protocol: Protocol,
        address: &str,
        timeout: Duration,
    ) -> io::Result<Duration> {
        let started = Instant::now();
        tokio::time::timeout(timeout, Self::connect(protocol, address))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("probe of {address} timed out after {timeout:?}"),
                )
            })??;
        Ok(started.elapsed())
    }
}
