//! Delivery of samples to the collector over its line-oriented TCP protocol

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::CollectorConfig;
use crate::error::{AgentError, Result};

/// How long a single connection attempt to the collector may take
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Destination for samples produced by runners
///
/// Delivery is fire-and-forget: implementations never surface an error to
/// the caller, they log and drop instead.
#[async_trait]
pub trait MetricSink: Send + Sync + 'static {
    /// Send one sample for the given metric path
    async fn write(&self, path: &str, value: f64);
}

/// Transport speaking the Carbon plaintext protocol over a single shared
/// TCP session
///
/// The session is guarded by a mutex so concurrent runners cannot race the
/// check/reconnect/resend sequence. An absent session means the collector
/// is disabled or has been down since startup; writes are then no-ops.
pub struct CarbonTransport {
    config: CollectorConfig,
    prefix: String,
    session: Mutex<Option<TcpStream>>,
}

impl CarbonTransport {
    /// Create a transport with no session established yet
    pub fn new(config: CollectorConfig, prefix: impl Into<String>) -> Self {
        Self {
            config,
            prefix: prefix.into(),
            session: Mutex::new(None),
        }
    }

    /// Establish the initial session. Disabled transports stay
    /// unconnected and silently drop everything written to them.
    pub async fn connect(&self) -> Result<()> {
        if !self.config.enabled {
            debug!("collector reporting is disabled, samples will be dropped");
            return Ok(());
        }

        let stream = Self::dial(&self.config).await?;
        *self.session.lock().await = Some(stream);
        info!(
            "connected to collector at {}:{}",
            self.config.host, self.config.port
        );
        Ok(())
    }

    async fn dial(config: &CollectorConfig) -> Result<TcpStream> {
        let address = format!("{}:{}", config.host, config.port);
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| AgentError::Timeout(format!("connection to {} timed out", address)))?
            .map_err(|e| {
                AgentError::Connection(format!("could not connect to {}: {}", address, e))
            })?;
        Ok(stream)
    }

    async fn send(stream: &mut TcpStream, line: &str) -> std::io::Result<()> {
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await
    }
}

#[async_trait]
impl MetricSink for CarbonTransport {
    async fn write(&self, path: &str, value: f64) {
        // Timestamp is captured at send time, not sample time
        let timestamp = Utc::now().timestamp();
        let line = format!("{}.{} {} {}\n", self.prefix, path, value, timestamp);

        let mut session = self.session.lock().await;
        let Some(stream) = session.as_mut() else {
            // Disabled, or down since startup
            return;
        };

        if self.config.verbose {
            debug!("sending {}", line.trim_end());
        }

        let Err(err) = Self::send(stream, &line).await else {
            return;
        };

        // One reconnect, one resend, then the sample is dropped. Late data
        // points are worth less than an unbounded client-side queue.
        warn!("error sending metric from transport: {}", err);
        info!(
            "attempting to reconnect to {}:{}...",
            self.config.host, self.config.port
        );
        let mut fresh = match Self::dial(&self.config).await {
            Ok(stream) => stream,
            Err(conn_err) => {
                // Keep the broken session; the next write retries the
                // same sequence
                warn!(
                    "reconnect to {}:{} failed: {} (dropping metric for {})",
                    self.config.host, self.config.port, conn_err, path
                );
                return;
            }
        };

        info!(
            "connection to {}:{} reestablished, resending metric for {}",
            self.config.host, self.config.port, path
        );
        let resent = Self::send(&mut fresh, &line).await;

        // The new session replaces the broken one for all subsequent
        // writes, whether or not the resend went through
        *session = Some(fresh);

        if let Err(err) = resent {
            warn!(
                "error resending metric from transport: {} (dropping metric for {})",
                err, path
            );
        }
    }
}
