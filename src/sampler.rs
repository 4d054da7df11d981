//! Sampler strategies: how one sampling cycle produces its measurements

use async_trait::async_trait;
use log::info;
use std::time::Instant;

use crate::config::{MetricKind, MetricSpec};
use crate::error::{AgentError, Result};
use crate::version::Version;

/// One labelled measurement produced by a sampling cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Optional path suffix, e.g. "elapsed" or "status-code"
    pub suffix: Option<&'static str>,
    /// Measured value
    pub value: f64,
}

impl Measurement {
    pub fn new(value: f64) -> Self {
        Self {
            suffix: None,
            value,
        }
    }

    pub fn with_suffix(suffix: &'static str, value: f64) -> Self {
        Self {
            suffix: Some(suffix),
            value,
        }
    }
}

/// A strategy that produces a labelled measurement set for one metric
#[async_trait]
pub trait Sampler: Send + Sync {
    /// Run one sampling cycle
    async fn sample(&self) -> Result<Vec<Measurement>>;
}

/// Samples the build number of the running agent
///
/// Deterministic and side-effect free; dev builds report the half-step
/// offset value (see [`Version::sample_value`]).
pub struct BuildNumberSampler {
    version: Version,
}

impl BuildNumberSampler {
    pub fn new(version: Version) -> Self {
        Self { version }
    }
}

#[async_trait]
impl Sampler for BuildNumberSampler {
    async fn sample(&self) -> Result<Vec<Measurement>> {
        Ok(vec![Measurement::new(self.version.sample_value())])
    }
}

/// Probes an HTTP endpoint, measuring latency and status code
pub struct HttpProbeSampler {
    method: String,
    url: String,
    client: reqwest::Client,
}

impl HttpProbeSampler {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Sampler for HttpProbeSampler {
    async fn sample(&self) -> Result<Vec<Measurement>> {
        // For the moment we only support GETs
        if self.method != "GET" {
            return Err(AgentError::Collection(format!(
                "method {} is currently not supported",
                self.method
            )));
        }

        // Latency covers request start to response headers received
        let start = Instant::now();
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AgentError::Collection(format!("probe of {} failed: {}", self.url, e)))?;
        let elapsed = start.elapsed();

        let status_code = response.status().as_u16();

        // Read the whole body so the exchange completes cleanly
        response.bytes().await.map_err(|e| {
            AgentError::Collection(format!("reading body from {} failed: {}", self.url, e))
        })?;

        let elapsed_ms = elapsed.as_micros() as f64 / 1000.0;
        info!(
            "{} {} - Elapsed: {:.3}ms, Status Code: {}",
            self.method, self.url, elapsed_ms, status_code
        );

        Ok(vec![
            Measurement::with_suffix("elapsed", elapsed_ms),
            Measurement::with_suffix("status-code", f64::from(status_code)),
        ])
    }
}

impl std::fmt::Debug for dyn Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Sampler")
    }
}

/// Resolve the sampler strategy for a metric definition
///
/// Unsupported kinds are reported here, once per cycle, rather than being
/// rejected at configuration-load time.
pub fn sampler_for(metric: &MetricSpec, version: &Version) -> Result<Box<dyn Sampler>> {
    match &metric.kind {
        MetricKind::BuildNumber => Ok(Box::new(BuildNumberSampler::new(version.clone()))),
        MetricKind::Http => Ok(Box::new(HttpProbeSampler::new(
            metric.method.clone(),
            metric.url.clone(),
        ))),
        MetricKind::Unsupported(kind) => Err(AgentError::Config(format!(
            "could not sample {} as {} is an unsupported type",
            metric.name, kind
        ))),
    }
}
