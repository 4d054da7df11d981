//! Construction and shutdown of the per-metric runners

use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

use crate::config::MetricSpec;
use crate::error::{AgentError, Result};
use crate::runner::Runner;
use crate::transport::MetricSink;
use crate::version::Version;

/// Owns the shared metric sink and the set of active runners
pub struct Supervisor {
    version: Version,
    sink: Arc<dyn MetricSink>,
    runners: Vec<Arc<Runner>>,
}

impl Supervisor {
    pub fn new(version: Version, sink: Arc<dyn MetricSink>) -> Self {
        Self {
            version,
            sink,
            runners: Vec::new(),
        }
    }

    /// Construct and start one runner per enabled configured metric
    pub fn start_all(&mut self, metrics: &[MetricSpec]) {
        for metric in metrics {
            if !metric.enabled {
                info!("skipping runner for {}", metric.name);
                continue;
            }

            let runner = Arc::new(Runner::new(
                metric.clone(),
                self.version.clone(),
                Arc::clone(&self.sink),
            ));
            Arc::clone(&runner).start();
            self.runners.push(runner);
        }

        info!("started {} runners", self.runners.len());
    }

    /// The currently active runners
    pub fn runners(&self) -> &[Arc<Runner>] {
        &self.runners
    }

    /// Stop every runner, attempting the rest even when one fails, and
    /// fold any failures into a single error
    pub async fn stop_all(&self, deadline: Duration) -> Result<()> {
        let mut has_error = false;

        info!("stopping {} runners", self.runners.len());
        for runner in &self.runners {
            info!("stopping runner for {}", runner.metric().name);
            if let Err(err) = runner.stop(deadline).await {
                error!("error stopping runner for {}: {}", runner.metric().name, err);
                has_error = true;
            }
        }

        if has_error {
            return Err(AgentError::Timeout(
                "error attempting to cleanly stop all runners".to_string(),
            ));
        }

        Ok(())
    }
}
