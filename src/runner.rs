//! Per-metric sampling loop: staggered start, serialized cycles, bounded stop

use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

use crate::config::MetricSpec;
use crate::error::{AgentError, Result};
use crate::sampler;
use crate::transport::MetricSink;
use crate::version::Version;

/// Default deadline for a runner to finish its in-flight cycle on stop
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Startup jitter bounds: a uniform delay in [2, 12) seconds, so many
/// metrics (and many agent instances) starting together do not probe in
/// lockstep
const START_DELAY_MIN_SECS: f64 = 2.0;
const START_DELAY_SPREAD_SECS: f64 = 10.0;

/// Owns the sampling lifecycle of one configured metric
pub struct Runner {
    metric: MetricSpec,
    version: Version,
    sink: Arc<dyn MetricSink>,
    start_delay: Duration,
    stop_requested: Arc<AtomicBool>,
    /// Held for the duration of one sampling cycle. Cycles serialize on it
    /// even when the period is shorter than a cycle's execution time, and
    /// locking it from `stop` doubles as the completion signal for the
    /// in-flight cycle.
    cycle_guard: Arc<Mutex<()>>,
}

impl Runner {
    pub fn new(metric: MetricSpec, version: Version, sink: Arc<dyn MetricSink>) -> Self {
        let jitter = rand::random::<f64>();
        let start_delay =
            Duration::from_secs_f64(START_DELAY_MIN_SECS + START_DELAY_SPREAD_SECS * jitter);

        Self {
            metric,
            version,
            sink,
            start_delay,
            stop_requested: Arc::new(AtomicBool::new(false)),
            cycle_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Replace the randomized startup delay with a fixed one
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// The metric this runner samples
    pub fn metric(&self) -> &MetricSpec {
        &self.metric
    }

    /// Spawn the sampling loop for this runner's metric
    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            self.run_loop().await;
        });
    }

    async fn run_loop(&self) {
        info!(
            "waiting {:.1}s before starting runner for {}",
            self.start_delay.as_secs_f64(),
            self.metric.name
        );
        sleep(self.start_delay).await;

        info!(
            "runner started for {} with a period of {}",
            self.metric.name, self.metric.period
        );
        self.sink.write("started", 1.0).await;

        while !self.stop_requested.load(Ordering::SeqCst) {
            if let Err(err) = self.run_cycle().await {
                // Failures stay contained in their cycle; the schedule
                // keeps firing
                warn!("runner for {}: {}", self.metric.name, err);
            }

            // Sleep the full period rather than period-minus-elapsed, so
            // the wall-clock gap between cycle starts is period plus the
            // cycle's own execution time
            sleep(self.metric.period.as_duration()).await;
        }

        info!("runner for {} stopped", self.metric.name);
    }

    async fn run_cycle(&self) -> Result<()> {
        let _in_flight = self.cycle_guard.lock().await;

        let strategy = sampler::sampler_for(&self.metric, &self.version)?;
        let measurements = strategy.sample().await?;

        for measurement in measurements {
            let path = match measurement.suffix {
                Some(suffix) => format!("{}.{}.{}", self.metric.kind, self.metric.name, suffix),
                None => format!("{}.{}", self.metric.kind, self.metric.name),
            };
            self.sink.write(&path, measurement.value).await;
        }

        Ok(())
    }

    /// Ask the loop to stop and wait for any in-flight cycle, up to
    /// `deadline`
    ///
    /// On timeout this reports a failure but does not kill the task; the
    /// cycle finishes in the background and the loop exits at its next
    /// flag check.
    pub async fn stop(&self, deadline: Duration) -> Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);

        match timeout(deadline, self.cycle_guard.lock()).await {
            Ok(_guard) => Ok(()),
            Err(_) => Err(AgentError::Timeout(format!(
                "runner for {} did not finish its cycle within {:.0}s",
                self.metric.name,
                deadline.as_secs_f64()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MetricKind, Period};
    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    /// Sink that records every write in order
    #[derive(Default)]
    struct RecordingSink {
        writes: AsyncMutex<Vec<(String, f64)>>,
    }

    impl RecordingSink {
        async fn writes(&self) -> Vec<(String, f64)> {
            self.writes.lock().await.clone()
        }
    }

    #[async_trait]
    impl MetricSink for RecordingSink {
        async fn write(&self, path: &str, value: f64) {
            self.writes.lock().await.push((path.to_string(), value));
        }
    }

    /// Sink that hangs on metric writes (but not on the started marker),
    /// standing in for a sampler/transport stuck in slow I/O
    struct HangingSink {
        hang_for: Duration,
    }

    #[async_trait]
    impl MetricSink for HangingSink {
        async fn write(&self, path: &str, _value: f64) {
            if path != "started" {
                sleep(self.hang_for).await;
            }
        }
    }

    fn build_number_metric(period: Duration) -> MetricSpec {
        MetricSpec {
            kind: MetricKind::BuildNumber,
            name: "app".to_string(),
            method: String::new(),
            url: String::new(),
            period: Period::new(period),
            enabled: true,
        }
    }

    fn version_42() -> Version {
        Version {
            build_number: 42,
            hash: String::new(),
            short_hash: "3f5e2a1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_runner_emits_started_marker_then_samples() {
        let sink = Arc::new(RecordingSink::default());
        let runner = Arc::new(
            Runner::new(
                build_number_metric(Duration::from_millis(20)),
                version_42(),
                sink.clone(),
            )
            .with_start_delay(Duration::ZERO),
        );

        Arc::clone(&runner).start();
        sleep(Duration::from_millis(200)).await;
        runner.stop(Duration::from_secs(1)).await.unwrap();

        let writes = sink.writes().await;
        assert!(writes.len() >= 2, "expected marker plus samples: {writes:?}");
        assert_eq!(writes[0], ("started".to_string(), 1.0));
        assert!(
            writes[1..]
                .iter()
                .all(|(path, value)| path == "build-number.app" && *value == 42.0),
            "unexpected writes: {writes:?}"
        );
    }

    #[tokio::test]
    async fn test_runner_samples_repeatedly_at_period() {
        let sink = Arc::new(RecordingSink::default());
        let runner = Arc::new(
            Runner::new(
                build_number_metric(Duration::from_millis(10)),
                version_42(),
                sink.clone(),
            )
            .with_start_delay(Duration::ZERO),
        );

        Arc::clone(&runner).start();
        sleep(Duration::from_millis(300)).await;
        let count_early = sink.writes().await.len();
        sleep(Duration::from_millis(300)).await;
        let count_late = sink.writes().await.len();
        runner.stop(Duration::from_secs(1)).await.unwrap();

        assert!(count_early >= 2, "sampling never got going");
        assert!(count_late > count_early, "sample count stalled");
    }

    #[tokio::test]
    async fn test_stop_before_start_delay_elapses() {
        let sink = Arc::new(RecordingSink::default());
        let runner = Arc::new(
            Runner::new(
                build_number_metric(Duration::from_secs(60)),
                version_42(),
                sink.clone(),
            )
            .with_start_delay(Duration::from_secs(60)),
        );

        Arc::clone(&runner).start();

        // No cycle is in flight, so stop returns immediately
        runner.stop(Duration::from_millis(100)).await.unwrap();
        assert!(sink.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_times_out_on_long_cycle() {
        let sink = Arc::new(HangingSink {
            hang_for: Duration::from_secs(10),
        });
        let runner = Arc::new(
            Runner::new(
                build_number_metric(Duration::from_secs(60)),
                version_42(),
                sink,
            )
            .with_start_delay(Duration::ZERO),
        );

        Arc::clone(&runner).start();

        // Let the first cycle get stuck inside the sink
        sleep(Duration::from_millis(100)).await;
        let err = runner.stop(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unsupported_kind_fails_every_cycle_without_stopping() {
        let sink = Arc::new(RecordingSink::default());
        let metric = MetricSpec {
            kind: MetricKind::Unsupported("carrier-pigeon".to_string()),
            name: "pigeon".to_string(),
            method: String::new(),
            url: String::new(),
            period: Period::new(Duration::from_millis(20)),
            enabled: true,
        };
        let runner = Arc::new(
            Runner::new(metric, version_42(), sink.clone()).with_start_delay(Duration::ZERO),
        );

        Arc::clone(&runner).start();
        sleep(Duration::from_millis(200)).await;

        // The loop kept firing (and kept failing) but stays stoppable
        runner.stop(Duration::from_secs(1)).await.unwrap();

        // Only the started marker ever reaches the sink
        let writes = sink.writes().await;
        assert_eq!(writes, vec![("started".to_string(), 1.0)]);
    }

    #[tokio::test]
    async fn test_runners_do_not_block_each_other() {
        // One runner hangs in its cycle; the other must keep sampling
        let hanging = Arc::new(
            Runner::new(
                build_number_metric(Duration::from_secs(60)),
                version_42(),
                Arc::new(HangingSink {
                    hang_for: Duration::from_secs(10),
                }),
            )
            .with_start_delay(Duration::ZERO),
        );

        let sink = Arc::new(RecordingSink::default());
        let mut healthy_metric = build_number_metric(Duration::from_millis(20));
        healthy_metric.name = "other".to_string();
        let healthy = Arc::new(
            Runner::new(healthy_metric, version_42(), sink.clone())
                .with_start_delay(Duration::ZERO),
        );

        Arc::clone(&hanging).start();
        Arc::clone(&healthy).start();
        sleep(Duration::from_millis(200)).await;
        healthy.stop(Duration::from_secs(1)).await.unwrap();

        let writes = sink.writes().await;
        assert!(
            writes.len() >= 2,
            "healthy runner was starved: {writes:?}"
        );
    }
}
