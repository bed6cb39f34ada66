//! Scaling decision engine and loop
//!
//! Every `interval` it summarizes the sample window, gates on coverage,
//! derives a desired replica count by ceiling division, and hands it to
//! the scaler. The loop never exits on transient or store errors, only
//! on shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{error, info, warn};

use qs_common::{telemetry, QueueMetrics};

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("not enough metrics to calculate new size, required at least {required:.2} was {actual:.2} metrics ratio")]
    InsufficientCoverage { required: f64, actual: f64 },
}

/// Windowed statistics read from the metric store.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn query(&self) -> anyhow::Result<QueueMetrics>;
}

/// Drive the orchestrator toward a desired replica count.
#[async_trait]
pub trait ReplicaScaler: Send + Sync {
    async fn scale(&self, desired: i32) -> anyhow::Result<()>;
}

/// Immutable decision policy.
#[derive(Debug, Clone)]
pub struct ScaleContext {
    /// Queue depth each replica is expected to absorb
    pub threshold: i32,
    /// Minimum window coverage required before acting
    pub coverage: f64,
    /// Decision interval
    pub interval: Duration,
}

impl ScaleContext {
    /// Desired replica count for a windowed average, gated on coverage.
    ///
    /// Ceiling division: any load above `n × threshold` needs `n + 1`
    /// replicas, otherwise a queue sitting just above the threshold
    /// would round down to zero. Coverage above 1.0 passes the gate
    /// unclamped.
    pub fn new_size(&self, average: f64, coverage: f64) -> Result<i32, ControlError> {
        if coverage < self.coverage {
            return Err(ControlError::InsufficientCoverage {
                required: self.coverage,
                actual: coverage,
            });
        }
        Ok((average / f64::from(self.threshold)).ceil().max(0.0) as i32)
    }
}

/// Start the decision loop. Same timing and shutdown contract as the
/// sampler: first tick after one full interval, exit on shutdown.
pub fn spawn_autoscaler(
    stats: Arc<dyn StatsSource>,
    scaler: Arc<dyn ReplicaScaler>,
    ctx: ScaleContext,
    shutdown: broadcast::Sender<()>,
) -> JoinHandle<()> {
    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + ctx.interval, ctx.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    decide_once(stats.as_ref(), scaler.as_ref(), &ctx).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    })
}

async fn decide_once(stats: &dyn StatsSource, scaler: &dyn ReplicaScaler, ctx: &ScaleContext) {
    telemetry::record_poll();

    let metrics = match stats.query().await {
        Ok(metrics) => metrics,
        Err(e) => {
            telemetry::record_autoscale_failure();
            error!(error = %e, "error reading queue statistics");
            return;
        }
    };

    let desired = match ctx.new_size(metrics.average, metrics.coverage) {
        Ok(desired) => desired,
        Err(e) => {
            // not a failure: the window just has not filled up yet
            warn!("{e}");
            return;
        }
    };
    telemetry::set_desired_replicas(desired);

    if let Err(e) = scaler.scale(desired).await {
        telemetry::record_autoscale_failure();
        error!(error = %e, "error scaling target");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn ctx(threshold: i32, coverage: f64) -> ScaleContext {
        ScaleContext {
            threshold,
            coverage,
            interval: Duration::from_secs(30),
        }
    }

    struct FixedStats(Option<QueueMetrics>);

    #[async_trait]
    impl StatsSource for FixedStats {
        async fn query(&self) -> anyhow::Result<QueueMetrics> {
            self.0
                .clone()
                .ok_or_else(|| anyhow::anyhow!("store unavailable"))
        }
    }

    #[derive(Default)]
    struct RecordingScaler {
        calls: Mutex<Vec<i32>>,
        fail: bool,
    }

    #[async_trait]
    impl ReplicaScaler for RecordingScaler {
        async fn scale(&self, desired: i32) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(desired);
            if self.fail {
                anyhow::bail!("orchestrator unavailable");
            }
            Ok(())
        }
    }

    fn metrics(average: f64, coverage: f64) -> QueueMetrics {
        QueueMetrics {
            count: 0,
            average,
            coverage,
        }
    }

    #[test]
    fn new_size_rejects_thin_coverage() {
        let err = ctx(1, 0.75).new_size(0.0, 0.5).unwrap_err();
        assert_eq!(
            err.to_string(),
            "not enough metrics to calculate new size, required at least 0.75 was 0.50 metrics ratio"
        );
    }

    #[test]
    fn new_size_rounds_up() {
        assert_eq!(ctx(1, 0.75).new_size(2.5, 0.75).unwrap(), 3);
    }

    #[test]
    fn new_size_threshold_boundaries() {
        let sc = ctx(10, 0.0);
        assert_eq!(sc.new_size(0.0, 1.0).unwrap(), 0);
        assert_eq!(sc.new_size(10.0, 1.0).unwrap(), 1);
        assert_eq!(sc.new_size(10.1, 1.0).unwrap(), 2);
    }

    #[test]
    fn new_size_accepts_coverage_above_one() {
        assert_eq!(ctx(1, 1.0).new_size(1.0, 1.4).unwrap(), 1);
    }

    #[tokio::test]
    async fn gate_never_invokes_the_scaler() {
        let stats = FixedStats(Some(metrics(100.0, 0.5)));
        let scaler = RecordingScaler::default();

        decide_once(&stats, &scaler, &ctx(1, 0.75)).await;

        assert!(scaler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_failure_skips_the_decision() {
        let stats = FixedStats(None);
        let scaler = RecordingScaler::default();

        decide_once(&stats, &scaler, &ctx(1, 0.0)).await;

        assert!(scaler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn scales_to_the_ceiling_of_the_average() {
        let stats = FixedStats(Some(metrics(2.5, 1.0)));
        let scaler = RecordingScaler::default();

        decide_once(&stats, &scaler, &ctx(1, 0.75)).await;

        assert_eq!(*scaler.calls.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn scaler_failure_does_not_stop_the_loop() {
        let stats = FixedStats(Some(metrics(1.0, 1.0)));
        let scaler = RecordingScaler {
            fail: true,
            ..Default::default()
        };

        decide_once(&stats, &scaler, &ctx(1, 0.0)).await;

        assert_eq!(*scaler.calls.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let stats = Arc::new(FixedStats(Some(metrics(0.0, 1.0))));
        let scaler = Arc::new(RecordingScaler::default());
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = spawn_autoscaler(stats, scaler, ctx(1, 0.0), shutdown_tx.clone());

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("autoscaler did not observe shutdown")
            .unwrap();
    }
}
