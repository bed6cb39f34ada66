//! Queue sampler loop
//!
//! Every `interval` it reads the length of each configured queue, sums
//! them, and appends the sum to the metric store. A tick is all or
//! nothing: if any queue query fails, no sample is written.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{error, info, warn};

use qs_common::telemetry;

/// Queue-depth reads against the broker.
#[async_trait]
pub trait QueueSource: Send + Sync {
    async fn queue_length(&self, name: &str) -> anyhow::Result<i64>;
}

/// Sample writes into the metric store.
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn record(&self, queue_len: i64) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub interval: Duration,
    pub queues: Vec<String>,
}

/// Start the sampler loop. The first tick fires one full interval after
/// start; the task exits when the shutdown signal is observed.
pub fn spawn_sampler(
    source: Arc<dyn QueueSource>,
    sink: Arc<dyn SampleSink>,
    config: SamplerConfig,
    shutdown: broadcast::Sender<()>,
) -> JoinHandle<()> {
    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sample_once(source.as_ref(), sink.as_ref(), &config.queues).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("queue sampler shutting down");
                    break;
                }
            }
        }
    })
}

async fn sample_once(source: &dyn QueueSource, sink: &dyn SampleSink, queues: &[String]) {
    let mut total = 0i64;
    for name in queues {
        match source.queue_length(name).await {
            Ok(len) => {
                telemetry::record_queue_count_success();
                telemetry::set_current_queue_size(name, len);
                total += len;
            }
            Err(e) => {
                // all or nothing: no partial sums are ever recorded
                telemetry::record_queue_count_failure();
                warn!(queue = %name, error = %e, "error reading queue length, skipping sample");
                return;
            }
        }
    }

    if let Err(e) = sink.record(total).await {
        telemetry::record_metric_save_failure();
        error!(error = %e, "error saving metrics");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedSource {
        lengths: HashMap<String, i64>,
    }

    impl ScriptedSource {
        fn new(lengths: &[(&str, i64)]) -> Self {
            Self {
                lengths: lengths
                    .iter()
                    .map(|(name, len)| (name.to_string(), *len))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl QueueSource for ScriptedSource {
        async fn queue_length(&self, name: &str) -> anyhow::Result<i64> {
            self.lengths
                .get(name)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("queue '{name}' unavailable"))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        samples: Mutex<Vec<i64>>,
        fail: bool,
    }

    #[async_trait]
    impl SampleSink for RecordingSink {
        async fn record(&self, queue_len: i64) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("store unavailable");
            }
            self.samples.lock().unwrap().push(queue_len);
            Ok(())
        }
    }

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn sums_all_queues_into_one_sample() {
        let source = ScriptedSource::new(&[("a", 3), ("b", 4)]);
        let sink = RecordingSink::default();

        sample_once(&source, &sink, &queues(&["a", "b"])).await;

        assert_eq!(*sink.samples.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn any_failed_queue_abandons_the_tick() {
        let source = ScriptedSource::new(&[("a", 3)]);
        let sink = RecordingSink::default();

        sample_once(&source, &sink, &queues(&["a", "gone"])).await;
        sample_once(&source, &sink, &queues(&["gone", "a"])).await;

        assert!(sink.samples.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_failure_does_not_panic_the_loop() {
        let source = ScriptedSource::new(&[("a", 1)]);
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };

        sample_once(&source, &sink, &queues(&["a"])).await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop_before_the_next_tick() {
        let source = Arc::new(ScriptedSource::new(&[("a", 1)]));
        let sink = Arc::new(RecordingSink::default());
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = spawn_sampler(
            source,
            sink.clone(),
            SamplerConfig {
                interval: Duration::from_secs(60),
                queues: queues(&["a"]),
            },
            shutdown_tx.clone(),
        );

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sampler did not observe shutdown")
            .unwrap();
        assert!(sink.samples.lock().unwrap().is_empty());
    }
}
