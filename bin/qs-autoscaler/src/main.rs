//! Queue-driven autoscaler for Kubernetes workloads
//!
//! Two loops share a small time-series store: the sampler appends the
//! summed depth of the configured queues every `stats-interval` seconds,
//! and the decision loop drives the target workload toward
//! `ceil(average / threshold)` replicas every `interval` seconds, within
//! the configured bounds. A Prometheus endpoint exposes the series under
//! `/metrics`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{routing::get, Router};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use qs_broker::{unquote_uri, BrokerClient};
use qs_common::{telemetry, QueueMetrics};
use qs_control::{
    spawn_autoscaler, spawn_sampler, QueueSource, ReplicaScaler, SampleSink, SamplerConfig,
    ScaleContext, Settings, StatsSource,
};
use qs_kube::{ApiConfig, KubeScaler, ResourceKind, TargetSpec};
use qs_store::MetricStore;

#[derive(Parser, Debug)]
#[command(name = "qs-autoscaler", version)]
#[command(about = "Queue-driven autoscaler for Kubernetes workloads")]
struct Args {
    /// Broker URI: amqp(s) for AMQP inspection, http(s) for the management API
    #[arg(long = "amqp-uri", env = "QS_AMQP_URI", default_value = "")]
    amqp_uri: String,

    /// Queue to measure load on; use a comma separator for multiple queues
    #[arg(long = "amqp-queue", env = "QS_AMQP_QUEUE", default_value = "")]
    amqp_queue: String,

    /// Kubernetes API URL
    #[arg(long, env = "QS_API_URL", default_value = "")]
    api_url: String,

    /// Username for basic authentication on the Kubernetes API
    #[arg(long, env = "QS_API_USER")]
    api_user: Option<String>,

    /// Password for basic authentication on the Kubernetes API
    #[arg(long, env = "QS_API_PASSWD")]
    api_passwd: Option<String>,

    /// Path to a bearer token file for OAuth authentication
    #[arg(long, env = "QS_API_TOKEN")]
    api_token: Option<String>,

    /// Path to a CA certificate file for HTTPS connections
    #[arg(long, env = "QS_API_CAFILE")]
    api_cafile: Option<String>,

    /// Skip TLS certificate verification; unsafe, use for development only
    #[arg(long, env = "QS_API_INSECURE", default_value = "false")]
    api_insecure: bool,

    /// Lower limit for the number of replicas
    #[arg(long, env = "QS_MIN", default_value = "1", allow_hyphen_values = true)]
    min: i32,

    /// Upper limit for the number of replicas
    #[arg(long, env = "QS_MAX", default_value = "-1", allow_hyphen_values = true)]
    max: i32,

    /// Name of the Kubernetes resource to autoscale
    #[arg(long, env = "QS_NAME", default_value = "")]
    name: String,

    /// Kind of the Kubernetes resource to autoscale
    #[arg(long, env = "QS_KIND", default_value = "Deployment")]
    kind: String,

    /// Kubernetes namespace
    #[arg(long, env = "QS_NS", default_value = "default")]
    ns: String,

    /// Seconds between scaling decisions
    #[arg(long, env = "QS_INTERVAL", default_value = "30")]
    interval: i64,

    /// Number of queued messages representing full load on one replica
    #[arg(long, env = "QS_THRESHOLD", default_value = "-1", allow_hyphen_values = true)]
    threshold: i32,

    /// Maximum replicas added per decision (0 disables the limit)
    #[arg(long, env = "QS_INCREASE_LIMIT", default_value = "0")]
    increase_limit: i32,

    /// Maximum replicas removed per decision (0 disables the limit)
    #[arg(long, env = "QS_DECREASE_LIMIT", default_value = "0")]
    decrease_limit: i32,

    /// Seconds between queue-length samples
    #[arg(long, env = "QS_STATS_INTERVAL", default_value = "5")]
    stats_interval: i64,

    /// Number of scaling intervals used to calculate the average queue length
    #[arg(long, env = "QS_EVAL_INTERVALS", default_value = "2")]
    eval_intervals: i64,

    /// Required fraction of the window covered by samples
    #[arg(long, env = "QS_STATS_COVERAGE", default_value = "0.75")]
    stats_coverage: f64,

    /// Statistics database filename, or :memory:
    #[arg(long, env = "QS_DB", default_value = ":memory:")]
    db: String,

    /// Directory for the statistics database file
    #[arg(long, env = "QS_DB_DIR", default_value = "")]
    db_dir: String,

    /// Address to listen on for exporting Prometheus metrics
    #[arg(long, env = "QS_METRICS_LISTEN_ADDRESS", default_value = "0.0.0.0:9505")]
    metrics_listen_address: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    qs_common::logging::init_logging("qs-autoscaler");

    let broker_uri = unquote_uri(&args.amqp_uri).to_string();
    let queues: Vec<String> = if args.amqp_queue.is_empty() {
        Vec::new()
    } else {
        args.amqp_queue.split(',').map(str::to_string).collect()
    };

    let settings = Settings {
        broker_uri: broker_uri.clone(),
        queues,
        api_url: args.api_url.clone(),
        target_name: args.name.clone(),
        kind: args.kind.clone(),
        namespace: args.ns.clone(),
        interval: args.interval,
        sample_interval: args.stats_interval,
        eval_intervals: args.eval_intervals,
        threshold: args.threshold,
        coverage: args.stats_coverage,
        min: args.min,
        max: args.max,
        increase_limit: args.increase_limit,
        decrease_limit: args.decrease_limit,
    };
    settings.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        queues = %settings.queue_label(),
        target = %format!("{}/{}", settings.namespace, settings.target_name),
        "starting queue autoscaler"
    );

    // Metrics recorder and exposition endpoint. The recorder is
    // process-wide; everything else records through qs_common::telemetry.
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;
    telemetry::describe();
    telemetry::set_build_info(env!("CARGO_PKG_VERSION"), env!("QS_RUSTC_VERSION"));
    telemetry::set_scale_policy(settings.min, settings.max, settings.threshold);

    let addr: SocketAddr = args
        .metrics_listen_address
        .parse()
        .with_context(|| format!("invalid metrics listen address '{}'", args.metrics_listen_address))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics listener on {addr}"))?;
    let metrics_app = Router::new()
        .route("/metrics", get(move || async move { prometheus.render() }))
        .layer(TraceLayer::new_for_http());
    info!(%addr, "serving metrics on /metrics");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, metrics_app).await {
            error!(error = %e, "metrics listener failed");
        }
    });

    let db_file = qs_store::db_path(&args.db_dir, &args.db)?;
    let store = MetricStore::connect(&db_file).await?;
    store.init().await?;

    let broker = BrokerClient::new(broker_uri)?;
    let api_config = ApiConfig {
        url: args.api_url,
        user: args.api_user.filter(|s| !s.is_empty()),
        passwd: args.api_passwd.filter(|s| !s.is_empty()),
        token_file: args.api_token.filter(|s| !s.is_empty()),
        ca_file: args.api_cafile.filter(|s| !s.is_empty()),
        insecure: args.api_insecure,
    };
    let target = TargetSpec {
        kind: ResourceKind::for_kind(&settings.kind)?,
        namespace: settings.namespace.clone(),
        name: settings.target_name.clone(),
    };
    let scaler = KubeScaler::new(&api_config, target, settings.bounds())?;

    let window = settings.window();
    let (shutdown_tx, _) = broadcast::channel(1);

    let sampler = spawn_sampler(
        Arc::new(BrokerQueueSource { client: broker }),
        Arc::new(StoreSampleSink {
            store: store.clone(),
            window,
        }),
        SamplerConfig {
            interval: Duration::from_secs(settings.sample_interval as u64),
            queues: settings.queues.clone(),
        },
        shutdown_tx.clone(),
    );
    let autoscaler = spawn_autoscaler(
        Arc::new(StoreStatsSource {
            store,
            window,
            sample_interval: settings.sample_interval,
            queue_label: settings.queue_label(),
        }),
        Arc::new(KubeReplicaScaler { scaler }),
        ScaleContext {
            threshold: settings.threshold,
            coverage: settings.coverage,
            interval: Duration::from_secs(settings.interval as u64),
        },
        shutdown_tx.clone(),
    );

    info!("autoscaler started; press Ctrl+C to shut down");
    shutdown_signal().await;
    info!("shutdown signal received");

    // Loops exit before their next tick; in-flight calls are not
    // interrupted, so give them a moment to finish.
    let _ = shutdown_tx.send(());
    for (name, handle) in [("sampler", sampler), ("autoscaler", autoscaler)] {
        match tokio::time::timeout(Duration::from_secs(10), handle).await {
            Ok(_) => info!("{name} loop stopped"),
            Err(_) => warn!("{name} loop did not stop within 10s"),
        }
    }

    info!("queue autoscaler shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// Capability adapters bridging the concrete clients onto the control
// loop traits.

struct BrokerQueueSource {
    client: BrokerClient,
}

#[async_trait]
impl QueueSource for BrokerQueueSource {
    async fn queue_length(&self, name: &str) -> anyhow::Result<i64> {
        Ok(self.client.queue_length(name).await?)
    }
}

struct StoreSampleSink {
    store: MetricStore,
    window: i64,
}

#[async_trait]
impl SampleSink for StoreSampleSink {
    async fn record(&self, queue_len: i64) -> anyhow::Result<()> {
        Ok(self.store.update(queue_len, self.window).await?)
    }
}

struct StoreStatsSource {
    store: MetricStore,
    window: i64,
    sample_interval: i64,
    queue_label: String,
}

#[async_trait]
impl StatsSource for StoreStatsSource {
    async fn query(&self) -> anyhow::Result<QueueMetrics> {
        let metrics = self
            .store
            .summarize(self.window, self.sample_interval)
            .await?;
        telemetry::set_average_queue_size(&self.queue_label, metrics.average);
        telemetry::set_coverage_queue_size(&self.queue_label, metrics.coverage);
        Ok(metrics)
    }
}

struct KubeReplicaScaler {
    scaler: KubeScaler,
}

#[async_trait]
impl ReplicaScaler for KubeReplicaScaler {
    async fn scale(&self, desired: i32) -> anyhow::Result<()> {
        Ok(self.scaler.scale(desired).await?)
    }
}
