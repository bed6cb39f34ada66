//! Published metric series
//!
//! All series live under the `amqp_autoscaler` namespace. Counters are
//! write-only side effects safe for concurrent increment; gauges are
//! overwritten by whichever loop owns them. One function per series.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register help text for every published series. Call once at startup,
/// after the recorder is installed.
pub fn describe() {
    describe_counter!("amqp_autoscaler_polls_total", "Count of autoscale decision runs.");
    describe_counter!(
        "amqp_autoscaler_autoscale_failures_total",
        "Count of failed autoscale decision runs."
    );
    describe_counter!(
        "amqp_autoscaler_queue_count_successes_total",
        "Count of successful queue length queries."
    );
    describe_counter!(
        "amqp_autoscaler_queue_count_failures_total",
        "Count of failed queue length queries."
    );
    describe_counter!(
        "amqp_autoscaler_metric_save_failures_total",
        "Count of failed sample writes to the metrics store."
    );
    describe_counter!(
        "amqp_autoscaler_scaling_events_total",
        "Count of scaling events by resource kind."
    );
    describe_gauge!("amqp_autoscaler_desired_replicas", "Desired replica count.");
    describe_gauge!("amqp_autoscaler_current_queue_size", "Current size of target queue.");
    describe_gauge!("amqp_autoscaler_average_queue_size", "Average size of target queue.");
    describe_gauge!("amqp_autoscaler_coverage_queue_size", "Coverage size of target queue.");
    describe_gauge!("amqp_autoscaler_min_pods", "Minimum pod count.");
    describe_gauge!("amqp_autoscaler_max_pods", "Maximum pod count.");
    describe_gauge!("amqp_autoscaler_scale_threshold", "Scaling threshold.");
    describe_gauge!("amqp_autoscaler_build_info", "Info about the build.");
}

/// Record a decision loop tick
pub fn record_poll() {
    counter!("amqp_autoscaler_polls_total").increment(1);
}

/// Record a failed decision (store read or scaler call)
pub fn record_autoscale_failure() {
    counter!("amqp_autoscaler_autoscale_failures_total").increment(1);
}

/// Record a successful queue length query
pub fn record_queue_count_success() {
    counter!("amqp_autoscaler_queue_count_successes_total").increment(1);
}

/// Record a failed queue length query
pub fn record_queue_count_failure() {
    counter!("amqp_autoscaler_queue_count_failures_total").increment(1);
}

/// Record a failed sample write
pub fn record_metric_save_failure() {
    counter!("amqp_autoscaler_metric_save_failures_total").increment(1);
}

/// Record an applied scaling transition
pub fn record_scaling_event(kind: &str, name: &str) {
    counter!(
        "amqp_autoscaler_scaling_events_total",
        "kind" => kind.to_string(),
        "name" => name.to_string()
    )
    .increment(1);
}

/// Update the desired replica gauge
pub fn set_desired_replicas(replicas: i32) {
    gauge!("amqp_autoscaler_desired_replicas").set(replicas as f64);
}

/// Update the current length gauge for one queue
pub fn set_current_queue_size(queue: &str, len: i64) {
    gauge!(
        "amqp_autoscaler_current_queue_size",
        "queue" => queue.to_string()
    )
    .set(len as f64);
}

/// Update the windowed average gauge
pub fn set_average_queue_size(queue: &str, average: f64) {
    gauge!(
        "amqp_autoscaler_average_queue_size",
        "queue" => queue.to_string()
    )
    .set(average);
}

/// Update the window coverage gauge
pub fn set_coverage_queue_size(queue: &str, coverage: f64) {
    gauge!(
        "amqp_autoscaler_coverage_queue_size",
        "queue" => queue.to_string()
    )
    .set(coverage);
}

/// Publish the static scaling policy once at startup
pub fn set_scale_policy(min: i32, max: i32, threshold: i32) {
    gauge!("amqp_autoscaler_min_pods").set(min as f64);
    gauge!("amqp_autoscaler_max_pods").set(max as f64);
    gauge!("amqp_autoscaler_scale_threshold").set(threshold as f64);
}

/// Publish build information once at startup
pub fn set_build_info(version: &str, runtime_version: &str) {
    gauge!(
        "amqp_autoscaler_build_info",
        "version" => version.to_string(),
        "runtime_version" => runtime_version.to_string()
    )
    .set(1.0);
}
