pub mod bounds;
pub mod logging;
pub mod telemetry;

pub use bounds::ScaleBounds;

/// Aggregate view of the sample window, as computed by the metric store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueMetrics {
    /// Number of samples inside the evaluation window
    pub count: i64,
    /// Arithmetic mean of the queue lengths in the window (0.0 when empty)
    pub average: f64,
    /// Fraction of the window actually represented by samples.
    /// `count * sample_interval / window`; may exceed 1.0 and is
    /// deliberately not clamped before the coverage gate compares it.
    pub coverage: f64,
}
