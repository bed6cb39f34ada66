//! Control subsystem: the sampler loop, the decision loop, and the
//! parameter set that gates their start.
//!
//! The two loops never talk to each other; the metric store is the only
//! shared state, and the broadcast shutdown signal the only cross-loop
//! event. Adapters are reached through one-method capability traits so
//! the loops can be exercised against in-memory fakes.

pub mod decision;
pub mod sampler;
pub mod settings;

pub use decision::{spawn_autoscaler, ControlError, ReplicaScaler, ScaleContext, StatsSource};
pub use sampler::{spawn_sampler, QueueSource, SampleSink, SamplerConfig};
pub use settings::{Settings, SettingsError};
