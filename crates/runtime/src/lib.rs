pub mod metrics;
pub mod pool;

pub use metrics::{Histogram, Metrics, MetricsSnapshot};
pub use pool::*;
