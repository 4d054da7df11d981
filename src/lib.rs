//! A scheduled sampling agent that forwards metrics to a Carbon-style collector

pub mod config;
pub mod error;
pub mod runner;
pub mod sampler;
pub mod supervisor;
pub mod transport;
pub mod util;
pub mod version;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::config::{AgentConfig, CollectorConfig, MetricKind, MetricSpec, Period};
    pub use crate::error::{AgentError, Result};
    pub use crate::runner::{Runner, STOP_TIMEOUT};
    pub use crate::sampler::{Measurement, Sampler};
    pub use crate::supervisor::Supervisor;
    pub use crate::transport::{CarbonTransport, MetricSink};
    pub use crate::version::Version;
}

pub use util::logging::init as init_logging;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
