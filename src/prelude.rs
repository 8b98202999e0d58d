pub use crate::arg::{Direction, KernelArg};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::device::{KernelArgs, KernelLibrary, NdRange, WorkItem};
pub use crate::error::{Error, Result};
pub use crate::future::{Completion, Outputs};
pub use crate::queue::Queue;
pub use crate::source::{FsSourceLoader, MemorySource, SourceLoader};

pub use crate::telemetry::{Metrics, MetricsSnapshot};
