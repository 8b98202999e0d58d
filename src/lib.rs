//! ndqueue - in-order compute queue with typed kernel arguments
//!
//! Dispatches compute kernels onto a device command queue and hands back a
//! completion handle that refreshes host memory once the device is done.
//!
//! # Quick Start
//!
//! ```no_run
//! use ndqueue::prelude::*;
//!
//! let library = KernelLibrary::new().with("add", |item, args| {
//!     let i = item.global_id(0);
//!     let sum = args.read::<f32>(0, i) + args.read::<f32>(1, i);
//!     args.write(2, i, sum);
//! });
//!
//! let mut queue = Queue::new(Config::from_env(), library).unwrap();
//!
//! let a = vec![1.0f32; 1024];
//! let b = vec![2.0f32; 1024];
//! let mut c = vec![0.0f32; 1024];
//!
//! queue
//!     .submit(
//!         "kernels/add.cl",
//!         "add",
//!         &NdRange::linear(1024, 64),
//!         [KernelArg::input(&a), KernelArg::input(&b), KernelArg::output(&mut c)],
//!     )
//!     .unwrap()
//!     .wait()
//!     .unwrap();
//!
//! assert!(c.iter().all(|&x| x == 3.0));
//! ```
//!
//! # Features
//!
//! - **Typed arguments**: input, output, input-output, local and scalar
//!   arguments over any `bytemuck::Pod` element type
//! - **Program cache**: each source is built once per queue
//! - **In-order execution**: tasks run on a dedicated device thread in
//!   submission order
//! - **Telemetry**: task, transfer and kernel latency metrics (optional
//!   exporters)
//! - **Async Integration**: `Completion` is awaitable (optional)

#![warn(missing_debug_implementations)]

pub mod arg;
mod binder;
pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod executor;
pub mod future;
pub mod info;
pub mod prelude;
pub mod queue;
pub mod source;
pub mod telemetry;

pub use arg::{Direction, KernelArg};
pub use cache::{CacheStats, ProgramCache};
pub use config::{Config, ConfigBuilder, BUILD_OPTIONS};
pub use device::{DeviceInfo, KernelLibrary, NdRange, Platform, Status};
pub use error::{Error, Result};
pub use future::{Completion, OutputSlot, Outputs};
pub use queue::Queue;
pub use source::{FsSourceLoader, MemorySource, SourceLoader};

#[cfg(feature = "async")]
pub use future::CompletionFuture;
