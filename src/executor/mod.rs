//! Device-side execution.
//!
//! The device thread runs a [`worker::DeviceWorker`] draining the command
//! channel; kernel bodies run under a [`PanicHandler`].

pub mod panic_handler;
pub(crate) mod worker;

pub use panic_handler::{KernelPanic, PanicHandler, PanicStrategy};
