//! Device thread loop.

use super::panic_handler::PanicHandler;
use crate::device::command_queue::Command;
use crate::telemetry::Metrics;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, trace};

/// Executes commands in the order they arrive. Runs until every sender of
/// the channel is gone and the channel is drained.
pub(crate) struct DeviceWorker {
    receiver: Receiver<Command>,
    panic_handler: PanicHandler,
    metrics: Arc<Metrics>,
}

impl DeviceWorker {
    pub fn new(
        receiver: Receiver<Command>,
        panic_handler: PanicHandler,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            receiver,
            panic_handler,
            metrics,
        }
    }

    pub fn run(self) {
        debug!("device worker started");

        while let Ok(command) = self.receiver.recv() {
            self.execute(command);
        }

        debug!(panics = self.panic_handler.panic_count(), "device worker stopped");
    }

    fn execute(&self, command: Command) {
        match command {
            Command::NdRange {
                kernel,
                args,
                geometry,
                event,
            } => {
                if !event.begin() {
                    trace!(
                        kernel = %kernel.name(),
                        event = event.id(),
                        "launch skipped after earlier failure"
                    );
                    event.command_done();
                    return;
                }

                let start = Instant::now();
                match self.panic_handler.execute(|| kernel.run(&args, &geometry)) {
                    Ok(()) => {
                        let elapsed = start.elapsed();
                        self.metrics.record_kernel(geometry.work_items() as u64, elapsed);
                        trace!(kernel = %kernel.name(), ?elapsed, "kernel finished");
                        event.command_done();
                    }
                    Err(panic) => {
                        error!(kernel = %kernel.name(), event = event.id(), "kernel launch failed");
                        let reason =
                            format!("kernel '{}' panicked: {}", kernel.name(), panic.message);
                        event.command_failed(reason);
                    }
                }
            }
            Command::ReadBuffer { buffer, staging, event } => {
                if event.begin() {
                    buffer.read_into(&mut staging.lock());
                }
                event.command_done();
            }
            Command::Marker { event } => {
                event.begin();
                event.command_done();
            }
        }
    }
}
