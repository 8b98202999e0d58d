//! In-order command queue backed by a dedicated device thread.

use super::kernel::{ArgValue, Kernel};
use super::range::{Geometry, NdRange};
use super::{DeviceBuffer, DeviceContext, DeviceInfo, Event, Status};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::worker::DeviceWorker;
use crate::executor::PanicHandler;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Work executed by the device thread.
pub(crate) enum Command {
    NdRange {
        kernel: Arc<Kernel>,
        args: Vec<ArgValue>,
        geometry: Geometry,
        event: Event,
    },
    /// Copy a buffer into host-side staging memory.
    ReadBuffer {
        buffer: DeviceBuffer,
        staging: Arc<Mutex<Vec<u8>>>,
        event: Event,
    },
    Marker {
        event: Event,
    },
}

/// Commands run one at a time in submission order.
pub struct CommandQueue {
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    context: DeviceContext,
}

impl CommandQueue {
    pub(crate) fn new(context: DeviceContext, config: &Config) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let worker = DeviceWorker::new(
            receiver,
            PanicHandler::new(config.panic_strategy),
            Arc::clone(&context.metrics),
        );

        let mut builder = thread::Builder::new().name(format!("{}-0", config.thread_name_prefix));
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let handle = builder
            .spawn(move || worker.run())
            .map_err(|e| Error::executor(format!("spawn failed: {}", e)))?;

        debug!(device = %context.device.name, "command queue created");

        Ok(Self {
            sender: Some(sender),
            worker: Some(handle),
            context,
        })
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.context.device
    }

    fn send(&self, command: Command, event: &Event) -> Result<()> {
        event.attach();
        let sent = match &self.sender {
            Some(sender) => sender.send(command).is_ok(),
            None => false,
        };

        if sent {
            Ok(())
        } else {
            event.command_failed("command queue is closed");
            Err(Error::QueueClosed)
        }
    }

    /// Enqueue a kernel launch over `range`. The device checks the range,
    /// the argument count and local memory before accepting it.
    pub(crate) fn enqueue_ndrange(
        &self,
        kernel: Arc<Kernel>,
        args: Vec<ArgValue>,
        range: &NdRange,
        event: &Event,
    ) -> Result<()> {
        let device = &self.context.device;
        let geometry = Geometry::resolve(range, device).map_err(|e| {
            warn!(kernel = %kernel.name(), error = %e, "launch rejected");
            e
        })?;

        if args.len() != kernel.num_args() {
            return Err(Error::submission(
                Status::InvalidKernelArgs,
                format!(
                    "kernel '{}' takes {} arguments, {} were set",
                    kernel.name(),
                    kernel.num_args(),
                    args.len()
                ),
            ));
        }

        match kernel.local_mem_usage(&args) {
            Some(local_mem) if local_mem as u64 <= device.local_mem_size => {}
            Some(local_mem) => {
                return Err(Error::submission(
                    Status::OutOfResources,
                    format!(
                        "kernel '{}' needs {} bytes of local memory, device has {}",
                        kernel.name(),
                        local_mem,
                        device.local_mem_size
                    ),
                ));
            }
            None => {
                return Err(Error::submission(
                    Status::OutOfResources,
                    format!(
                        "kernel '{}' local memory total overflows, device has {}",
                        kernel.name(),
                        device.local_mem_size
                    ),
                ));
            }
        }

        debug!(
            kernel = %kernel.name(),
            dims = geometry.dims,
            work_items = geometry.work_items(),
            event = event.id(),
            "enqueue ndrange"
        );

        let command = Command::NdRange {
            kernel,
            args,
            geometry,
            event: event.clone(),
        };
        self.send(command, event)
    }

    /// Enqueue a non-blocking read of `buffer` into `staging`.
    pub(crate) fn enqueue_read(
        &self,
        buffer: DeviceBuffer,
        staging: Arc<Mutex<Vec<u8>>>,
        event: &Event,
    ) -> Result<()> {
        let command = Command::ReadBuffer {
            buffer,
            staging,
            event: event.clone(),
        };
        self.send(command, event)
    }

    /// Block until every previously enqueued command has run.
    pub fn finish(&self) -> Result<()> {
        let event = Event::new();
        self.send(
            Command::Marker {
                event: event.clone(),
            },
            &event,
        )?;
        event.close();
        event.wait()
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // closing the channel lets the worker drain and exit
        self.sender.take();

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("device thread panicked");
            }
        }
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("device", &self.context.device.name)
            .field("open", &self.sender.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{test_context, KernelLibrary, MemAccess, Program};
    use std::time::Duration;

    fn kernel(library: KernelLibrary, source: &str, name: &str) -> Arc<Kernel> {
        let program = Arc::new(Program::build("q.cl", source, "", &library).unwrap());
        Arc::new(Kernel::create(&program, name).unwrap())
    }

    fn queue() -> (CommandQueue, DeviceContext) {
        let context = test_context();
        let queue = CommandQueue::new(context.clone(), &Config::default()).unwrap();
        (queue, context)
    }

    #[test]
    fn test_launch_then_read() {
        let (queue, context) = queue();
        let library = KernelLibrary::new().with("iota", |item, args| {
            args.write(0, item.global_id(0), item.global_id(0) as u32);
        });
        let iota = kernel(library, "__kernel void iota(__global uint* out) {}", "iota");
        let out = DeviceBuffer::new(&context, 32, MemAccess::WriteOnly).unwrap();
        let staging = Arc::new(Mutex::new(Vec::new()));

        let event = Event::new();
        queue
            .enqueue_ndrange(
                iota,
                vec![ArgValue::Buffer(out.clone())],
                &NdRange::linear(8, 4),
                &event,
            )
            .unwrap();
        queue.enqueue_read(out, Arc::clone(&staging), &event).unwrap();
        event.close();
        event.wait().unwrap();

        let values: Vec<u32> = staging
            .lock()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(values, (0..8).collect::<Vec<u32>>());
    }

    #[test]
    fn test_rejects_wrong_arg_count() {
        let (queue, _) = queue();
        let library = KernelLibrary::new().with("k", |_, _| {});
        let k = kernel(library, "__kernel void k(int a, int b) {}", "k");

        let event = Event::new();
        let err = queue
            .enqueue_ndrange(k, Vec::new(), &NdRange::linear(1, 1), &event)
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidKernelArgs));
    }

    #[test]
    fn test_rejects_excess_local_memory() {
        let (queue, context) = queue();
        let library = KernelLibrary::new().with("k", |_, _| {});
        let k = kernel(library, "__kernel void k(__local float* s) {}", "k");

        let too_much = context.device.local_mem_size as usize + 1;
        let event = Event::new();
        let err = queue
            .enqueue_ndrange(k, vec![ArgValue::Local(too_much)], &NdRange::linear(1, 1), &event)
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::OutOfResources));
    }

    #[test]
    fn test_rejects_overflowing_local_memory() {
        let (queue, _) = queue();
        let library = KernelLibrary::new().with("k", |_, _| {});
        let k = kernel(library, "__kernel void k(__local float* a, __local float* b) {}", "k");

        let huge = usize::MAX / 2 + 1;
        let event = Event::new();
        let err = queue
            .enqueue_ndrange(
                k,
                vec![ArgValue::Local(huge), ArgValue::Local(huge)],
                &NdRange::linear(1, 1),
                &event,
            )
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::OutOfResources));
    }

    #[test]
    fn test_finish_waits_for_earlier_work() {
        let (queue, _) = queue();
        let library = KernelLibrary::new()
            .with("slow", |_, _| std::thread::sleep(Duration::from_millis(20)));
        let slow = kernel(library, "__kernel void slow(void) {}", "slow");

        let event = Event::new();
        queue.enqueue_ndrange(slow, Vec::new(), &NdRange::linear(1, 1), &event).unwrap();
        event.close();

        queue.finish().unwrap();
        assert!(event.is_complete());
    }

    #[test]
    fn test_drop_drains_queue() {
        let (queue, _) = queue();
        let library = KernelLibrary::new()
            .with("slow", |_, _| std::thread::sleep(Duration::from_millis(10)));
        let slow = kernel(library, "__kernel void slow() {}", "slow");

        let event = Event::new();
        for _ in 0..3 {
            queue
                .enqueue_ndrange(Arc::clone(&slow), Vec::new(), &NdRange::linear(1, 1), &event)
                .unwrap();
        }
        event.close();
        drop(queue);

        assert!(event.is_complete());
    }
}
