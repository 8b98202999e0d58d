//! Completion handles for submitted tasks.
//!
//! A [`Completion`] holds the task's event, keeps its device buffers alive,
//! and carries the host memory of every output-bearing argument. Readbacks
//! land in staging memory owned by the task; host memory is only written by
//! the thread that waits.

use crate::arg::Direction;
use crate::binder::PendingOutput;
use crate::device::{DeviceBuffer, Event};
use crate::error::Result;
use bytemuck::Pod;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;
use std::time::Duration;

/// Refreshed host memory of one output-bearing argument.
pub struct OutputSlot<'a> {
    arg_index: usize,
    direction: Direction,
    bytes: &'a mut [u8],
}

impl<'a> OutputSlot<'a> {
    /// Position of the argument in the submitted argument list.
    pub fn arg_index(&self) -> usize {
        self.arg_index
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// View the bytes as elements of `T`.
    ///
    /// # Panics
    ///
    /// Panics if the memory is misaligned for `T` or its length is not a
    /// multiple of `size_of::<T>()`. Neither happens when `T` is the element
    /// type the argument was built from.
    pub fn as_slice<T: Pod>(&self) -> &[T] {
        bytemuck::cast_slice(self.bytes)
    }

    /// Copy the bytes out as elements of `T`, ignoring alignment.
    pub fn to_vec<T: Pod>(&self) -> Vec<T> {
        let size = std::mem::size_of::<T>();
        if size == 0 {
            return Vec::new();
        }
        self.bytes.chunks_exact(size).map(bytemuck::pod_read_unaligned).collect()
    }

    pub fn into_bytes(self) -> &'a mut [u8] {
        self.bytes
    }
}

impl fmt::Debug for OutputSlot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSlot")
            .field("arg_index", &self.arg_index)
            .field("direction", &self.direction)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Output and input-output arguments of a completed task, in the order they
/// were passed to `submit`.
#[derive(Debug)]
pub struct Outputs<'a> {
    slots: Vec<OutputSlot<'a>>,
}

impl<'a> Outputs<'a> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&OutputSlot<'a>> {
        self.slots.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OutputSlot<'a>> {
        self.slots.iter()
    }
}

impl<'a> Index<usize> for Outputs<'a> {
    type Output = OutputSlot<'a>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.slots[index]
    }
}

impl<'a> IntoIterator for Outputs<'a> {
    type Item = OutputSlot<'a>;
    type IntoIter = std::vec::IntoIter<OutputSlot<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter()
    }
}

impl<'s, 'a> IntoIterator for &'s Outputs<'a> {
    type Item = &'s OutputSlot<'a>;
    type IntoIter = std::slice::Iter<'s, OutputSlot<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.iter()
    }
}

/// Handle to one submitted task.
///
/// Not cloneable. Dropping it without waiting is allowed: the task still runs
/// to completion on the device, and the borrowed host memory is left as it
/// was.
#[must_use = "a submitted task only refreshes host memory when waited on"]
pub struct Completion<'a> {
    event: Event,
    buffers: Vec<DeviceBuffer>,
    outputs: Vec<Readback<'a>>,
    copied: bool,
}

struct Readback<'a> {
    arg_index: usize,
    direction: Direction,
    host: &'a mut [u8],
    staging: Arc<Mutex<Vec<u8>>>,
}

impl<'a> Completion<'a> {
    pub(crate) fn new(
        event: Event,
        buffers: Vec<DeviceBuffer>,
        outputs: Vec<PendingOutput<'a>>,
    ) -> Self {
        let outputs = outputs
            .into_iter()
            .map(|output| Readback {
                arg_index: output.arg_index,
                direction: output.direction,
                host: output.host,
                staging: output.staging,
            })
            .collect();

        Self {
            event,
            buffers,
            outputs,
            copied: false,
        }
    }

    /// Block until the kernel and every readback have run, then refresh the
    /// host memory of the output arguments.
    ///
    /// Calling it again returns immediately with the same outcome.
    pub fn wait(&mut self) -> Result<()> {
        let outcome = self.event.wait();
        self.settle(outcome)
    }

    /// Wait, then hand back the refreshed outputs.
    pub fn get(mut self) -> Result<Outputs<'a>> {
        self.wait()?;
        Ok(self.take_outputs())
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`. Returns
    /// `Ok(false)` if the task is still running.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<bool> {
        if !self.event.wait_timeout(timeout) {
            return Ok(false);
        }
        self.wait().map(|()| true)
    }

    /// Whether the device has finished with this task. Does not block.
    pub fn is_complete(&self) -> bool {
        self.event.is_complete()
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Number of output-bearing arguments.
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    fn settle(&mut self, outcome: Result<()>) -> Result<()> {
        if outcome.is_ok() && !self.copied {
            for output in &mut self.outputs {
                let staging = std::mem::take(&mut *output.staging.lock());
                let len = staging.len().min(output.host.len());
                output.host[..len].copy_from_slice(&staging[..len]);
            }
            self.copied = true;
        }
        self.buffers.clear();
        outcome
    }

    fn take_outputs(&mut self) -> Outputs<'a> {
        let slots = self
            .outputs
            .drain(..)
            .map(|output| OutputSlot {
                arg_index: output.arg_index,
                direction: output.direction,
                bytes: output.host,
            })
            .collect();
        Outputs { slots }
    }
}

impl fmt::Debug for Completion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("event", &self.event)
            .field("buffers", &self.buffers.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

#[cfg(feature = "async")]
mod async_support {
    use super::{Completion, Outputs};
    use crate::error::Result;
    use std::future::{Future, IntoFuture};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Future resolving once the device has finished a task.
    #[derive(Debug)]
    pub struct CompletionFuture<'a> {
        completion: Option<Completion<'a>>,
    }

    impl<'a> Future for CompletionFuture<'a> {
        type Output = Result<Outputs<'a>>;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let Some(completion) = self.completion.as_mut() else {
                panic!("CompletionFuture polled after completion");
            };

            if !completion.event.register_waker(cx.waker()) {
                return Poll::Pending;
            }

            let outcome = completion.event.result().unwrap_or(Ok(()));
            let result = completion.settle(outcome).map(|()| completion.take_outputs());
            self.completion = None;
            Poll::Ready(result)
        }
    }

    impl<'a> IntoFuture for Completion<'a> {
        type Output = Result<Outputs<'a>>;
        type IntoFuture = CompletionFuture<'a>;

        fn into_future(self) -> Self::IntoFuture {
            CompletionFuture {
                completion: Some(self),
            }
        }
    }
}

#[cfg(feature = "async")]
pub use async_support::CompletionFuture;
