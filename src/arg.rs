//! Typed kernel arguments.
//!
//! A [`KernelArg`] pairs borrowed host memory with the direction data flows
//! between host and device. The direction is fixed when the argument is
//! constructed and decides how the binder treats it:
//!
//! | direction     | device buffer | host -> device | device -> host |
//! |---------------|---------------|----------------|----------------|
//! | `Input`       | read-only     | at bind time   | no             |
//! | `InputOutput` | read-write    | at bind time   | on completion  |
//! | `Output`      | write-only    | no             | on completion  |
//! | `Local`       | scratch only  | no             | no             |
//! | `Scalar`      | none          | by value       | no             |

use bytemuck::Pod;
use smallvec::SmallVec;
use std::fmt;

/// Data-flow direction of a kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
    InputOutput,
    Local,
    Scalar,
}

impl Direction {
    /// Whether the argument is read back into host memory on completion.
    pub fn is_output(self) -> bool {
        matches!(self, Direction::Output | Direction::InputOutput)
    }

    /// Whether the argument is backed by a device buffer.
    pub fn is_buffer(self) -> bool {
        matches!(self, Direction::Input | Direction::Output | Direction::InputOutput)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Input => "input",
            Direction::Output => "output",
            Direction::InputOutput => "input-output",
            Direction::Local => "local",
            Direction::Scalar => "scalar",
        };
        f.write_str(name)
    }
}

pub(crate) type ScalarBytes = SmallVec<[u8; 16]>;

pub(crate) enum Payload<'a> {
    Input(&'a [u8]),
    Output(&'a mut [u8]),
    InputOutput(&'a mut [u8]),
    Local(usize),
    Scalar(ScalarBytes),
}

/// One positional argument of a kernel submission.
///
/// Host memory is borrowed for `'a`, which the returned
/// [`Completion`](crate::Completion) also carries: the borrow checker keeps
/// the memory alive and untouched until the task has been waited on or the
/// completion dropped.
pub struct KernelArg<'a> {
    payload: Payload<'a>,
}

impl<'a> KernelArg<'a> {
    /// Read-only data copied to the device when the task is submitted.
    pub fn input<T: Pod>(data: &'a [T]) -> Self {
        Self {
            payload: Payload::Input(bytemuck::cast_slice(data)),
        }
    }

    /// Write-only device data copied back into `data` on completion.
    pub fn output<T: Pod>(data: &'a mut [T]) -> Self {
        Self {
            payload: Payload::Output(bytemuck::cast_slice_mut(data)),
        }
    }

    /// Data copied to the device on submission and back on completion.
    pub fn input_output<T: Pod>(data: &'a mut [T]) -> Self {
        Self {
            payload: Payload::InputOutput(bytemuck::cast_slice_mut(data)),
        }
    }

    /// Work-group local scratch memory for `len` elements of `T`.
    pub fn local<T: Pod>(len: usize) -> Self {
        Self::local_bytes(len.saturating_mul(std::mem::size_of::<T>()))
    }

    /// Work-group local scratch memory of `size` bytes.
    pub fn local_bytes(size: usize) -> Self {
        Self {
            payload: Payload::Local(size),
        }
    }

    /// A value passed directly as a kernel parameter.
    pub fn scalar<T: Pod>(value: &T) -> Self {
        Self {
            payload: Payload::Scalar(SmallVec::from_slice(bytemuck::bytes_of(value))),
        }
    }

    pub fn direction(&self) -> Direction {
        match self.payload {
            Payload::Input(_) => Direction::Input,
            Payload::Output(_) => Direction::Output,
            Payload::InputOutput(_) => Direction::InputOutput,
            Payload::Local(_) => Direction::Local,
            Payload::Scalar(_) => Direction::Scalar,
        }
    }

    /// Size in bytes: buffer length, local reservation, or scalar width.
    pub fn size(&self) -> usize {
        match &self.payload {
            Payload::Input(data) => data.len(),
            Payload::Output(data) | Payload::InputOutput(data) => data.len(),
            Payload::Local(size) => *size,
            Payload::Scalar(bytes) => bytes.len(),
        }
    }

    pub(crate) fn into_payload(self) -> Payload<'a> {
        self.payload
    }
}

impl fmt::Debug for KernelArg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelArg")
            .field("direction", &self.direction())
            .field("size", &self.size())
            .finish()
    }
}
