//! Kernels and their native bodies.

use super::program::{Param, Program};
use super::range::Geometry;
use super::DeviceBuffer;
use crate::arg::ScalarBytes;
use crate::error::{Error, Result};
use bytemuck::Pod;
use parking_lot::MutexGuard;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_KERNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Native body of a kernel, invoked once per work-item.
pub type KernelFn = dyn Fn(&WorkItem, &mut KernelArgs<'_>) + Send + Sync;

/// Native kernel bodies by entry-point name.
///
/// Programs built on the host device link each `__kernel` definition to the
/// body registered under the same name.
#[derive(Clone, Default)]
pub struct KernelLibrary {
    bodies: HashMap<String, Arc<KernelFn>>,
}

impl KernelLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `body` under `name`, replacing any earlier registration.
    pub fn register<F>(&mut self, name: &str, body: F)
    where
        F: Fn(&WorkItem, &mut KernelArgs<'_>) + Send + Sync + 'static,
    {
        self.bodies.insert(name.to_string(), Arc::new(body));
    }

    pub fn with<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn(&WorkItem, &mut KernelArgs<'_>) + Send + Sync + 'static,
    {
        self.register(name, body);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<KernelFn>> {
        self.bodies.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bodies.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bodies.keys().map(String::as_str)
    }
}

impl fmt::Debug for KernelLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("KernelLibrary").field("kernels", &names).finish()
    }
}

/// Ids and sizes of the work-item being executed.
///
/// Dimension queries past the launch's dimension count return 0 for ids and
/// 1 for sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    dims: usize,
    global_id: [usize; 3],
    local_id: [usize; 3],
    group_id: [usize; 3],
    geometry: Geometry,
}

impl WorkItem {
    fn id(&self, values: &[usize; 3], dim: usize) -> usize {
        if dim < self.dims {
            values[dim]
        } else {
            0
        }
    }

    fn size(&self, values: &[usize; 3], dim: usize) -> usize {
        if dim < self.dims {
            values[dim]
        } else {
            1
        }
    }

    pub fn work_dim(&self) -> usize {
        self.dims
    }

    /// Global id, including the launch offset.
    pub fn global_id(&self, dim: usize) -> usize {
        self.id(&self.global_id, dim)
    }

    pub fn local_id(&self, dim: usize) -> usize {
        self.id(&self.local_id, dim)
    }

    pub fn group_id(&self, dim: usize) -> usize {
        self.id(&self.group_id, dim)
    }

    pub fn global_offset(&self, dim: usize) -> usize {
        self.id(&self.geometry.offset, dim)
    }

    pub fn global_size(&self, dim: usize) -> usize {
        self.size(&self.geometry.global, dim)
    }

    pub fn local_size(&self, dim: usize) -> usize {
        self.size(&self.geometry.local, dim)
    }

    pub fn num_groups(&self, dim: usize) -> usize {
        self.size(&self.geometry.num_groups(), dim)
    }

    /// Row-major index of the work-item within the global range, offset
    /// excluded.
    pub fn global_linear_id(&self) -> usize {
        let g = &self.geometry.global;
        let rel = |d: usize| self.global_id[d] - self.geometry.offset[d];
        (rel(2) * g[1] + rel(1)) * g[0] + rel(0)
    }
}

/// A kernel argument as bound on the device.
#[derive(Debug, Clone)]
pub(crate) enum ArgValue {
    Buffer(DeviceBuffer),
    Local(usize),
    Scalar(ScalarBytes),
}

enum Slot<'a> {
    Buffer {
        data: MutexGuard<'a, Vec<u8>>,
        writable: bool,
    },
    Local(Vec<u8>),
    Scalar(&'a [u8]),
}

/// Argument access for a kernel body.
///
/// Element accessors index in units of `T` and panic on out-of-bounds
/// access, on writes to read-only memory and on kind mismatches. A panic
/// fails the launch.
pub struct KernelArgs<'a> {
    slots: Vec<Slot<'a>>,
    program: &'a Program,
}

impl<'a> KernelArgs<'a> {
    fn new(values: &'a [ArgValue], program: &'a Program) -> Self {
        let slots = values
            .iter()
            .map(|value| match value {
                ArgValue::Buffer(buffer) => Slot::Buffer {
                    writable: buffer.access().is_writable(),
                    data: buffer.lock(),
                },
                ArgValue::Local(size) => Slot::Local(vec![0; *size]),
                ArgValue::Scalar(bytes) => Slot::Scalar(bytes.as_slice()),
            })
            .collect();

        Self { slots, program }
    }

    fn reset_locals(&mut self) {
        for slot in &mut self.slots {
            if let Slot::Local(data) = slot {
                data.fill(0);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Raw bytes of a buffer, local or scalar argument.
    pub fn bytes(&self, index: usize) -> &[u8] {
        match self.slot(index) {
            Slot::Buffer { data, .. } => data.as_slice(),
            Slot::Local(data) => data.as_slice(),
            Slot::Scalar(bytes) => *bytes,
        }
    }

    pub fn bytes_mut(&mut self, index: usize) -> &mut [u8] {
        match self.slot_mut(index) {
            Slot::Buffer { data, writable: true } => data.as_mut_slice(),
            Slot::Buffer { writable: false, .. } => panic!("argument {} is read-only", index),
            Slot::Local(data) => data.as_mut_slice(),
            Slot::Scalar(_) => panic!("argument {} is a scalar", index),
        }
    }

    /// Number of whole `T` elements in a buffer or local argument.
    pub fn elements<T: Pod>(&self, index: usize) -> usize {
        match std::mem::size_of::<T>() {
            0 => 0,
            size => self.bytes(index).len() / size,
        }
    }

    pub fn read<T: Pod>(&self, index: usize, element: usize) -> T {
        let size = std::mem::size_of::<T>();
        let bytes = self.bytes(index);
        let start = element * size;
        match bytes.get(start..start + size) {
            Some(chunk) => bytemuck::pod_read_unaligned(chunk),
            None => panic!(
                "read of element {} out of bounds for argument {} ({} bytes)",
                element,
                index,
                bytes.len()
            ),
        }
    }

    pub fn write<T: Pod>(&mut self, index: usize, element: usize, value: T) {
        let size = std::mem::size_of::<T>();
        let bytes = self.bytes_mut(index);
        let len = bytes.len();
        let start = element * size;
        match bytes.get_mut(start..start + size) {
            Some(chunk) => chunk.copy_from_slice(bytemuck::bytes_of(&value)),
            None => panic!(
                "write of element {} out of bounds for argument {} ({} bytes)",
                element, index, len
            ),
        }
    }

    /// Value of a scalar argument.
    pub fn scalar<T: Pod>(&self, index: usize) -> T {
        match self.slot(index) {
            Slot::Scalar(bytes) if bytes.len() == std::mem::size_of::<T>() => {
                bytemuck::pod_read_unaligned(bytes)
            }
            Slot::Scalar(bytes) => panic!(
                "scalar argument {} has {} bytes, requested {}",
                index,
                bytes.len(),
                std::mem::size_of::<T>()
            ),
            _ => panic!("argument {} is not a scalar", index),
        }
    }

    /// Value of a macro defined by the build options or the program source.
    pub fn define(&self, name: &str) -> Option<&str> {
        self.program.defines().get(name).map(String::as_str)
    }

    pub fn define_or<T: FromStr>(&self, name: &str, default: T) -> T {
        self.define(name)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    fn slot(&self, index: usize) -> &Slot<'a> {
        match self.slots.get(index) {
            Some(slot) => slot,
            None => panic!(
                "argument index {} out of range ({} arguments)",
                index,
                self.slots.len()
            ),
        }
    }

    fn slot_mut(&mut self, index: usize) -> &mut Slot<'a> {
        let len = self.slots.len();
        match self.slots.get_mut(index) {
            Some(slot) => slot,
            None => panic!("argument index {} out of range ({} arguments)", index, len),
        }
    }
}

impl fmt::Debug for KernelArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelArgs")
            .field("len", &self.slots.len())
            .field("program", &self.program.source_id())
            .finish()
    }
}

/// An entry point of a built program.
pub struct Kernel {
    id: u64,
    name: String,
    program: Arc<Program>,
    body: Arc<KernelFn>,
}

impl Kernel {
    pub fn create(program: &Arc<Program>, name: &str) -> Result<Kernel> {
        let not_found = || Error::KernelNotFound {
            source_id: program.source_id().to_string(),
            entry: name.to_string(),
        };
        if program.declaration(name).is_none() {
            return Err(not_found());
        }
        let body = program.body(name).ok_or_else(not_found)?;

        Ok(Kernel {
            id: NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            program: Arc::clone(program),
            body,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn params(&self) -> &[Param] {
        self.program
            .declaration(&self.name)
            .map(|decl| decl.params.as_slice())
            .unwrap_or(&[])
    }

    pub fn num_args(&self) -> usize {
        self.params().len()
    }

    /// Bytes of `__local` memory a launch with `args` reserves per work-group,
    /// or `None` if the total does not fit in `usize`.
    pub(crate) fn local_mem_usage(&self, args: &[ArgValue]) -> Option<usize> {
        args.iter().try_fold(0usize, |total, arg| match arg {
            ArgValue::Local(size) => total.checked_add(*size),
            _ => Some(total),
        })
    }

    /// Execute every work-item of `geometry`, group by group. Panics raised
    /// by the body propagate to the caller.
    pub(crate) fn run(&self, args: &[ArgValue], geometry: &Geometry) {
        let mut kernel_args = KernelArgs::new(args, &self.program);
        let groups = geometry.num_groups();
        let local = geometry.local;

        for gz in 0..groups[2] {
            for gy in 0..groups[1] {
                for gx in 0..groups[0] {
                    kernel_args.reset_locals();
                    let group_id = [gx, gy, gz];

                    for lz in 0..local[2] {
                        for ly in 0..local[1] {
                            for lx in 0..local[0] {
                                let local_id = [lx, ly, lz];
                                let global_id = [
                                    geometry.offset[0] + gx * local[0] + lx,
                                    geometry.offset[1] + gy * local[1] + ly,
                                    geometry.offset[2] + gz * local[2] + lz,
                                ];
                                let item = WorkItem {
                                    dims: geometry.dims,
                                    global_id,
                                    local_id,
                                    group_id,
                                    geometry: *geometry,
                                };
                                (self.body)(&item, &mut kernel_args);
                            }
                        }
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("program", &self.program.source_id())
            .finish()
    }
}
