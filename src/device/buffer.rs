//! Device memory buffers.

use super::{DeviceContext, Status};
use crate::error::{Error, Result};
use crate::telemetry::Metrics;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// Kernel-side access rights of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl MemAccess {
    pub fn is_writable(self) -> bool {
        !matches!(self, MemAccess::ReadOnly)
    }
}

struct BufferInner {
    data: Mutex<Vec<u8>>,
    access: MemAccess,
    size: usize,
    metrics: Arc<Metrics>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        self.metrics.record_release(self.size);
    }
}

/// Device-resident memory region.
///
/// Cloning shares the same memory; it is released when the last clone is
/// dropped.
#[derive(Clone)]
pub struct DeviceBuffer {
    inner: Arc<BufferInner>,
}

impl DeviceBuffer {
    /// Allocate `size` bytes. Contents are unspecified until written.
    pub(crate) fn new(context: &DeviceContext, size: usize, access: MemAccess) -> Result<Self> {
        let data = Self::allocate(context, size)?;
        Ok(Self::from_parts(context, data, access))
    }

    /// Allocate a buffer and fill it from host memory as one step.
    pub(crate) fn with_host_data(
        context: &DeviceContext,
        access: MemAccess,
        host: &[u8],
    ) -> Result<Self> {
        let mut data = Self::allocate(context, host.len())?;
        data.copy_from_slice(host);
        context.metrics.record_upload(host.len());
        Ok(Self::from_parts(context, data, access))
    }

    fn allocate(context: &DeviceContext, size: usize) -> Result<Vec<u8>> {
        if size == 0 {
            return Err(Error::submission(Status::InvalidBufferSize, "buffer size must be nonzero"));
        }

        let limit = context.device.max_mem_alloc_size;
        if size as u64 > limit {
            return Err(Error::submission(
                Status::InvalidBufferSize,
                format!("buffer of {} bytes exceeds max allocation of {} bytes", size, limit),
            ));
        }

        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|e| {
            Error::submission(
                Status::MemObjectAllocationFailure,
                format!("failed to allocate {} bytes: {}", size, e),
            )
        })?;
        data.resize(size, 0);
        Ok(data)
    }

    fn from_parts(context: &DeviceContext, data: Vec<u8>, access: MemAccess) -> Self {
        let size = data.len();
        context.metrics.record_allocation(size);

        Self {
            inner: Arc::new(BufferInner {
                data: Mutex::new(data),
                access,
                size,
                metrics: Arc::clone(&context.metrics),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.size
    }

    pub fn is_empty(&self) -> bool {
        self.inner.size == 0
    }

    pub fn access(&self) -> MemAccess {
        self.inner.access
    }

    /// Whether both handles refer to the same device memory.
    pub fn same_memory(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.data.lock()
    }

    /// Copy device contents into `dst`, resizing it to the buffer length.
    pub(crate) fn read_into(&self, dst: &mut Vec<u8>) {
        let data = self.inner.data.lock();
        dst.clear();
        dst.extend_from_slice(&data);
        self.inner.metrics.record_download(data.len());
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("size", &self.inner.size)
            .field("access", &self.inner.access)
            .finish()
    }
}
