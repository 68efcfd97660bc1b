use std::{ptr::NonNull, slice, sync::Arc};

use log::{trace, warn};

use crate::device::Device;

/// Memory-mapped region of one buffer plane
///
/// The backing memory belongs to the driver and is shared with the hardware. It is mapped into
/// the process when the pool is allocated and the destructor unmaps it again, so a mapping can
/// never outlive the pool that created it, no matter which path tears the pool down.
pub struct Mapping<D: Device> {
    device: Arc<D>,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is owned by this mapping alone and unmapped exactly once in Drop. It is
// only read through `bytes`, for buffers the consumer currently owns, so moving the mapping to
// another thread cannot race with the driver.
unsafe impl<D: Device + Send + Sync> Send for Mapping<D> {}

impl<D: Device> Mapping<D> {
    /// Maps `len` bytes at the driver supplied `offset`
    pub fn new(device: &Arc<D>, offset: u32, len: usize) -> std::io::Result<Self> {
        let ptr = device.map(offset, len)?;
        trace!("mapped {} bytes at offset {:#x} to {:p}", len, offset, ptr);
        Ok(Mapping {
            device: Arc::clone(device),
            ptr,
            len,
        })
    }

    /// Length of the mapping in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start address of the mapping
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Read-only view of the first `len` bytes
    ///
    /// Only called for buffers the consumer currently owns; the driver does not write into
    /// those until they are queued again.
    pub(crate) fn bytes(&self, len: usize) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), len.min(self.len)) }
    }
}

impl<D: Device> Drop for Mapping<D> {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.unmap(self.ptr, self.len) } {
            // nothing sensible is left to do with a region the kernel refuses to unmap
            warn!("failed to unmap {:p} ({} bytes): {}", self.ptr, self.len, e);
        }
    }
}
