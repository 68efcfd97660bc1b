use std::{fmt, io, sync::Arc};

use log::{debug, warn};

use crate::buffer::{Layout, Type};
use crate::device::{retry, Device};
use crate::error::{Error, Result};
use crate::memory::Mapping;

/// One device buffer mapped into the process
///
/// The variant is fixed by the buffer type chosen when the device was opened.
pub enum MappedBuffer<D: Device> {
    SinglePlane(Mapping<D>),
    MultiPlane(Vec<Mapping<D>>),
}

impl<D: Device> MappedBuffer<D> {
    fn map(device: &Arc<D>, layout: &Layout) -> io::Result<Self> {
        match layout {
            Layout::SinglePlane(plane) => Ok(MappedBuffer::SinglePlane(Mapping::new(
                device,
                plane.offset,
                plane.length as usize,
            )?)),
            Layout::MultiPlane(planes) => {
                // a failing plane drops the ones mapped before it
                let mappings = planes
                    .iter()
                    .map(|plane| Mapping::new(device, plane.offset, plane.length as usize))
                    .collect::<io::Result<Vec<_>>>()?;
                Ok(MappedBuffer::MultiPlane(mappings))
            }
        }
    }

    /// Mapped planes; a single entry for single-planar buffers
    pub fn planes(&self) -> &[Mapping<D>] {
        match self {
            MappedBuffer::SinglePlane(mapping) => std::slice::from_ref(mapping),
            MappedBuffer::MultiPlane(mappings) => mappings,
        }
    }

    /// Mapped length of each plane
    pub fn lengths(&self) -> Vec<usize> {
        self.planes().iter().map(Mapping::len).collect()
    }
}

impl<D: Device> fmt::Debug for MappedBuffer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let planes: Vec<_> = self
            .planes()
            .iter()
            .map(|m| (m.as_ptr(), m.len()))
            .collect();
        match self {
            MappedBuffer::SinglePlane(_) => {
                f.debug_tuple("SinglePlane").field(&planes[0]).finish()
            }
            MappedBuffer::MultiPlane(_) => f.debug_tuple("MultiPlane").field(&planes).finish(),
        }
    }
}

/// Which party may currently touch a buffer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// Mapped but not queued; the state between allocation and streaming
    Unqueued,
    /// Queued; the driver may write into it
    Device,
    /// Dequeued; the consumer may read it
    Consumer,
}

/// Fixed set of mapped buffers belonging to one session
///
/// Buffer indices match the driver's indices and stay valid for the life of the pool. Dropping
/// the pool unmaps every buffer; [`BufferPool::free`] additionally hands the memory back to the
/// driver.
pub struct BufferPool<D: Device> {
    buffers: Vec<MappedBuffer<D>>,
    owners: Vec<Ownership>,
}

impl<D: Device> BufferPool<D> {
    /// Requests `count` buffers from the driver and maps all of them
    ///
    /// The driver may grant more buffers than requested, in which case all of them are mapped.
    /// Either every granted buffer is mapped or none is: on failure the buffers mapped so far are
    /// unmapped and the driver's pool is freed before the error is returned.
    ///
    /// # Arguments
    ///
    /// * `device` - Device to allocate from
    /// * `typ` - Buffer type selected on open
    /// * `count` - Minimum number of buffers
    /// * `planes` - Planes per buffer of the applied format
    pub fn allocate(device: &Arc<D>, typ: Type, count: u32, planes: usize) -> Result<Self> {
        let granted = retry("VIDIOC_REQBUFS", || device.request_buffers(typ, count))
            .map_err(|source| Error::BufferAllocationFailed {
                index: None,
                source,
            })?;

        if granted < count || granted == 0 {
            Self::release_pool(&**device, typ);
            return Err(Error::BufferAllocationFailed {
                index: None,
                source: io::Error::new(
                    io::ErrorKind::OutOfMemory,
                    format!("driver granted {} of {} buffers", granted, count),
                ),
            });
        }
        debug!("driver granted {} buffers (requested {})", granted, count);

        let mut buffers = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            match Self::map_one(device, typ, index, planes) {
                Ok(buffer) => {
                    debug!("buffer {}: {:?}", index, buffer);
                    buffers.push(buffer);
                }
                Err(source) => {
                    // unmap everything mapped so far before giving the memory back
                    drop(buffers);
                    Self::release_pool(&**device, typ);
                    return Err(Error::BufferAllocationFailed {
                        index: Some(index),
                        source,
                    });
                }
            }
        }

        Ok(BufferPool {
            owners: vec![Ownership::Unqueued; buffers.len()],
            buffers,
        })
    }

    fn map_one(
        device: &Arc<D>,
        typ: Type,
        index: u32,
        planes: usize,
    ) -> io::Result<MappedBuffer<D>> {
        let layout = retry("VIDIOC_QUERYBUF", || device.query_buffer(typ, index, planes))?;
        if typ.is_multiplanar() && layout.planes().len() != planes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "buffer reports {} planes, format has {}",
                    layout.planes().len(),
                    planes
                ),
            ));
        }
        MappedBuffer::map(device, &layout)
    }

    fn release_pool(device: &D, typ: Type) {
        if let Err(e) = retry("VIDIOC_REQBUFS", || device.request_buffers(typ, 0)) {
            warn!("failed to free driver buffers: {}", e);
        }
    }

    /// Unmaps every buffer and frees the driver's pool
    pub fn free(self, device: &D, typ: Type) {
        let count = self.buffers.len();
        drop(self);
        Self::release_pool(device, typ);
        debug!("released {} buffers", count);
    }

    /// Number of buffers in the pool
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MappedBuffer<D>> {
        self.buffers.get(index)
    }

    pub fn owner(&self, index: usize) -> Option<Ownership> {
        self.owners.get(index).copied()
    }

    pub(crate) fn set_owner(&mut self, index: usize, owner: Ownership) {
        self.owners[index] = owner;
    }

    pub(crate) fn set_all(&mut self, owner: Ownership) {
        self.owners.iter_mut().for_each(|o| *o = owner);
    }

    /// Number of buffers currently held by the consumer
    pub fn outstanding(&self) -> usize {
        self.owners
            .iter()
            .filter(|&&o| o == Ownership::Consumer)
            .count()
    }
}

impl<D: Device> fmt::Debug for BufferPool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffers", &self.buffers)
            .field("owners", &self.owners)
            .finish()
    }
}
