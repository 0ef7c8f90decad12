//! Storage Buffers
//!
//! Fixed-size linear GPU memory. A buffer can be bound as a storage buffer
//! and also doubles as vertex or index memory for draw units. Writes larger
//! than the buffer are rejected; the buffer never grows implicitly.

use bytemuck::Pod;
use slotmap::{Key, SlotMap};

use crate::context::Context;
use crate::errors::{Result, ShadeError};
use crate::resources::ids::{ResourceId, generate_resource_id};
use crate::resources::readback::{MapWait, map_read};
use crate::telemetry::{self, EventField, EventKind, EventPhase, TelemetryEvent};
use crate::uniforms::UniformValue;

slotmap::new_key_type! {
    /// Slot key of a physical buffer.
    pub struct BufferKey;
}

/// Stable handle to a storage buffer owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageRef(pub(crate) BufferKey);

impl StorageRef {
    #[must_use]
    pub fn id(self) -> u64 {
        self.0.data().as_ffi()
    }
}

pub(crate) struct PhysicalBuffer {
    pub buffer: wgpu::Buffer,
    pub resource_id: ResourceId,
    pub size: u64,
}

#[derive(Default)]
pub(crate) struct BufferArena {
    slots: SlotMap<BufferKey, PhysicalBuffer>,
}

impl BufferArena {
    pub fn insert(&mut self, buffer: PhysicalBuffer) -> StorageRef {
        StorageRef(self.slots.insert(buffer))
    }

    pub fn get(&self, handle: StorageRef) -> Result<&PhysicalBuffer> {
        self.slots
            .get(handle.0)
            .ok_or(ShadeError::StaleHandle("storage buffer"))
    }

    pub fn remove(&mut self, handle: StorageRef) -> bool {
        match self.slots.remove(handle.0) {
            Some(old) => {
                old.buffer.destroy();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        for (_, buffer) in self.slots.drain() {
            buffer.buffer.destroy();
        }
    }
}

const STORAGE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::VERTEX)
    .union(wgpu::BufferUsages::INDEX)
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Handle to linear GPU memory with a fixed byte length.
///
/// Cloning shares the buffer; [`dispose`](Self::dispose) through any clone
/// invalidates all of them.
#[derive(Clone)]
pub struct StorageBuffer {
    ctx: Context,
    handle: StorageRef,
    byte_length: u64,
    label: Option<String>,
}

impl std::fmt::Debug for StorageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBuffer")
            .field("handle", &self.handle)
            .field("byte_length", &self.byte_length)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl StorageBuffer {
    /// Allocates `byte_length` zeroed bytes. The GPU allocation is rounded
    /// up to a multiple of 4; the usable length is exactly `byte_length`.
    pub fn new(ctx: &Context, byte_length: u64, label: Option<&str>) -> Result<Self> {
        let inner = ctx.inner();
        inner.ensure_alive()?;

        let limits = inner.device.limits();
        let limit = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        if byte_length == 0 || byte_length > limit {
            return Err(ShadeError::InvalidBufferSize {
                requested: byte_length,
                limit,
            });
        }
        let size = byte_length.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);

        let buffer = inner.device.create_buffer(&wgpu::BufferDescriptor {
            label,
            size,
            usage: STORAGE_USAGE,
            mapped_at_creation: false,
        });
        let handle = inner.buffers.write().insert(PhysicalBuffer {
            buffer,
            resource_id: generate_resource_id(),
            size,
        });
        log::debug!("storage buffer {:?} allocated ({size} bytes)", label.unwrap_or("unnamed"));

        Ok(Self {
            ctx: ctx.clone(),
            handle,
            byte_length,
            label: label.map(str::to_owned),
        })
    }

    /// Allocates a buffer sized for `data` and uploads it.
    pub fn with_data(ctx: &Context, data: &[u8], label: Option<&str>) -> Result<Self> {
        let buffer = Self::new(ctx, data.len() as u64, label)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Typed variant of [`with_data`](Self::with_data).
    pub fn from_pod<T: Pod>(ctx: &Context, data: &[T], label: Option<&str>) -> Result<Self> {
        Self::with_data(ctx, bytemuck::cast_slice(data), label)
    }

    #[must_use]
    pub fn handle(&self) -> StorageRef {
        self.handle
    }

    /// Fixed size in bytes, as requested at creation.
    #[must_use]
    pub fn byte_length(&self) -> u64 {
        self.byte_length
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Uploads `data` at offset 0.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.write_at(0, data)
    }

    /// Uploads `data` at `offset` bytes; the offset must be 4-byte aligned.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let inner = self.ctx.inner();
        inner.ensure_alive()?;

        let len = data.len() as u64;
        if offset + len > self.byte_length {
            return Err(ShadeError::StorageOverflow {
                len: offset + len,
                capacity: self.byte_length,
            });
        }
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(ShadeError::InvalidBufferSize {
                requested: offset,
                limit: self.byte_length,
            });
        }

        let buffers = inner.buffers.read();
        let physical = buffers.get(self.handle)?;
        if len % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            inner.queue.write_buffer(&physical.buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(len.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT) as usize, 0);
            inner.queue.write_buffer(&physical.buffer, offset, &padded);
        }
        Ok(())
    }

    /// Uploads a slice of plain-old-data values at offset 0.
    pub fn write_pod<T: Pod>(&self, data: &[T]) -> Result<()> {
        self.write(bytemuck::cast_slice(data))
    }

    /// Copies the whole buffer back to the host without blocking the
    /// calling thread.
    pub async fn read(&self) -> Result<Vec<u8>> {
        self.read_with(MapWait::Yield).await
    }

    /// Blocks until the copy has landed and returns the contents.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn read_blocking(&self) -> Result<Vec<u8>> {
        pollster::block_on(self.read_with(MapWait::Block))
    }

    async fn read_with(&self, wait: MapWait) -> Result<Vec<u8>> {
        let inner = self.ctx.inner();
        inner.ensure_alive()?;

        let allocated = self.byte_length.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let staging = inner.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Storage Readback"),
            size: allocated,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        {
            let buffers = inner.buffers.read();
            let physical = buffers.get(self.handle)?;
            let mut encoder = inner
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Storage Readback Encoder"),
                });
            encoder.copy_buffer_to_buffer(&physical.buffer, 0, &staging, 0, allocated);
            inner.queue.submit(std::iter::once(encoder.finish()));
        }

        let mut data = map_read(&inner.device, &staging, wait).await?;
        data.truncate(self.byte_length as usize);
        telemetry::emit(
            TelemetryEvent::new(EventKind::Readback, EventPhase::Instant)
                .with_label(self.label.as_deref())
                .with_field(EventField::Bytes(self.byte_length)),
        );
        Ok(data)
    }

    /// Typed variant of [`read`](Self::read).
    pub async fn read_pod<T: Pod>(&self) -> Result<Vec<T>> {
        let bytes = self.read().await?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Frees the GPU memory. Later use of any clone fails with `StaleHandle`.
    pub fn dispose(&self) {
        if self.ctx.inner().buffers.write().remove(self.handle) {
            log::debug!("storage buffer {:?} disposed", self.label.as_deref().unwrap_or("unnamed"));
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.ctx.inner().buffers.read().get(self.handle).is_err()
    }
}

impl From<&StorageBuffer> for UniformValue {
    fn from(buffer: &StorageBuffer) -> Self {
        UniformValue::Storage(buffer.handle)
    }
}
