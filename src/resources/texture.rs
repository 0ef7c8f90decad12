//! Texture arena and resize-stable texture references.
//!
//! A [`TextureRef`] is a generation-counted slot key. The slot holds whatever
//! physical texture is current; resizing swaps the slot's contents without
//! touching the key, and disposing frees the slot so old keys are rejected.

use slotmap::{Key, SlotMap};

use crate::errors::{Result, ShadeError};
use crate::resources::ids::{ResourceId, generate_resource_id};

slotmap::new_key_type! {
    /// Slot key of a physical texture.
    pub struct TextureKey;
}

/// Stable logical handle to a texture owned by a [`Context`](crate::Context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureRef(pub(crate) TextureKey);

impl TextureRef {
    /// Opaque numeric id, stable across resizes.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0.data().as_ffi()
    }
}

/// The currently allocated texture behind a [`TextureRef`].
#[derive(Debug)]
pub(crate) struct PhysicalTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub resource_id: ResourceId,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

impl PhysicalTexture {
    pub fn create(
        device: &wgpu::Device,
        label: Option<&str>,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label,
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            resource_id: generate_resource_id(),
            width: width.max(1),
            height: height.max(1),
            format,
            usage,
        }
    }
}

#[derive(Default)]
pub(crate) struct TextureArena {
    slots: SlotMap<TextureKey, PhysicalTexture>,
}

impl TextureArena {
    pub fn insert(&mut self, texture: PhysicalTexture) -> TextureRef {
        TextureRef(self.slots.insert(texture))
    }

    pub fn get(&self, handle: TextureRef) -> Result<&PhysicalTexture> {
        self.slots
            .get(handle.0)
            .ok_or(ShadeError::StaleHandle("texture"))
    }

    /// Installs a new physical texture behind `handle` and destroys the old one.
    pub fn replace(&mut self, handle: TextureRef, texture: PhysicalTexture) -> Result<()> {
        let slot = self
            .slots
            .get_mut(handle.0)
            .ok_or(ShadeError::StaleHandle("texture"))?;
        let old = std::mem::replace(slot, texture);
        old.texture.destroy();
        Ok(())
    }

    pub fn remove(&mut self, handle: TextureRef) -> bool {
        match self.slots.remove(handle.0) {
            Some(old) => {
                old.texture.destroy();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        for (_, texture) in self.slots.drain() {
            texture.texture.destroy();
        }
    }
}
