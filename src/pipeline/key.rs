//! Strongly-typed pipeline cache keys.
//!
//! `wgpu` descriptor types (`ColorTargetState`, `VertexBufferLayout`, ...) do
//! not implement `Hash` / `Eq`. This module defines *mirror* types holding
//! the fields that decide pipeline identity.

use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use crate::resources::ids::ResourceId;

// ─── Hashable Mirror Types ────────────────────────────────────────────────────

/// Hashable mirror of `wgpu::BlendComponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponentKey {
    pub src_factor: wgpu::BlendFactor,
    pub dst_factor: wgpu::BlendFactor,
    pub operation: wgpu::BlendOperation,
}

impl From<wgpu::BlendComponent> for BlendComponentKey {
    fn from(b: wgpu::BlendComponent) -> Self {
        Self {
            src_factor: b.src_factor,
            dst_factor: b.dst_factor,
            operation: b.operation,
        }
    }
}

impl From<BlendComponentKey> for wgpu::BlendComponent {
    fn from(k: BlendComponentKey) -> Self {
        Self {
            src_factor: k.src_factor,
            dst_factor: k.dst_factor,
            operation: k.operation,
        }
    }
}

/// Hashable mirror of `wgpu::BlendState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateKey {
    pub color: BlendComponentKey,
    pub alpha: BlendComponentKey,
}

impl From<wgpu::BlendState> for BlendStateKey {
    fn from(b: wgpu::BlendState) -> Self {
        Self {
            color: b.color.into(),
            alpha: b.alpha.into(),
        }
    }
}

impl From<BlendStateKey> for wgpu::BlendState {
    fn from(k: BlendStateKey) -> Self {
        Self {
            color: k.color.into(),
            alpha: k.alpha.into(),
        }
    }
}

/// Hashable mirror of `wgpu::ColorTargetState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTargetKey {
    pub format: wgpu::TextureFormat,
    pub blend: Option<BlendStateKey>,
    pub write_mask: u32, // wgpu::ColorWrites bits
}

impl From<wgpu::ColorTargetState> for ColorTargetKey {
    fn from(c: wgpu::ColorTargetState) -> Self {
        Self {
            format: c.format,
            blend: c.blend.map(Into::into),
            write_mask: c.write_mask.bits(),
        }
    }
}

impl ColorTargetKey {
    #[must_use]
    pub fn to_wgpu(&self) -> wgpu::ColorTargetState {
        wgpu::ColorTargetState {
            format: self.format,
            blend: self.blend.map(Into::into),
            write_mask: wgpu::ColorWrites::from_bits_truncate(self.write_mask),
        }
    }
}

/// Hashable mirror of one `wgpu::VertexAttribute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttributeKey {
    pub format: wgpu::VertexFormat,
    pub offset: u64,
    pub shader_location: u32,
}

impl From<wgpu::VertexAttribute> for VertexAttributeKey {
    fn from(a: wgpu::VertexAttribute) -> Self {
        Self {
            format: a.format,
            offset: a.offset,
            shader_location: a.shader_location,
        }
    }
}

/// Shape of one vertex buffer slot: stride, step mode and attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayoutKey {
    pub array_stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: SmallVec<[VertexAttributeKey; 4]>,
}

impl VertexLayoutKey {
    /// Owned attribute list in `wgpu` form, kept alive for the descriptor.
    #[must_use]
    pub fn wgpu_attributes(&self) -> Vec<wgpu::VertexAttribute> {
        self.attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                format: a.format,
                offset: a.offset,
                shader_location: a.shader_location,
            })
            .collect()
    }
}

// ─── Pipeline Keys ────────────────────────────────────────────────────────────

/// Full identity of a draw pipeline.
///
/// `shader_hash` is the xxh3-128 of the final WGSL (prelude and fullscreen
/// vertex stage included), so two units with the same source share it.
/// Layout ids come from the shared layout cache and are equal exactly when
/// the layouts are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPipelineKey {
    pub shader_hash: u128,
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub topology: wgpu::PrimitiveTopology,
    pub strip_index_format: Option<wgpu::IndexFormat>,
    pub color_target: ColorTargetKey,
    pub indexed: bool,
    pub vertex_layouts: SmallVec<[VertexLayoutKey; 2]>,
    /// Dense, group 0 first.
    pub bind_group_layout_ids: SmallVec<[ResourceId; 4]>,
}

/// Full identity of a compute pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputePipelineKey {
    pub shader_hash: u128,
    pub entry_point: String,
    pub bind_group_layout_ids: SmallVec<[ResourceId; 4]>,
}

// ─── Convenience helpers ──────────────────────────────────────────────────────

/// Compute a `u64` hash of any `Hash`-able value using `FxHasher`.
#[inline]
pub fn fx_hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(topology: wgpu::PrimitiveTopology, blend: Option<wgpu::BlendState>) -> RenderPipelineKey {
        RenderPipelineKey {
            shader_hash: 7,
            vertex_entry: "vs".into(),
            fragment_entry: "fs".into(),
            topology,
            strip_index_format: None,
            color_target: wgpu::ColorTargetState {
                format: wgpu::TextureFormat::Rgba8Unorm,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            }
            .into(),
            indexed: false,
            vertex_layouts: SmallVec::new(),
            bind_group_layout_ids: SmallVec::from_slice(&[1, 2]),
        }
    }

    #[test]
    fn equal_state_hashes_equal() {
        let a = key(wgpu::PrimitiveTopology::TriangleList, Some(wgpu::BlendState::ALPHA_BLENDING));
        let b = key(wgpu::PrimitiveTopology::TriangleList, Some(wgpu::BlendState::ALPHA_BLENDING));
        assert_eq!(a, b);
        assert_eq!(fx_hash_key(&a), fx_hash_key(&b));
    }

    #[test]
    fn topology_and_blend_change_the_key() {
        let base = key(wgpu::PrimitiveTopology::TriangleList, None);
        assert_ne!(base, key(wgpu::PrimitiveTopology::LineList, None));
        assert_ne!(base, key(wgpu::PrimitiveTopology::TriangleList, Some(wgpu::BlendState::REPLACE)));
    }

    #[test]
    fn blend_mirror_round_trips() {
        let blend = wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING;
        let back: wgpu::BlendState = BlendStateKey::from(blend).into();
        assert_eq!(back, blend);
    }
}
