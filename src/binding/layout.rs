//! Bind group layout derivation.
//!
//! Turns a [`BindingDeclaration`] plus what is actually bound to it into a
//! `wgpu::BindGroupLayoutEntry`. The declaration supplies the shape (view
//! dimension, storage texel format, access); the bound resource supplies
//! what WGSL text cannot, such as whether a float texture is filterable.

use rustc_hash::FxHashMap;

use crate::binding::parser::{BindingDeclaration, BindingKind};
use crate::errors::{Result, ShadeError};
use crate::resources::ids::{ResourceId, generate_resource_id};

/// Pipeline family a layout entry is derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageSet {
    Draw,
    Compute,
}

/// What a declaration resolved to, as far as the layout is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundResource {
    Buffer,
    Texture {
        format: wgpu::TextureFormat,
        features: wgpu::Features,
    },
    Sampler {
        filtering: bool,
        comparison: bool,
    },
}

/// Builds the layout entry for `decl` bound to `bound`.
pub fn layout_entry(
    decl: &BindingDeclaration,
    bound: BoundResource,
    stages: StageSet,
) -> Result<wgpu::BindGroupLayoutEntry> {
    Ok(wgpu::BindGroupLayoutEntry {
        binding: decl.binding,
        visibility: visibility(decl.kind, stages),
        ty: binding_type(decl, bound)?,
        count: None,
    })
}

/// Writable resources are invisible to the vertex stage.
#[must_use]
pub fn visibility(kind: BindingKind, stages: StageSet) -> wgpu::ShaderStages {
    match stages {
        StageSet::Compute => wgpu::ShaderStages::COMPUTE,
        StageSet::Draw => match kind {
            BindingKind::StorageReadWrite | BindingKind::StorageTexture => wgpu::ShaderStages::FRAGMENT,
            _ => wgpu::ShaderStages::VERTEX_FRAGMENT,
        },
    }
}

pub fn binding_type(decl: &BindingDeclaration, bound: BoundResource) -> Result<wgpu::BindingType> {
    let incompatible = |reason: String| ShadeError::IncompatibleResource {
        name: decl.name.clone(),
        reason,
    };

    match decl.kind {
        BindingKind::Uniform => Ok(buffer(wgpu::BufferBindingType::Uniform)),
        BindingKind::StorageReadOnly => Ok(buffer(wgpu::BufferBindingType::Storage { read_only: true })),
        BindingKind::StorageReadWrite => Ok(buffer(wgpu::BufferBindingType::Storage { read_only: false })),

        BindingKind::SampledTexture => {
            let BoundResource::Texture { format, features } = bound else {
                return Err(incompatible("expected a texture".to_owned()));
            };
            let (base, params) = split_generic(&decl.ty);
            let (view_dimension, multisampled, depth) = sampled_shape(base)
                .ok_or_else(|| incompatible(format!("unsupported texture type `{}`", decl.ty)))?;

            let bound_type = format
                .sample_type(None, Some(features))
                .ok_or_else(|| incompatible(format!("format {format:?} cannot be sampled")))?;

            let sample_type = if depth {
                if !matches!(bound_type, wgpu::TextureSampleType::Depth) {
                    return Err(incompatible(format!("format {format:?} is not a depth format")));
                }
                wgpu::TextureSampleType::Depth
            } else {
                match (params.first().copied(), bound_type) {
                    (Some("f32"), wgpu::TextureSampleType::Float { filterable }) => {
                        wgpu::TextureSampleType::Float {
                            filterable: filterable && !multisampled,
                        }
                    }
                    (Some("i32"), wgpu::TextureSampleType::Sint) => wgpu::TextureSampleType::Sint,
                    (Some("u32"), wgpu::TextureSampleType::Uint) => wgpu::TextureSampleType::Uint,
                    (Some(scalar), _) => {
                        return Err(incompatible(format!(
                            "`texture<{scalar}>` cannot read texels of format {format:?}"
                        )));
                    }
                    (None, _) => {
                        return Err(incompatible(format!("texture type `{}` has no sample type", decl.ty)));
                    }
                }
            };

            Ok(wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled,
            })
        }

        BindingKind::StorageTexture => {
            let BoundResource::Texture { format, .. } = bound else {
                return Err(incompatible("expected a texture".to_owned()));
            };
            let (base, params) = split_generic(&decl.ty);
            let view_dimension = storage_dimension(base)
                .ok_or_else(|| incompatible(format!("unsupported storage texture type `{}`", decl.ty)))?;
            let declared = params
                .first()
                .and_then(|name| storage_texel_format(name))
                .ok_or_else(|| incompatible(format!("unsupported texel format in `{}`", decl.ty)))?;
            if declared != format {
                return Err(incompatible(format!(
                    "shader declares {declared:?} but the bound texture is {format:?}"
                )));
            }
            let access = match params.get(1).copied() {
                Some("write") | None => wgpu::StorageTextureAccess::WriteOnly,
                Some("read") => wgpu::StorageTextureAccess::ReadOnly,
                Some("read_write") => wgpu::StorageTextureAccess::ReadWrite,
                Some(other) => return Err(incompatible(format!("unknown access mode `{other}`"))),
            };
            Ok(wgpu::BindingType::StorageTexture {
                access,
                format,
                view_dimension,
            })
        }

        BindingKind::Sampler => {
            let BoundResource::Sampler { filtering, comparison } = bound else {
                return Err(incompatible("expected a sampler".to_owned()));
            };
            let wants_comparison = decl.ty == "sampler_comparison";
            if wants_comparison != comparison {
                return Err(incompatible(if wants_comparison {
                    "`sampler_comparison` needs a sampler with a compare function".to_owned()
                } else {
                    "a comparison sampler cannot serve a plain `sampler`".to_owned()
                }));
            }
            Ok(wgpu::BindingType::Sampler(if comparison {
                wgpu::SamplerBindingType::Comparison
            } else if filtering {
                wgpu::SamplerBindingType::Filtering
            } else {
                wgpu::SamplerBindingType::NonFiltering
            }))
        }
    }
}

fn buffer(ty: wgpu::BufferBindingType) -> wgpu::BindingType {
    wgpu::BindingType::Buffer {
        ty,
        has_dynamic_offset: false,
        min_binding_size: None,
    }
}

/// Splits `texture_2d<f32>` into `("texture_2d", ["f32"])`.
fn split_generic(ty: &str) -> (&str, Vec<&str>) {
    match ty.split_once('<') {
        Some((base, rest)) => {
            let inner = rest.strip_suffix('>').unwrap_or(rest);
            (base, inner.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        }
        None => (ty, Vec::new()),
    }
}

/// `(view dimension, multisampled, depth)` of a sampled texture type.
fn sampled_shape(base: &str) -> Option<(wgpu::TextureViewDimension, bool, bool)> {
    use wgpu::TextureViewDimension as D;
    Some(match base {
        "texture_1d" => (D::D1, false, false),
        "texture_2d" => (D::D2, false, false),
        "texture_2d_array" => (D::D2Array, false, false),
        "texture_3d" => (D::D3, false, false),
        "texture_cube" => (D::Cube, false, false),
        "texture_cube_array" => (D::CubeArray, false, false),
        "texture_multisampled_2d" => (D::D2, true, false),
        "texture_depth_2d" => (D::D2, false, true),
        "texture_depth_2d_array" => (D::D2Array, false, true),
        "texture_depth_cube" => (D::Cube, false, true),
        "texture_depth_cube_array" => (D::CubeArray, false, true),
        "texture_depth_multisampled_2d" => (D::D2, true, true),
        _ => return None,
    })
}

fn storage_dimension(base: &str) -> Option<wgpu::TextureViewDimension> {
    use wgpu::TextureViewDimension as D;
    Some(match base {
        "texture_storage_1d" => D::D1,
        "texture_storage_2d" => D::D2,
        "texture_storage_2d_array" => D::D2Array,
        "texture_storage_3d" => D::D3,
        _ => return None,
    })
}

/// WGSL texel format name to `wgpu` format.
#[must_use]
pub fn storage_texel_format(name: &str) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;
    Some(match name {
        "rgba8unorm" => F::Rgba8Unorm,
        "rgba8snorm" => F::Rgba8Snorm,
        "rgba8uint" => F::Rgba8Uint,
        "rgba8sint" => F::Rgba8Sint,
        "rgba16uint" => F::Rgba16Uint,
        "rgba16sint" => F::Rgba16Sint,
        "rgba16float" => F::Rgba16Float,
        "r32uint" => F::R32Uint,
        "r32sint" => F::R32Sint,
        "r32float" => F::R32Float,
        "rg32uint" => F::Rg32Uint,
        "rg32sint" => F::Rg32Sint,
        "rg32float" => F::Rg32Float,
        "rgba32uint" => F::Rgba32Uint,
        "rgba32sint" => F::Rgba32Sint,
        "rgba32float" => F::Rgba32Float,
        "bgra8unorm" => F::Bgra8Unorm,
        _ => return None,
    })
}

// ─── Layout Cache ────────────────────────────────────────────────────────────

/// Deduplicates bind group layouts by their entry list.
#[derive(Default)]
pub(crate) struct LayoutCache {
    layouts: FxHashMap<Vec<wgpu::BindGroupLayoutEntry>, (wgpu::BindGroupLayout, ResourceId)>,
}

impl LayoutCache {
    pub fn get_or_create(
        &mut self,
        device: &wgpu::Device,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> (wgpu::BindGroupLayout, ResourceId) {
        if let Some(layout) = self.layouts.get(entries) {
            return layout.clone();
        }

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cached BindGroupLayout"),
            entries,
        });
        let id = generate_resource_id();
        self.layouts.insert(entries.to_vec(), (layout.clone(), id));
        (layout, id)
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn clear(&mut self) {
        self.layouts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(kind: BindingKind, ty: &str) -> BindingDeclaration {
        BindingDeclaration {
            group: 1,
            binding: 0,
            kind,
            name: "x".into(),
            ty: ty.into(),
        }
    }

    fn texture(format: wgpu::TextureFormat) -> BoundResource {
        BoundResource::Texture {
            format,
            features: wgpu::Features::empty(),
        }
    }

    #[test]
    fn float_texture_filterability_follows_format() {
        let d = decl(BindingKind::SampledTexture, "texture_2d<f32>");
        let filterable = binding_type(&d, texture(wgpu::TextureFormat::Rgba8Unorm)).unwrap();
        assert_eq!(
            filterable,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            }
        );

        let unfilterable = binding_type(&d, texture(wgpu::TextureFormat::Rgba32Float)).unwrap();
        assert!(matches!(
            unfilterable,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                ..
            }
        ));
    }

    #[test]
    fn storage_texture_format_must_match() {
        let d = decl(BindingKind::StorageTexture, "texture_storage_2d<rgba16float,write>");
        let ok = binding_type(&d, texture(wgpu::TextureFormat::Rgba16Float)).unwrap();
        assert!(matches!(
            ok,
            wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::Rgba16Float,
                ..
            }
        ));
        assert!(binding_type(&d, texture(wgpu::TextureFormat::Rgba8Unorm)).is_err());
    }

    #[test]
    fn sampler_type_follows_bound_sampler() {
        let d = decl(BindingKind::Sampler, "sampler");
        let nearest = binding_type(&d, BoundResource::Sampler { filtering: false, comparison: false }).unwrap();
        assert_eq!(nearest, wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering));

        let cmp = decl(BindingKind::Sampler, "sampler_comparison");
        assert!(binding_type(&cmp, BoundResource::Sampler { filtering: true, comparison: false }).is_err());
    }

    #[test]
    fn integer_texture_rejects_float_format() {
        let d = decl(BindingKind::SampledTexture, "texture_2d<u32>");
        assert!(binding_type(&d, texture(wgpu::TextureFormat::Rgba8Unorm)).is_err());
        assert!(binding_type(&d, texture(wgpu::TextureFormat::Rgba8Uint)).is_ok());
    }

    #[test]
    fn writable_bindings_hide_from_vertex_stage() {
        assert_eq!(
            visibility(BindingKind::StorageReadWrite, StageSet::Draw),
            wgpu::ShaderStages::FRAGMENT
        );
        assert_eq!(
            visibility(BindingKind::Uniform, StageSet::Draw),
            wgpu::ShaderStages::VERTEX_FRAGMENT
        );
        assert_eq!(
            visibility(BindingKind::StorageReadWrite, StageSet::Compute),
            wgpu::ShaderStages::COMPUTE
        );
    }
}
