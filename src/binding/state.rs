//! Per-unit bind group state.
//!
//! Each user group of a unit owns one [`GroupBinder`]. On every draw or
//! dispatch the binder resolves its declarations against the unit's uniform
//! map, uploads changed plain data, and collects the physical id of every
//! bound resource. The bind group is rebuilt only when that fingerprint
//! differs from the one it was built from.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::binding::builder::{ResolvedSource, resolve_bindings};
use crate::binding::layout::{BoundResource, StageSet, layout_entry};
use crate::binding::parser::{BindingDeclaration, BindingKind};
use crate::context::ContextInner;
use crate::errors::{Result, ShadeError};
use crate::resources::ids::{BindGroupFingerprint, ResourceId, generate_resource_id};
use crate::telemetry::{self, EventKind, EventPhase, TelemetryEvent};
use crate::uniforms::Uniforms;

/// Uniform buffer backing one plain-data declaration, with a CPU shadow of
/// the last upload.
struct UniformSlot {
    buffer: wgpu::Buffer,
    resource_id: ResourceId,
    capacity: u64,
    shadow: Vec<u8>,
}

impl UniformSlot {
    fn new(device: &wgpu::Device, capacity: u64, label: &str) -> Self {
        Self {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: capacity,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            resource_id: generate_resource_id(),
            capacity,
            shadow: Vec::new(),
        }
    }
}

enum Physical {
    Buffer(wgpu::Buffer),
    View(wgpu::TextureView),
    Sampler(wgpu::Sampler),
}

pub(crate) struct GroupBinder {
    group: u32,
    declarations: Vec<BindingDeclaration>,
    stages: StageSet,
    /// Declared byte size of uniform bindings, by binding index.
    min_sizes: FxHashMap<u32, u64>,
    uniform_slots: FxHashMap<u32, UniformSlot>,
    fingerprint: Option<BindGroupFingerprint>,
    layout: Option<wgpu::BindGroupLayout>,
    bind_group: Option<wgpu::BindGroup>,
    warned_samplers: FxHashSet<u32>,
    label: String,
}

impl GroupBinder {
    pub fn new(
        group: u32,
        declarations: Vec<BindingDeclaration>,
        stages: StageSet,
        min_sizes: FxHashMap<u32, u64>,
        label: &str,
    ) -> Self {
        Self {
            group,
            declarations,
            stages,
            min_sizes,
            uniform_slots: FxHashMap::default(),
            fingerprint: None,
            layout: None,
            bind_group: None,
            warned_samplers: FxHashSet::default(),
            label: format!("{label} group {group}"),
        }
    }

    #[inline]
    pub fn group(&self) -> u32 {
        self.group
    }

    pub fn declarations(&self) -> &[BindingDeclaration] {
        &self.declarations
    }

    pub fn layout_id(&self) -> Option<ResourceId> {
        self.fingerprint.as_ref().map(|f| f.layout_id)
    }

    pub fn layout(&self) -> Option<&wgpu::BindGroupLayout> {
        self.layout.as_ref()
    }

    pub fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.bind_group.as_ref()
    }

    /// Brings the bind group up to date. Returns whether it was rebuilt.
    pub fn prepare(&mut self, ctx: &ContextInner, uniforms: &Uniforms) -> Result<bool> {
        let Self {
            declarations,
            stages,
            min_sizes,
            uniform_slots,
            warned_samplers,
            label,
            ..
        } = self;

        let resolved = resolve_bindings(declarations, uniforms).map_err(ShadeError::Bindings)?;
        let features = ctx.device.features();

        let mut physical = Vec::with_capacity(resolved.len());
        let mut entries = Vec::with_capacity(resolved.len());
        let mut ids = smallvec::SmallVec::<[ResourceId; 8]>::new();

        {
            let textures = ctx.textures.read();
            let buffers = ctx.buffers.read();
            let samplers = ctx.samplers.lock();

            let any_unfilterable = resolved.iter().any(|r| match r.source {
                ResolvedSource::Texture(handle) if r.declaration.kind == BindingKind::SampledTexture => textures
                    .get(handle)
                    .is_ok_and(|t| !is_filterable(t.format, features)),
                _ => false,
            });

            for binding in &resolved {
                let decl = binding.declaration;
                let bound = match &binding.source {
                    ResolvedSource::Data(cell) => {
                        let value = cell.read();
                        let bytes = value.uniform_bytes().ok_or_else(|| ShadeError::IncompatibleResource {
                            name: decl.name.clone(),
                            reason: format!("a {} cannot fill a uniform buffer", value.kind_name()),
                        })?;
                        let declared = min_sizes.get(&decl.binding).copied().unwrap_or(0);
                        let slot = upload_uniform(ctx, uniform_slots, decl, &bytes, declared, label)?;
                        ids.push(slot.resource_id);
                        physical.push(Physical::Buffer(slot.buffer.clone()));
                        BoundResource::Buffer
                    }
                    ResolvedSource::Storage(handle) => {
                        let buffer = buffers.get(*handle)?;
                        ids.push(buffer.resource_id);
                        physical.push(Physical::Buffer(buffer.buffer.clone()));
                        BoundResource::Buffer
                    }
                    ResolvedSource::Texture(handle) => {
                        let texture = textures.get(*handle)?;
                        let required = if decl.kind == BindingKind::StorageTexture {
                            wgpu::TextureUsages::STORAGE_BINDING
                        } else {
                            wgpu::TextureUsages::TEXTURE_BINDING
                        };
                        if !texture.usage.contains(required) {
                            return Err(ShadeError::IncompatibleResource {
                                name: decl.name.clone(),
                                reason: format!(
                                    "the texture was not created with {required:?} usage; pick a target usage that includes it"
                                ),
                            });
                        }
                        ids.push(texture.resource_id);
                        physical.push(Physical::View(texture.view.clone()));
                        BoundResource::Texture {
                            format: texture.format,
                            features,
                        }
                    }
                    ResolvedSource::Sampler(handle) => {
                        let sampler = samplers.get(*handle).ok_or(ShadeError::StaleHandle("sampler"))?;
                        ids.push(sampler.resource_id);
                        physical.push(Physical::Sampler(sampler.sampler.clone()));
                        BoundResource::Sampler {
                            filtering: sampler.filtering,
                            comparison: sampler.comparison,
                        }
                    }
                    ResolvedSource::DefaultSampler => {
                        let handle = if decl.ty == "sampler_comparison" {
                            samplers.default_comparison()
                        } else if any_unfilterable {
                            samplers.default_nearest()
                        } else {
                            samplers.default_linear()
                        };
                        if warned_samplers.insert(decl.binding) {
                            log::warn!(
                                "{label}: no sampler supplied for `{}` (binding {}); using the default sampler",
                                decl.name,
                                decl.binding
                            );
                        }
                        let sampler = samplers.get(handle).ok_or(ShadeError::StaleHandle("sampler"))?;
                        ids.push(sampler.resource_id);
                        physical.push(Physical::Sampler(sampler.sampler.clone()));
                        BoundResource::Sampler {
                            filtering: sampler.filtering,
                            comparison: sampler.comparison,
                        }
                    }
                };
                entries.push(layout_entry(decl, bound, *stages)?);
            }
        }

        let (layout, layout_id) = ctx.layouts.lock().get_or_create(&ctx.device, &entries);
        let fingerprint = BindGroupFingerprint {
            resource_ids: ids,
            layout_id,
        };

        if self.bind_group.is_some()
            && self
                .fingerprint
                .as_ref()
                .is_some_and(|previous| previous.matches(&fingerprint))
        {
            return Ok(false);
        }

        let bind_entries: Vec<wgpu::BindGroupEntry<'_>> = self
            .declarations
            .iter()
            .zip(&physical)
            .map(|(decl, resource)| wgpu::BindGroupEntry {
                binding: decl.binding,
                resource: match resource {
                    Physical::Buffer(buffer) => buffer.as_entire_binding(),
                    Physical::View(view) => wgpu::BindingResource::TextureView(view),
                    Physical::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                },
            })
            .collect();

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&self.label),
            layout: &layout,
            entries: &bind_entries,
        });

        log::debug!("{}: bind group rebuilt ({} bindings)", self.label, bind_entries.len());
        telemetry::emit(
            TelemetryEvent::new(EventKind::BindGroupRebuild, EventPhase::Instant).with_label(Some(self.label.as_str())),
        );

        self.bind_group = Some(bind_group);
        self.layout = Some(layout);
        self.fingerprint = Some(fingerprint);
        Ok(true)
    }
}

/// Writes `bytes` into the uniform slot of `decl`, reallocating when the
/// payload outgrows it.
///
/// `declared` is the reflected size of the WGSL type (0 when unknown). A
/// payload larger than that, or than the device's uniform binding limit, is
/// rejected.
fn upload_uniform<'a>(
    ctx: &ContextInner,
    slots: &'a mut FxHashMap<u32, UniformSlot>,
    decl: &BindingDeclaration,
    bytes: &[u8],
    declared: u64,
    label: &str,
) -> Result<&'a UniformSlot> {
    let len = bytes.len() as u64;
    if declared > 0 && len > declared {
        return Err(ShadeError::IncompatibleResource {
            name: decl.name.clone(),
            reason: format!("{len} bytes supplied but `{}` is {declared} bytes", decl.ty),
        });
    }
    let limit = u64::from(ctx.device.limits().max_uniform_buffer_binding_size);
    let size = len.max(declared).max(16).next_multiple_of(16);
    if size > limit {
        return Err(ShadeError::IncompatibleResource {
            name: decl.name.clone(),
            reason: format!("{size} bytes exceed the device uniform buffer limit of {limit} bytes"),
        });
    }

    let binding = decl.binding;
    let slot = slots
        .entry(binding)
        .or_insert_with(|| UniformSlot::new(&ctx.device, size, label));
    if slot.capacity < size {
        log::debug!("{label}: uniform buffer for binding {binding} grown to {size} bytes");
        *slot = UniformSlot::new(&ctx.device, size, label);
    }

    if slot.shadow != bytes {
        let mut padded = bytes.to_vec();
        padded.resize(slot.capacity as usize, 0);
        ctx.queue.write_buffer(&slot.buffer, 0, &padded);
        slot.shadow = bytes.to_vec();
    }
    Ok(slot)
}

fn is_filterable(format: wgpu::TextureFormat, features: wgpu::Features) -> bool {
    matches!(
        format.sample_type(None, Some(features)),
        Some(wgpu::TextureSampleType::Float { filterable: true })
    )
}
