//! Draw Units
//!
//! A [`DrawUnit`] renders one shader program into a [`RenderTarget`]. The
//! shader is prepared and validated at construction; bindings are validated
//! lazily at the first draw because uniforms may be attached afterwards.
//!
//! Each [`draw`](DrawUnit::draw):
//!
//! 1. brings the user bind groups up to date (rebuilt only when a bound
//!    resource's identity changed),
//! 2. resolves the pipeline through the context cache (reusing the unit's
//!    last pipeline when its key is unchanged),
//! 3. binds group 0 (globals or the empty placeholder), the user groups and
//!    any vertex/index buffers,
//! 4. issues an indexed or non-indexed draw and submits,
//! 5. publishes `Draw` start/end events.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::binding::{BindingProblems, validate_bindings};
use crate::context::{Context, ContextInner};
use crate::errors::{Result, ShadeError};
use crate::pipeline::cache::RenderPipelineId;
use crate::pipeline::key::{ColorTargetKey, RenderPipelineKey, VertexLayoutKey};
use crate::pipeline::shader::{FULLSCREEN_VERTEX_COUNT, PreparedShader, ShaderStages};
use crate::resources::storage::StorageBuffer;
use crate::resources::target::{Attachment, RenderTarget};
use crate::telemetry::{self, EventField, EventKind, EventPhase, TelemetryEvent};
use crate::unit::{UnitBindings, UnitState};
use crate::uniforms::Uniforms;

// ─── Options ─────────────────────────────────────────────────────────────────

/// Color blending applied when writing to the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Overwrite the destination (blending disabled).
    #[default]
    Replace,
    /// Straight alpha blending.
    Alpha,
    Additive,
    Multiply,
    Custom(wgpu::BlendState),
}

impl BlendMode {
    /// Blend state for the color target; `None` disables blending.
    #[must_use]
    pub fn state(self) -> Option<wgpu::BlendState> {
        match self {
            Self::Replace => None,
            Self::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
            Self::Additive => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
            Self::Multiply => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::Dst,
                    dst_factor: wgpu::BlendFactor::Zero,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::DstAlpha,
                    dst_factor: wgpu::BlendFactor::Zero,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
            Self::Custom(state) => Some(state),
        }
    }
}

/// What happens to the target's previous contents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Clear to an RGBA color first.
    Clear([f64; 4]),
    /// Keep the existing contents.
    Load,
}

impl Default for LoadMode {
    fn default() -> Self {
        Self::Clear([0.0, 0.0, 0.0, 1.0])
    }
}

impl LoadMode {
    fn op(self) -> wgpu::LoadOp<wgpu::Color> {
        match self {
            Self::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
            Self::Load => wgpu::LoadOp::Load,
        }
    }
}

/// A storage buffer read as per-vertex or per-instance data.
#[derive(Debug, Clone)]
pub struct VertexBufferDesc {
    pub buffer: StorageBuffer,
    pub array_stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl VertexBufferDesc {
    #[must_use]
    pub fn new(buffer: &StorageBuffer, array_stride: u64, attributes: Vec<wgpu::VertexAttribute>) -> Self {
        Self {
            buffer: buffer.clone(),
            array_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes,
        }
    }

    #[must_use]
    pub fn per_instance(mut self) -> Self {
        self.step_mode = wgpu::VertexStepMode::Instance;
        self
    }

    fn layout_key(&self) -> VertexLayoutKey {
        VertexLayoutKey {
            array_stride: self.array_stride,
            step_mode: self.step_mode,
            attributes: self.attributes.iter().copied().map(Into::into).collect(),
        }
    }
}

/// A storage buffer read as indices.
#[derive(Debug, Clone)]
pub struct IndexBufferDesc {
    pub buffer: StorageBuffer,
    pub format: wgpu::IndexFormat,
    /// Defaults to every index the buffer holds.
    pub count: Option<u32>,
}

impl IndexBufferDesc {
    #[must_use]
    pub fn new(buffer: &StorageBuffer, format: wgpu::IndexFormat) -> Self {
        Self {
            buffer: buffer.clone(),
            format,
            count: None,
        }
    }

    #[must_use]
    pub fn index_count(&self) -> u32 {
        self.count
            .unwrap_or_else(|| (self.buffer.byte_length() / self.format.byte_size() as u64) as u32)
    }
}

/// Construction options for a [`DrawUnit`].
#[derive(Debug, Clone)]
pub struct DrawOptions {
    pub label: Option<String>,
    pub topology: wgpu::PrimitiveTopology,
    pub blend: BlendMode,
    pub load: LoadMode,
    /// Required unless the shader is a fullscreen pass or the count can be
    /// derived from an index or vertex buffer.
    pub vertex_count: Option<u32>,
    pub instance_count: u32,
    pub vertex_buffers: Vec<VertexBufferDesc>,
    pub index_buffer: Option<IndexBufferDesc>,
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self {
            label: None,
            topology: wgpu::PrimitiveTopology::TriangleList,
            blend: BlendMode::Replace,
            load: LoadMode::default(),
            vertex_count: None,
            instance_count: 1,
            vertex_buffers: Vec::new(),
            index_buffer: None,
        }
    }
}

// ─── Draw Unit ───────────────────────────────────────────────────────────────

/// One draw shader program with its uniforms and bind groups.
pub struct DrawUnit {
    ctx: Context,
    label: String,
    shader: PreparedShader,
    uniforms: Uniforms,
    bindings: UnitBindings,
    options: DrawOptions,
    /// Last resolved pipeline and the key it was resolved for.
    pipeline: Option<(RenderPipelineKey, RenderPipelineId)>,
    state: UnitState,
}

impl std::fmt::Debug for DrawUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawUnit")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("uses_globals", &self.shader.uses_globals)
            .field("fullscreen", &self.shader.is_fullscreen())
            .finish_non_exhaustive()
    }
}

impl DrawUnit {
    /// Prepares `source` and validates the vertex layout. Binding
    /// completeness is checked at the first draw.
    pub fn new(ctx: &Context, source: &str, uniforms: Uniforms, options: DrawOptions) -> Result<Self> {
        let inner = ctx.inner();
        inner.ensure_alive()?;

        let shader = PreparedShader::draw(source)?;
        validate_vertex_layout(&shader, &options)?;

        let label = options.label.clone().unwrap_or_else(|| "draw unit".to_owned());
        let bindings = UnitBindings::new(inner, &shader, &label)?;

        log::debug!(
            "{label}: prepared ({} bindings, globals: {}, fullscreen: {})",
            shader.declarations.len(),
            shader.uses_globals,
            shader.is_fullscreen()
        );

        Ok(Self {
            ctx: ctx.clone(),
            label,
            shader,
            uniforms,
            bindings,
            options,
            pipeline: None,
            state: UnitState::Ready,
        })
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Whether the shader reads `globals.<field>`.
    #[must_use]
    pub fn uses_globals(&self) -> bool {
        self.shader.uses_globals
    }

    #[must_use]
    pub fn is_fullscreen(&self) -> bool {
        self.shader.is_fullscreen()
    }

    #[must_use]
    pub fn shader(&self) -> &PreparedShader {
        &self.shader
    }

    /// Pipeline used by the most recent draw.
    #[must_use]
    pub fn pipeline_id(&self) -> Option<RenderPipelineId> {
        self.pipeline.as_ref().map(|(_, id)| *id)
    }

    #[must_use]
    pub fn uniforms(&self) -> &Uniforms {
        &self.uniforms
    }

    pub fn uniforms_mut(&mut self) -> &mut Uniforms {
        &mut self.uniforms
    }

    pub fn set_uniforms(&mut self, uniforms: Uniforms) {
        self.uniforms = uniforms;
    }

    /// Checks the uniform map against the shader's declarations without
    /// touching the GPU.
    #[must_use]
    pub fn validate(&self) -> Option<BindingProblems> {
        validate_bindings(&self.shader.declarations, &self.uniforms)
    }

    // ─── State Changes ───────────────────────────────────────────────────────

    pub fn set_topology(&mut self, topology: wgpu::PrimitiveTopology) {
        if self.options.topology != topology {
            self.options.topology = topology;
            self.mark_dirty();
        }
    }

    pub fn set_blend(&mut self, blend: BlendMode) {
        if self.options.blend != blend {
            self.options.blend = blend;
            self.mark_dirty();
        }
    }

    pub fn set_load(&mut self, load: LoadMode) {
        self.options.load = load;
    }

    pub fn set_vertex_count(&mut self, count: u32) {
        self.options.vertex_count = Some(count);
    }

    pub fn set_instance_count(&mut self, count: u32) {
        self.options.instance_count = count;
    }

    fn mark_dirty(&mut self) {
        if self.state != UnitState::Disposed {
            self.state = UnitState::Dirty;
            self.pipeline = None;
        }
    }

    /// Releases the unit. Later draws fail with `Disposed`.
    pub fn dispose(&mut self) {
        self.state = UnitState::Disposed;
        self.pipeline = None;
        self.uniforms = Uniforms::new();
    }

    // ─── Drawing ─────────────────────────────────────────────────────────────

    /// Renders into `target` and submits.
    pub fn draw(&mut self, target: &RenderTarget) -> Result<()> {
        if self.state == UnitState::Disposed {
            return Err(ShadeError::Disposed("draw unit"));
        }
        self.ctx.inner().ensure_alive()?;
        let attachment = target.attachment()?;

        let vertex_count = self.vertex_count();
        let indexed = self.options.index_buffer.is_some();
        telemetry::emit(
            TelemetryEvent::new(EventKind::Draw, EventPhase::Start)
                .with_label(Some(self.label.as_str()))
                .with_field(EventField::VertexCount(vertex_count))
                .with_field(EventField::InstanceCount(self.options.instance_count))
                .with_field(EventField::Indexed(indexed)),
        );

        let previous = self.state;
        self.state = UnitState::Recording;
        let ctx = self.ctx.clone();
        let result = self.record(ctx.inner(), &attachment, vertex_count);
        self.state = match result {
            Ok(()) => UnitState::Ready,
            Err(_) => previous,
        };

        telemetry::emit(TelemetryEvent::new(EventKind::Draw, EventPhase::End).with_label(Some(self.label.as_str())));
        result
    }

    fn record(&mut self, inner: &ContextInner, attachment: &Attachment, vertex_count: u32) -> Result<()> {
        self.bindings.prepare(inner, &self.uniforms)?;
        let groups = self.bindings.bound_groups(inner)?;

        let blend = self.options.blend.state();
        if blend.is_some()
            && !inner
                .format_features(attachment.format)
                .flags
                .contains(wgpu::TextureFormatFeatureFlags::BLENDABLE)
        {
            return Err(ShadeError::UnsupportedBlend(attachment.format));
        }

        let ShaderStages::Draw { vertex, fragment, .. } = &self.shader.stages else {
            return Err(ShadeError::MissingEntryPoint("fragment"));
        };
        let index_format = self.options.index_buffer.as_ref().map(|i| i.format);
        let key = RenderPipelineKey {
            shader_hash: self.shader.hash,
            vertex_entry: vertex.clone(),
            fragment_entry: fragment.clone(),
            topology: self.options.topology,
            strip_index_format: index_format.filter(|_| self.options.topology.is_strip()),
            color_target: ColorTargetKey::from(wgpu::ColorTargetState {
                format: attachment.format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            }),
            indexed: index_format.is_some(),
            vertex_layouts: self.options.vertex_buffers.iter().map(VertexBufferDesc::layout_key).collect(),
            bind_group_layout_ids: groups.iter().map(|g| g.layout_id).collect(),
        };

        let cached = self.pipeline.as_ref().filter(|(k, _)| *k == key).map(|(_, id)| *id);
        let pipeline_id = if let Some(id) = cached {
            id
        } else {
            let module = inner.shaders.lock().get_or_compile(&inner.device, &self.shader, &self.label);
            let layouts: SmallVec<[&wgpu::BindGroupLayout; 4]> = groups.iter().map(|g| &g.layout).collect();
            let id = inner
                .pipelines
                .lock()
                .get_or_create_render(&inner.device, &module, &layouts, &key, &self.label);
            self.pipeline = Some((key, id));
            id
        };
        let pipeline = inner
            .pipelines
            .lock()
            .render_pipeline(pipeline_id)
            .cloned()
            .ok_or(ShadeError::Disposed("pipeline cache"))?;

        let (vertex_buffers, index_buffer) = {
            let buffers = inner.buffers.read();
            let mut vertex_buffers: SmallVec<[wgpu::Buffer; 2]> = SmallVec::new();
            for desc in &self.options.vertex_buffers {
                vertex_buffers.push(buffers.get(desc.buffer.handle())?.buffer.clone());
            }
            let index_buffer = match &self.options.index_buffer {
                Some(desc) => Some((
                    buffers.get(desc.buffer.handle())?.buffer.clone(),
                    desc.format,
                    desc.index_count(),
                )),
                None => None,
            };
            (vertex_buffers, index_buffer)
        };

        let mut encoder = inner
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&self.label),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&self.label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &attachment.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: self.options.load.op(),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                ..Default::default()
            });

            pass.set_pipeline(&pipeline);
            for (index, group) in groups.iter().enumerate() {
                pass.set_bind_group(index as u32, &group.bind_group, &[]);
            }
            for (slot, buffer) in vertex_buffers.iter().enumerate() {
                pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
            match &index_buffer {
                Some((buffer, format, count)) => {
                    pass.set_index_buffer(buffer.slice(..), *format);
                    pass.draw_indexed(0..*count, 0, 0..self.options.instance_count);
                }
                None => pass.draw(0..vertex_count, 0..self.options.instance_count),
            }
        }
        inner.queue.submit(std::iter::once(encoder.finish()));

        log::trace!("{}: drew {vertex_count} vertices", self.label);
        Ok(())
    }

    fn vertex_count(&self) -> u32 {
        if let Some(index) = &self.options.index_buffer {
            return index.index_count();
        }
        if let Some(count) = self.options.vertex_count {
            return count;
        }
        if self.shader.is_fullscreen() {
            return FULLSCREEN_VERTEX_COUNT;
        }
        self.options
            .vertex_buffers
            .iter()
            .find(|v| v.step_mode == wgpu::VertexStepMode::Vertex && v.array_stride > 0)
            .map_or(0, |v| (v.buffer.byte_length() / v.array_stride) as u32)
    }
}

const VERTEX_STRIDE_ALIGNMENT: u64 = 4;

/// Construction-time checks on the vertex input description.
fn validate_vertex_layout(shader: &PreparedShader, options: &DrawOptions) -> Result<()> {
    if shader.is_fullscreen() && (!options.vertex_buffers.is_empty() || options.index_buffer.is_some()) {
        return Err(ShadeError::InvalidVertexLayout(
            "a fragment-only shader draws a fullscreen triangle and takes no vertex or index buffers".to_owned(),
        ));
    }

    let mut locations = SmallVec::<[u32; 8]>::new();
    for (slot, desc) in options.vertex_buffers.iter().enumerate() {
        if desc.array_stride % VERTEX_STRIDE_ALIGNMENT != 0 {
            return Err(ShadeError::InvalidVertexLayout(format!(
                "buffer {slot}: stride {} is not a multiple of {}",
                desc.array_stride,
                VERTEX_STRIDE_ALIGNMENT
            )));
        }
        for attribute in &desc.attributes {
            let end = attribute.offset + attribute.format.size();
            if desc.array_stride > 0 && end > desc.array_stride {
                return Err(ShadeError::InvalidVertexLayout(format!(
                    "buffer {slot}: attribute at location {} ends at byte {end}, past the stride of {}",
                    attribute.shader_location, desc.array_stride
                )));
            }
            if locations.contains(&attribute.shader_location) {
                return Err(ShadeError::InvalidVertexLayout(format!(
                    "location {} is used by more than one attribute",
                    attribute.shader_location
                )));
            }
            locations.push(attribute.shader_location);
        }
    }

    let derivable = options.index_buffer.is_some()
        || shader.is_fullscreen()
        || options
            .vertex_buffers
            .iter()
            .any(|v| v.step_mode == wgpu::VertexStepMode::Vertex && v.array_stride > 0);
    if options.vertex_count.is_none() && !derivable {
        return Err(ShadeError::InvalidVertexLayout(
            "no vertex count given and none can be derived from buffers".to_owned(),
        ));
    }
    Ok(())
}
