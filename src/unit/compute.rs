//! Compute Units
//!
//! A [`ComputeUnit`] runs one `@compute` entry point over storage buffers and
//! storage textures. Binding and pipeline handling mirror the draw unit; a
//! dispatch with any zero dimension records nothing.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::binding::{BindingProblems, validate_bindings};
use crate::context::{Context, ContextInner};
use crate::errors::{Result, ShadeError};
use crate::pipeline::cache::ComputePipelineId;
use crate::pipeline::key::ComputePipelineKey;
use crate::pipeline::shader::{PreparedShader, ShaderStages};
use crate::telemetry::{self, EventField, EventKind, EventPhase, TelemetryEvent};
use crate::unit::{UnitBindings, UnitState};
use crate::uniforms::Uniforms;

/// Construction options for a [`ComputeUnit`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeOptions {
    pub label: Option<String>,
    /// Entry point to run. Defaults to the first `@compute` function.
    pub entry_point: Option<String>,
}

impl ComputeOptions {
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_entry_point(mut self, entry: impl Into<String>) -> Self {
        self.entry_point = Some(entry.into());
        self
    }
}

/// One compute shader program with its uniforms and bind groups.
pub struct ComputeUnit {
    ctx: Context,
    label: String,
    shader: PreparedShader,
    uniforms: Uniforms,
    bindings: UnitBindings,
    pipeline: Option<(ComputePipelineKey, ComputePipelineId)>,
    state: UnitState,
}

impl std::fmt::Debug for ComputeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeUnit")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("workgroup_size", &self.workgroup_size())
            .finish_non_exhaustive()
    }
}

impl ComputeUnit {
    pub fn new(ctx: &Context, source: &str, uniforms: Uniforms, options: ComputeOptions) -> Result<Self> {
        let inner = ctx.inner();
        inner.ensure_alive()?;

        let shader = PreparedShader::compute(source, options.entry_point.as_deref())?;
        let label = options.label.unwrap_or_else(|| "compute unit".to_owned());
        let bindings = UnitBindings::new(inner, &shader, &label)?;

        log::debug!(
            "{label}: prepared ({} bindings, workgroup size {:?})",
            shader.declarations.len(),
            workgroup_size_of(&shader)
        );

        Ok(Self {
            ctx: ctx.clone(),
            label,
            shader,
            uniforms,
            bindings,
            pipeline: None,
            state: UnitState::Ready,
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn state(&self) -> UnitState {
        self.state
    }

    #[must_use]
    pub fn uses_globals(&self) -> bool {
        self.shader.uses_globals
    }

    /// `@workgroup_size` of the entry point, padded with 1s.
    #[must_use]
    pub fn workgroup_size(&self) -> [u32; 3] {
        workgroup_size_of(&self.shader)
    }

    #[must_use]
    pub fn shader(&self) -> &PreparedShader {
        &self.shader
    }

    #[must_use]
    pub fn pipeline_id(&self) -> Option<ComputePipelineId> {
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

    #[must_use]
    pub fn validate(&self) -> Option<BindingProblems> {
        validate_bindings(&self.shader.declarations, &self.uniforms)
    }

    pub fn dispose(&mut self) {
        self.state = UnitState::Disposed;
        self.pipeline = None;
        self.uniforms = Uniforms::new();
    }

    /// Dispatches `x * y * z` workgroups and submits.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        if self.state == UnitState::Disposed {
            return Err(ShadeError::Disposed("compute unit"));
        }
        if x == 0 || y == 0 || z == 0 {
            log::trace!("{}: skipped empty dispatch {x}x{y}x{z}", self.label);
            return Ok(());
        }
        self.ctx.inner().ensure_alive()?;

        telemetry::emit(
            TelemetryEvent::new(EventKind::Dispatch, EventPhase::Start)
                .with_label(Some(self.label.as_str()))
                .with_field(EventField::Workgroups([x, y, z])),
        );

        let previous = self.state;
        self.state = UnitState::Recording;
        let ctx = self.ctx.clone();
        let result = self.record(ctx.inner(), [x, y, z]);
        self.state = match result {
            Ok(()) => UnitState::Ready,
            Err(_) => previous,
        };

        telemetry::emit(TelemetryEvent::new(EventKind::Dispatch, EventPhase::End).with_label(Some(self.label.as_str())));
        result
    }

    /// Dispatches enough workgroups to cover a `width` by `height` grid.
    pub fn dispatch_for_size(&mut self, width: u32, height: u32) -> Result<()> {
        let [wx, wy, _] = self.workgroup_size();
        self.dispatch(width.div_ceil(wx.max(1)), height.div_ceil(wy.max(1)), 1)
    }

    fn record(&mut self, inner: &ContextInner, [x, y, z]: [u32; 3]) -> Result<()> {
        self.bindings.prepare(inner, &self.uniforms)?;
        let groups = self.bindings.bound_groups(inner)?;

        let ShaderStages::Compute { entry, .. } = &self.shader.stages else {
            return Err(ShadeError::MissingEntryPoint("compute"));
        };
        let key = ComputePipelineKey {
            shader_hash: self.shader.hash,
            entry_point: entry.clone(),
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
                .get_or_create_compute(&inner.device, &module, &layouts, &key, &self.label);
            self.pipeline = Some((key, id));
            id
        };
        let pipeline = inner
            .pipelines
            .lock()
            .compute_pipeline(pipeline_id)
            .cloned()
            .ok_or(ShadeError::Disposed("pipeline cache"))?;

        let mut encoder = inner
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&self.label),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&self.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            for (index, group) in groups.iter().enumerate() {
                pass.set_bind_group(index as u32, &group.bind_group, &[]);
            }
            pass.dispatch_workgroups(x, y, z);
        }
        inner.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

fn workgroup_size_of(shader: &PreparedShader) -> [u32; 3] {
    match shader.stages {
        ShaderStages::Compute { workgroup_size, .. } => workgroup_size,
        ShaderStages::Draw { .. } => [1, 1, 1],
    }
}
