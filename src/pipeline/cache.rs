//! Pipeline Cache
//!
//! Central owner of every `wgpu::RenderPipeline` and `wgpu::ComputePipeline`
//! a context creates. Pipelines are stored in contiguous `Vec`s and addressed
//! through lightweight [`RenderPipelineId`] / [`ComputePipelineId`] handles.
//!
//! Lookups go through the full canonical key, so two units whose keys are
//! equal always receive the same id and the pipeline is compiled once.

use rustc_hash::FxHashMap;

use crate::pipeline::key::{ComputePipelineKey, RenderPipelineKey};
use crate::telemetry::{self, EventKind, EventPhase, TelemetryEvent};

// ─── Pipeline Handles ────────────────────────────────────────────────────────

/// Handle to a cached `wgpu::RenderPipeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPipelineId(pub(crate) u32);

impl RenderPipelineId {
    /// Raw index into the pipeline storage array.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a cached `wgpu::ComputePipeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePipelineId(pub(crate) u32);

impl ComputePipelineId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ─── Pipeline Cache ──────────────────────────────────────────────────────────

/// Central pipeline storage and deduplication cache.
#[derive(Default)]
pub(crate) struct PipelineCache {
    // ---- Storage (contiguous, indexed by Id) ----
    render_pipelines: Vec<wgpu::RenderPipeline>,
    compute_pipelines: Vec<wgpu::ComputePipeline>,

    // ---- Canonical lookups ----
    render_lookup: FxHashMap<RenderPipelineKey, RenderPipelineId>,
    compute_lookup: FxHashMap<ComputePipelineKey, ComputePipelineId>,

    compile_count: u64,
}

impl PipelineCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn render_pipeline(&self, id: RenderPipelineId) -> Option<&wgpu::RenderPipeline> {
        self.render_pipelines.get(id.index())
    }

    #[inline]
    #[must_use]
    pub fn compute_pipeline(&self, id: ComputePipelineId) -> Option<&wgpu::ComputePipeline> {
        self.compute_pipelines.get(id.index())
    }

    #[must_use]
    pub fn lookup_render(&self, key: &RenderPipelineKey) -> Option<RenderPipelineId> {
        self.render_lookup.get(key).copied()
    }

    /// Look up or compile a draw pipeline.
    ///
    /// `bind_group_layouts` must be dense (group 0 first) and match
    /// `key.bind_group_layout_ids`.
    pub fn get_or_create_render(
        &mut self,
        device: &wgpu::Device,
        module: &wgpu::ShaderModule,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
        key: &RenderPipelineKey,
        label: &str,
    ) -> RenderPipelineId {
        if let Some(&id) = self.render_lookup.get(key) {
            return id;
        }

        let bind_group_layouts: Vec<Option<&wgpu::BindGroupLayout>> =
            bind_group_layouts.iter().copied().map(Some).collect();
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &bind_group_layouts,
            immediate_size: 0,
        });

        let attributes: Vec<Vec<wgpu::VertexAttribute>> =
            key.vertex_layouts.iter().map(|l| l.wgpu_attributes()).collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout<'_>> = key
            .vertex_layouts
            .iter()
            .zip(&attributes)
            .map(|(l, attrs)| wgpu::VertexBufferLayout {
                array_stride: l.array_stride,
                step_mode: l.step_mode,
                attributes: attrs,
            })
            .collect();

        let targets = [Some(key.color_target.to_wgpu())];

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some(&key.vertex_entry),
                buffers: &vertex_buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some(&key.fragment_entry),
                targets: &targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: key.topology,
                strip_index_format: key.strip_index_format,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let id = RenderPipelineId(self.render_pipelines.len() as u32);
        self.render_pipelines.push(pipeline);
        self.render_lookup.insert(key.clone(), id);
        self.record_compile(label);
        id
    }

    /// Look up or compile a compute pipeline.
    pub fn get_or_create_compute(
        &mut self,
        device: &wgpu::Device,
        module: &wgpu::ShaderModule,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
        key: &ComputePipelineKey,
        label: &str,
    ) -> ComputePipelineId {
        if let Some(&id) = self.compute_lookup.get(key) {
            return id;
        }

        let bind_group_layouts: Vec<Option<&wgpu::BindGroupLayout>> =
            bind_group_layouts.iter().copied().map(Some).collect();
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &bind_group_layouts,
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
            module,
            entry_point: Some(&key.entry_point),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let id = ComputePipelineId(self.compute_pipelines.len() as u32);
        self.compute_pipelines.push(pipeline);
        self.compute_lookup.insert(key.clone(), id);
        self.record_compile(label);
        id
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    /// Pipelines compiled since creation (misses only).
    #[must_use]
    pub fn compile_count(&self) -> u64 {
        self.compile_count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.render_pipelines.len() + self.compute_pipelines.len()
    }

    /// Drops every pipeline. Outstanding ids no longer resolve.
    pub fn clear(&mut self) {
        self.render_pipelines.clear();
        self.compute_pipelines.clear();
        self.render_lookup.clear();
        self.compute_lookup.clear();
    }

    fn record_compile(&mut self, label: &str) {
        self.compile_count += 1;
        log::debug!("pipeline compiled: {label} (total {})", self.compile_count);
        telemetry::emit(TelemetryEvent::new(EventKind::PipelineCompile, EventPhase::Instant).with_label(Some(label)));
    }
}
