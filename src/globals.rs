//! Globals Controller
//!
//! One fixed-layout uniform shared by every unit of a [`Context`](crate::Context):
//!
//! ```wgsl
//! struct Globals {
//!     resolution: vec2<f32>,
//!     time: f32,
//!     deltaTime: f32,
//!     frame: u32,
//!     aspect: f32,
//! }
//! @group(0) @binding(0) var<uniform> globals: Globals;
//! ```
//!
//! The controller is the single writer. It advances exactly once per frame,
//! before any unit records work, and uploads the whole struct in one write.
//! Units decide at construction (see [`uses_globals`]) whether they bind
//! group 0 at all.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

#[cfg(not(target_arch = "wasm32"))]
use std::time::{Duration, Instant};

#[cfg(target_arch = "wasm32")]
use web_time::{Duration, Instant};

use crate::binding::parser::{is_ident_byte, strip_comments};
use crate::telemetry::{self, EventField, EventKind, EventPhase, TelemetryEvent};

/// WGSL declaration injected ahead of shaders that reference `globals`.
pub const GLOBALS_WGSL: &str = "struct Globals {
    resolution: vec2<f32>,
    time: f32,
    deltaTime: f32,
    frame: u32,
    aspect: f32,
}
@group(0) @binding(0) var<uniform> globals: Globals;
";

/// Whether `source` reads any `globals.<field>`.
///
/// A textual check evaluated once per unit, not a dataflow analysis: a
/// reference inside dead code still counts, a reference inside a comment
/// does not.
#[must_use]
pub fn uses_globals(source: &str) -> bool {
    const NEEDLE: &str = "globals.";
    let stripped = strip_comments(source);
    let bytes = stripped.as_bytes();
    let mut from = 0;
    while let Some(pos) = stripped[from..].find(NEEDLE) {
        let start = from + pos;
        let end = start + NEEDLE.len();
        let preceded_by_ident = start > 0 && is_ident_byte(bytes[start - 1]);
        let followed_by_field = bytes.get(end).is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_');
        if !preceded_by_ident && followed_by_field {
            return true;
        }
        from = end;
    }
    false
}

// ─── CPU State ───────────────────────────────────────────────────────────────

/// GPU image of the globals struct. 32 bytes, 16-byte aligned.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GlobalsUniforms {
    pub resolution: [f32; 2],
    pub time: f32,
    pub delta_time: f32,
    pub frame: u32,
    pub aspect: f32,
    pub _padding: [f32; 2],
}

/// Per-context frame clock and viewport description.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalsState {
    /// Accumulated scaled time in seconds.
    pub time: f32,
    pub delta_time: f32,
    pub frame: u64,
    /// Physical pixel size of the presentation surface.
    pub resolution: [f32; 2],
    pub aspect: f32,
    pub time_scale: f32,
    pub paused: bool,
}

impl Default for GlobalsState {
    fn default() -> Self {
        Self {
            time: 0.0,
            delta_time: 0.0,
            frame: 0,
            resolution: [1.0, 1.0],
            aspect: 1.0,
            time_scale: 1.0,
            paused: false,
        }
    }
}

impl GlobalsState {
    /// Advances the clock by `elapsed` wall seconds.
    ///
    /// While paused `delta_time` is zero and `time` holds still, but the frame
    /// counter keeps counting.
    pub fn advance(&mut self, elapsed: f32) {
        self.delta_time = if self.paused {
            0.0
        } else {
            elapsed.max(0.0) * self.time_scale
        };
        self.time += self.delta_time;
        self.frame += 1;
        self.aspect = aspect_of(self.resolution);
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.resolution = [width as f32, height as f32];
        self.aspect = aspect_of(self.resolution);
    }

    #[must_use]
    pub fn to_uniforms(&self) -> GlobalsUniforms {
        GlobalsUniforms {
            resolution: self.resolution,
            time: self.time,
            delta_time: self.delta_time,
            frame: self.frame as u32,
            aspect: self.aspect,
            _padding: [0.0; 2],
        }
    }
}

fn aspect_of(resolution: [f32; 2]) -> f32 {
    if resolution[1] > 0.0 {
        resolution[0] / resolution[1]
    } else {
        1.0
    }
}

/// Wall-clock source for frame deltas.
#[derive(Debug)]
pub struct FrameTimer {
    last_tick: Option<Instant>,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTimer {
    #[must_use]
    pub fn new() -> Self {
        Self { last_tick: None }
    }

    /// Time since the previous tick. The first tick reports zero.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = self.last_tick.map_or(Duration::ZERO, |last| now - last);
        self.last_tick = Some(now);
        delta
    }
}

// ─── GPU Controller ──────────────────────────────────────────────────────────

/// Owns the globals buffer and its group-0 bind group.
pub struct GlobalsController {
    state: GlobalsState,
    timer: FrameTimer,
    buffer: wgpu::Buffer,
    layout: wgpu::BindGroupLayout,
    layout_id: u64,
    bind_group: wgpu::BindGroup,
}

impl GlobalsController {
    pub(crate) fn new(device: &wgpu::Device, layout: wgpu::BindGroupLayout, layout_id: u64) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Globals Uniforms"),
            size: std::mem::size_of::<GlobalsUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Globals BindGroup"),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });

        Self {
            state: GlobalsState::default(),
            timer: FrameTimer::new(),
            buffer,
            layout,
            layout_id,
            bind_group,
        }
    }

    /// Layout entries of group 0 as seen by every stage.
    #[must_use]
    pub fn layout_entries() -> [wgpu::BindGroupLayoutEntry; 1] {
        [wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT | wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<GlobalsUniforms>() as u64),
            },
            count: None,
        }]
    }

    /// Advances by the wall-clock time since the previous frame.
    pub(crate) fn advance(&mut self, queue: &wgpu::Queue) {
        let elapsed = self.timer.tick().as_secs_f32();
        self.advance_by(queue, elapsed);
    }

    /// Advances by a host-supplied delta and uploads the struct.
    pub(crate) fn advance_by(&mut self, queue: &wgpu::Queue, elapsed: f32) {
        self.state.advance(elapsed);
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(&self.state.to_uniforms()));

        log::trace!("globals frame {} t={:.4}", self.state.frame, self.state.time);
        telemetry::emit(
            TelemetryEvent::new(EventKind::Globals, EventPhase::Instant)
                .with_field(EventField::Frame(self.state.frame))
                .with_field(EventField::Time(self.state.time)),
        );
    }

    /// Uploads the current state without advancing the clock.
    pub(crate) fn sync(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(&self.state.to_uniforms()));
    }

    pub(crate) fn set_resolution(&mut self, width: u32, height: u32) {
        self.state.set_resolution(width, height);
    }

    pub(crate) fn set_time_scale(&mut self, scale: f32) {
        self.state.time_scale = scale;
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.state.paused = paused;
    }

    #[must_use]
    pub fn state(&self) -> GlobalsState {
        self.state
    }

    pub(crate) fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub(crate) fn layout_id(&self) -> u64 {
        self.layout_id
    }

    pub(crate) fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}
