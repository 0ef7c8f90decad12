#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Declarative resources and bindings for WGSL shaders on wgpu.
//!
//! A [`Context`] owns the device, the presentation surface (if any) and the
//! shared caches. [`DrawUnit`]s and [`ComputeUnit`]s pair a WGSL source with
//! a [`Uniforms`] map; bind groups, layouts and pipelines are derived from
//! the shader's `@group/@binding` declarations and rebuilt only when a bound
//! resource changes identity.

pub mod binding;
pub mod context;
pub mod errors;
pub mod globals;
pub mod pipeline;
pub mod resources;
pub mod settings;
pub mod telemetry;
pub mod uniforms;
pub mod unit;

pub use binding::{BindingDeclaration, BindingKind, BindingProblem, BindingProblems, parse_bindings, validate_bindings};
pub use context::Context;
pub use errors::{Result, ShadeError};
pub use globals::{GlobalsState, uses_globals};
pub use resources::{
    Filter, PingPong, PixelData, RenderTarget, SamplerConfig, SamplerRef, StorageBuffer, TargetConfig, TargetUsage,
    TextureRef, Wrap,
};
pub use settings::{ContextSettings, PixelRatio};
pub use telemetry::{EventField, EventKind, EventPhase, TelemetryEvent};
pub use uniforms::{TextureBinding, TypedArray, Uniform, UniformValue, Uniforms};
pub use unit::{
    BlendMode, ComputeOptions, ComputeUnit, DrawOptions, DrawUnit, IndexBufferDesc, LoadMode, UnitState,
    VertexBufferDesc,
};
