//! Shader preparation and pipeline caching.

pub mod cache;
pub mod key;
pub mod shader;

pub use cache::{ComputePipelineId, RenderPipelineId};
pub use key::{ComputePipelineKey, RenderPipelineKey};
pub use shader::{EntryPoint, EntryStage, PreparedShader, ShaderStages, find_entry_points};
