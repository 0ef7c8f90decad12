//! GPU resources owned by a [`Context`](crate::Context).
//!
//! Textures and buffers live in generation-counted arenas; the public types
//! here are handles into them. A handle whose slot was freed fails with
//! `StaleHandle` instead of touching freed memory.

pub mod ids;
pub mod ping_pong;
pub mod readback;
pub mod sampler;
pub mod storage;
pub mod target;
pub mod texture;

pub use ids::{ResourceId, generate_resource_id};
pub use ping_pong::PingPong;
pub use readback::PixelData;
pub use sampler::{Filter, SamplerConfig, SamplerRef, Wrap};
pub use storage::{StorageBuffer, StorageRef};
pub use target::{RenderTarget, TargetConfig, TargetUsage};
pub use texture::TextureRef;
