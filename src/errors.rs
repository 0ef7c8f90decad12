//! Error Types
//!
//! This module defines the error types used throughout the runtime.
//!
//! # Overview
//!
//! The main error type [`ShadeError`] is split into four families:
//! - Capability failures (adapter, device, surface) reported once at start-up
//! - Construction errors (target formats, vertex layouts, shader compilation)
//! - Binding validation errors raised lazily at the first draw or dispatch
//! - Misuse errors (use after dispose, readback of the presentation target)
//!
//! Warnings such as a missing sampler never become errors; they are logged
//! and rendering continues with a fallback.
//!
//! # Usage
//!
//! ```rust,ignore
//! use myth_shade::errors::{ShadeError, Result};
//!
//! fn draw_frame(unit: &mut DrawUnit, target: &RenderTarget) -> Result<()> {
//!     unit.draw(target)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::binding::BindingProblems;

/// The main error type for the shading runtime.
#[derive(Error, Debug)]
pub enum ShadeError {
    // ========================================================================
    // Capability Errors
    // ========================================================================
    /// No adapter satisfying the request was found.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// Failed to create a presentation surface for the window.
    #[error("Failed to create surface: {0}")]
    SurfaceCreateFailed(#[from] wgpu::CreateSurfaceError),

    /// The platform cannot run the requested feature at all.
    #[error("Platform unsupported: {0}")]
    PlatformUnsupported(String),

    // ========================================================================
    // Construction Errors
    // ========================================================================
    /// Render target format / usage / filter combination is invalid.
    #[error("Invalid render target configuration: {0}")]
    InvalidTargetConfig(String),

    /// Storage buffer size is zero or beyond the device limit.
    #[error("Invalid storage buffer size {requested} (device limit {limit} bytes)")]
    InvalidBufferSize { requested: u64, limit: u64 },

    /// Vertex buffer description cannot be turned into a pipeline.
    #[error("Invalid vertex layout: {0}")]
    InvalidVertexLayout(String),

    /// Blending was requested on a format that cannot blend.
    #[error("Blending is not supported for format {0:?}")]
    UnsupportedBlend(wgpu::TextureFormat),

    /// The shader did not parse or validate.
    #[error("{}", format_compile_error(.message, .line, .column))]
    ShaderCompile {
        message: String,
        /// 1-based line in the caller's source, if known.
        line: Option<u32>,
        /// 1-based column in the caller's source, if known.
        column: Option<u32>,
        /// The full WGSL text handed to the compiler.
        source_code: String,
    },

    /// The shader has no entry point of the required stage.
    #[error("Shader has no `{0}` entry point")]
    MissingEntryPoint(&'static str),

    // ========================================================================
    // Binding Validation Errors
    // ========================================================================
    /// One or more shader bindings could not be satisfied by the uniform map.
    #[error("{0}")]
    Bindings(BindingProblems),

    /// A bound resource exists but cannot serve the declared binding.
    #[error("Binding `{name}` cannot use the supplied resource: {reason}")]
    IncompatibleResource { name: String, reason: String },

    // ========================================================================
    // Misuse Errors
    // ========================================================================
    /// The object (unit, target, buffer or context) has been disposed.
    #[error("{0} used after dispose")]
    Disposed(&'static str),

    /// A handle refers to a resource that no longer exists.
    #[error("Stale {0} handle: the resource was disposed")]
    StaleHandle(&'static str),

    /// Readback was requested from a target without CPU-readable storage.
    #[error("The presentation target cannot be read back; render into an offscreen target instead")]
    UnreadableTarget,

    /// Drawing to the screen needs a frame begun with `Context::begin_frame`.
    #[error("No frame in progress; call `Context::begin_frame` before drawing to the screen")]
    NoFrameInProgress,

    /// `begin_frame` was called twice without `end_frame`.
    #[error("A frame is already in progress; call `Context::end_frame` first")]
    FrameInProgress,

    /// The surface texture could not be acquired.
    #[error("Surface error: {0}")]
    Surface(String),

    /// A write exceeded the fixed size of a storage buffer.
    #[error("Write of {len} bytes exceeds storage buffer capacity of {capacity} bytes")]
    StorageOverflow { len: u64, capacity: u64 },

    /// Mapping a readback buffer failed.
    #[error("Readback failed: {0}")]
    Readback(String),

    /// Buffer mapping returned an error.
    #[error("Buffer map error: {0}")]
    BufferAsync(#[from] wgpu::BufferAsyncError),
}

fn format_compile_error(message: &str, line: &Option<u32>, column: &Option<u32>) -> String {
    match (*line, *column) {
        (Some(line), Some(column)) => format!("Shader compile error at {line}:{column}: {message}"),
        (Some(line), None) => format!("Shader compile error at line {line}: {message}"),
        _ => format!("Shader compile error: {message}"),
    }
}

/// Alias for `Result<T, ShadeError>`.
pub type Result<T> = std::result::Result<T, ShadeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_mentions_position() {
        let err = ShadeError::ShaderCompile {
            message: "expected `;`".into(),
            line: Some(4),
            column: Some(12),
            source_code: String::new(),
        };
        assert_eq!(err.to_string(), "Shader compile error at 4:12: expected `;`");
    }

    #[test]
    fn storage_overflow_reports_sizes() {
        let err = ShadeError::StorageOverflow { len: 32, capacity: 16 };
        assert!(err.to_string().contains("32 bytes"));
        assert!(err.to_string().contains("16 bytes"));
    }
}
