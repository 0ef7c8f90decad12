//! Shared helpers for GPU integration tests.
//!
//! Tests that need a device call [`try_context`] and return early when the
//! machine has no usable adapter, so the suite still passes on CI runners
//! without a GPU.

#![allow(dead_code)]

use myth_shade::{Context, ContextSettings, ShadeError};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A fresh headless context, or `None` when no adapter is available.
pub fn try_context(width: u32, height: u32) -> Option<Context> {
    init_logging();
    match Context::headless_blocking(width, height, ContextSettings::default()) {
        Ok(ctx) => Some(ctx),
        Err(ShadeError::AdapterRequestFailed(_) | ShadeError::DeviceCreateFailed(_)) => {
            log::warn!("no GPU adapter available; skipping");
            None
        }
        Err(e) => panic!("unexpected context error: {e}"),
    }
}

/// Fragment-only shader writing a constant color.
pub fn solid_color_shader(rgba: [f32; 4]) -> String {
    format!(
        "@fragment\nfn main() -> @location(0) vec4<f32> {{\n    return vec4<f32>({:?}, {:?}, {:?}, {:?});\n}}\n",
        rgba[0], rgba[1], rgba[2], rgba[3]
    )
}
