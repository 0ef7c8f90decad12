//! Context Settings
//!
//! Configuration consumed once by [`Context::headless`](crate::Context::headless)
//! and [`Context::with_window`](crate::Context::with_window).
//!
//! ```rust,ignore
//! use myth_shade::{ContextSettings, PixelRatio};
//!
//! let settings = ContextSettings {
//!     device_pixel_ratio: PixelRatio::Clamped { min: 1.0, max: 1.5 },
//!     vsync: false,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

use crate::telemetry::DEFAULT_EVENT_CAPACITY;

/// How the physical surface size is derived from the host's CSS size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelRatio {
    /// Always use this ratio, ignoring the host.
    Fixed(f32),
    /// Use the host ratio clamped into `[min, max]`.
    Clamped { min: f32, max: f32 },
}

impl Default for PixelRatio {
    fn default() -> Self {
        Self::Clamped { min: 1.0, max: 2.0 }
    }
}

impl PixelRatio {
    /// Effective ratio for a host-reported `host` ratio.
    #[must_use]
    pub fn resolve(self, host: f32) -> f32 {
        let host = if host.is_finite() && host > 0.0 { host } else { 1.0 };
        let ratio = match self {
            Self::Fixed(ratio) => ratio,
            Self::Clamped { min, max } => host.clamp(min.min(max), max.max(min)),
        };
        if ratio.is_finite() && ratio > 0.0 { ratio } else { 1.0 }
    }

    /// Physical pixel size for a CSS size, never smaller than 1x1.
    #[must_use]
    pub fn physical_size(self, host: f32, css_width: f32, css_height: f32) -> (u32, u32) {
        let ratio = self.resolve(host);
        (
            ((css_width * ratio).round() as u32).max(1),
            ((css_height * ratio).round() as u32).max(1),
        )
    }
}

/// Global configuration for context initialization.
///
/// | Field                | Description                                   | Default              |
/// |----------------------|-----------------------------------------------|----------------------|
/// | `auto_resize`        | Resize surface-sized targets with the surface | `true`               |
/// | `device_pixel_ratio` | CSS to physical pixel mapping                 | `Clamped { 1, 2 }`   |
/// | `debug`              | Log the final WGSL of every shader module     | `false`              |
/// | `power_preference`   | GPU adapter selection strategy                | `HighPerformance`    |
/// | `vsync`              | Vertical sync for the presentation surface    | `true`               |
/// | `event_capacity`     | Minimum telemetry ring size (process-wide)    | `1024`               |
///
/// The telemetry bus is shared by every context in the process. Creating a
/// context only ever grows its ring to `event_capacity`, so contexts never
/// shrink each other's history; use [`EventBus::set_capacity`] on
/// [`telemetry::bus`] to shrink it explicitly.
///
/// [`EventBus::set_capacity`]: crate::telemetry::EventBus::set_capacity
/// [`telemetry::bus`]: crate::telemetry::bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub auto_resize: bool,
    pub device_pixel_ratio: PixelRatio,
    pub debug: bool,
    pub power_preference: wgpu::PowerPreference,
    pub vsync: bool,
    pub event_capacity: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            auto_resize: true,
            device_pixel_ratio: PixelRatio::default(),
            debug: false,
            power_preference: wgpu::PowerPreference::HighPerformance,
            vsync: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_ratio_follows_host_within_bounds() {
        let ratio = PixelRatio::Clamped { min: 1.0, max: 2.0 };
        assert_eq!(ratio.resolve(1.5), 1.5);
        assert_eq!(ratio.resolve(3.0), 2.0);
        assert_eq!(ratio.resolve(0.5), 1.0);
        assert_eq!(ratio.resolve(f32::NAN), 1.0);
    }

    #[test]
    fn fixed_ratio_ignores_host() {
        assert_eq!(PixelRatio::Fixed(2.0).resolve(1.0), 2.0);
        assert_eq!(PixelRatio::Fixed(0.0).resolve(3.0), 1.0);
    }

    #[test]
    fn physical_size_rounds_and_never_collapses() {
        let ratio = PixelRatio::Fixed(1.5);
        assert_eq!(ratio.physical_size(1.0, 101.0, 0.0), (152, 1));
    }

    #[test]
    fn settings_load_from_partial_json() {
        let settings: ContextSettings =
            serde_json::from_str(r#"{ "vsync": false, "device_pixel_ratio": { "fixed": 2.0 } }"#).unwrap();
        assert!(!settings.vsync);
        assert!(settings.auto_resize);
        assert_eq!(settings.device_pixel_ratio, PixelRatio::Fixed(2.0));
    }
}
