//! Configuration and Telemetry Tests
//!
//! Tests for:
//! - ContextSettings / TargetConfig / ComputeOptions: serde defaults
//! - GlobalsState: clock semantics and the 32-byte uniform layout
//! - Telemetry bus: subscription delivery, ring capacity

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use myth_shade::globals::{GlobalsUniforms, GLOBALS_WGSL};
use myth_shade::telemetry::{self, EventBus};
use myth_shade::{
    BlendMode, ComputeOptions, ContextSettings, EventKind, EventPhase, Filter, GlobalsState, LoadMode, PixelRatio,
    TargetConfig, TargetUsage, TelemetryEvent,
};

// ============================================================================
// Settings Tests
// ============================================================================

#[test]
fn settings_default_matches_documented_table() {
    let settings = ContextSettings::default();
    assert!(settings.auto_resize);
    assert!(settings.vsync);
    assert!(!settings.debug);
    assert_eq!(settings.device_pixel_ratio, PixelRatio::Clamped { min: 1.0, max: 2.0 });
    assert_eq!(settings.event_capacity, telemetry::DEFAULT_EVENT_CAPACITY);
}

#[test]
fn target_config_fills_missing_fields() {
    let config: TargetConfig = serde_json::from_str(r#"{ "format": "rgba16float", "size": [128, 64] }"#).unwrap();
    assert_eq!(config.format, wgpu::TextureFormat::Rgba16Float);
    assert_eq!(config.size, Some([128, 64]));
    assert_eq!(config.filter, Filter::Linear);
    assert_eq!(config.usage, TargetUsage::Render);
}

#[test]
fn target_usage_flags_always_allow_sampling_and_copies() {
    for usage in [TargetUsage::Render, TargetUsage::Storage, TargetUsage::Both] {
        let flags = usage.flags();
        assert!(flags.contains(wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC));
    }
    assert!(!TargetUsage::Render.flags().contains(wgpu::TextureUsages::STORAGE_BINDING));
    assert!(TargetUsage::Both.flags().contains(
        wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT
    ));
}

#[test]
fn compute_options_load_from_json() {
    let options: ComputeOptions = serde_json::from_str(r#"{ "entry_point": "integrate" }"#).unwrap();
    assert_eq!(options.entry_point.as_deref(), Some("integrate"));
    assert_eq!(options.label, None);
}

#[test]
fn draw_option_enums_have_expected_defaults() {
    assert_eq!(BlendMode::default(), BlendMode::Replace);
    assert_eq!(LoadMode::default(), LoadMode::Clear([0.0, 0.0, 0.0, 1.0]));
}

// ============================================================================
// Globals Tests
// ============================================================================

#[test]
fn globals_uniform_layout_is_32_bytes() {
    assert_eq!(std::mem::size_of::<GlobalsUniforms>(), 32);
    assert!(GLOBALS_WGSL.contains("@group(0) @binding(0)"));
}

#[test]
fn globals_clock_scales_and_pauses() {
    let mut state = GlobalsState::default();
    state.set_resolution(800, 400);
    state.time_scale = 2.0;
    state.advance(0.25);
    assert_eq!(state.time, 0.5);
    assert_eq!(state.delta_time, 0.5);
    assert_eq!(state.frame, 1);
    assert_eq!(state.aspect, 2.0);

    state.paused = true;
    state.advance(1.0);
    assert_eq!(state.time, 0.5);
    assert_eq!(state.delta_time, 0.0);
    assert_eq!(state.frame, 2);
}

// ============================================================================
// Telemetry Tests
// ============================================================================

#[test]
fn subscribers_receive_published_events() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let id = telemetry::subscribe(move |event| {
        if event.label.as_deref() == Some("config-tests-subscriber") {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    telemetry::emit(
        TelemetryEvent::new(EventKind::Resize, EventPhase::Instant).with_label(Some("config-tests-subscriber")),
    );
    assert!(telemetry::unsubscribe(id));
    telemetry::emit(
        TelemetryEvent::new(EventKind::Resize, EventPhase::Instant).with_label(Some("config-tests-subscriber")),
    );

    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn published_events_stay_in_the_ring() {
    telemetry::emit(
        TelemetryEvent::new(EventKind::Readback, EventPhase::Instant).with_label(Some("config-tests-ring")),
    );
    let recent = telemetry::bus().lock().recent();
    assert!(recent.iter().any(|e| e.label.as_deref() == Some("config-tests-ring")));
}

#[test]
fn shrinking_a_bus_never_loses_subscribers() {
    let mut bus = EventBus::with_capacity(8);
    let id = bus.subscribe(Arc::new(|_: &TelemetryEvent| {}));
    bus.set_capacity(0);
    assert_eq!(bus.capacity(), 1);
    assert!(bus.unsubscribe(id));
    assert!(!bus.unsubscribe(id));
}
