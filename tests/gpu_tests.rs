//! GPU Integration Tests
//!
//! Tests for:
//! - DrawUnit: fullscreen passes, pipeline sharing, binding errors at draw,
//!   state changes, oversized uniforms
//! - Context: frame protocol and globals delivery
//! - RenderTarget: readback, resize, float formats, presentation target
//! - PingPong: swap semantics and multi-pass feedback
//! - StorageBuffer: exact length bounds
//! - ComputeUnit: storage buffer round trip, empty dispatch
//!
//! Every test returns early when no GPU adapter is available.

mod common;

use common::{solid_color_shader, try_context};
use myth_shade::binding::BindingKind;
use myth_shade::{
    BlendMode, ComputeOptions, ComputeUnit, DrawOptions, DrawUnit, LoadMode, PingPong, PixelData, ShadeError,
    StorageBuffer, TargetConfig, UnitState, Uniforms, VertexBufferDesc,
};

fn read(target: &myth_shade::RenderTarget) -> PixelData {
    pollster::block_on(target.read_pixels()).expect("readback")
}

// ============================================================================
// Draw Tests
// ============================================================================

#[test]
fn fullscreen_red_fills_every_pixel() {
    let Some(ctx) = try_context(64, 64) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(64, 64)).unwrap();
    let mut unit =
        DrawUnit::new(&ctx, &solid_color_shader([1.0, 0.0, 0.0, 1.0]), Uniforms::new(), DrawOptions::default())
            .unwrap();

    unit.draw(&target).unwrap();

    let pixels = read(&target);
    let bytes = pixels.as_u8().unwrap();
    assert_eq!(bytes.len(), 64 * 64 * 4);
    assert!(bytes.chunks_exact(4).all(|px| px == [255, 0, 0, 255]));
    assert_eq!(unit.state(), UnitState::Ready);
}

#[test]
fn identical_sources_share_one_pipeline() {
    let Some(ctx) = try_context(16, 16) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(16, 16)).unwrap();
    let source = solid_color_shader([0.0, 1.0, 0.0, 1.0]);

    let mut a = DrawUnit::new(&ctx, &source, Uniforms::new(), DrawOptions::default()).unwrap();
    let mut b = DrawUnit::new(&ctx, &source, Uniforms::new(), DrawOptions::default()).unwrap();
    a.draw(&target).unwrap();
    b.draw(&target).unwrap();
    a.draw(&target).unwrap();

    assert_eq!(a.pipeline_id(), b.pipeline_id());
    assert_eq!(ctx.pipeline_compile_count(), 1);
    assert_eq!(ctx.shader_module_count(), 1);
}

#[test]
fn missing_storage_binding_fails_every_unit_at_draw() {
    let Some(ctx) = try_context(8, 8) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(8, 8)).unwrap();
    let source = "@group(1) @binding(2) var<storage, read_write> particles: array<f32>;
@fragment
fn main() -> @location(0) vec4<f32> {
    return vec4<f32>(particles[0]);
}";

    for _ in 0..2 {
        let mut unit = DrawUnit::new(&ctx, source, Uniforms::new(), DrawOptions::default()).unwrap();
        assert!(unit.validate().is_some());

        let err = unit.draw(&target).unwrap_err();
        let ShadeError::Bindings(problems) = &err else {
            panic!("expected a binding error, got {err:?}");
        };
        let problem = problems.find("particles").unwrap();
        assert_eq!(problem.group, 1);
        assert_eq!(problem.binding, 2);
        assert_eq!(problem.kind, BindingKind::StorageReadWrite);
        assert!(err.to_string().contains("storage buffer"), "{err}");
    }
}

#[test]
fn uniform_values_reach_the_shader() {
    let Some(ctx) = try_context(4, 4) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(4, 4)).unwrap();
    let source = "@group(1) @binding(0) var<uniform> tint: vec4<f32>;
@fragment
fn main() -> @location(0) vec4<f32> {
    return tint;
}";
    let uniforms = Uniforms::new().with("tint", [0.0_f32, 0.0, 1.0, 1.0]);
    let mut unit = DrawUnit::new(&ctx, source, uniforms, DrawOptions::default()).unwrap();
    unit.draw(&target).unwrap();
    assert_eq!(&read(&target).as_u8().unwrap()[..4], &[0, 0, 255, 255]);

    unit.uniforms().get("tint").unwrap().set([1.0_f32, 1.0, 1.0, 1.0]);
    unit.draw(&target).unwrap();
    assert_eq!(&read(&target).as_u8().unwrap()[..4], &[255, 255, 255, 255]);
}

#[test]
fn hex_binding_indices_still_bind() {
    let Some(ctx) = try_context(4, 4) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(4, 4)).unwrap();
    let source = "@group(0x1) @binding(0x0) var<uniform> tint: vec4f;
@fragment
fn main() -> @location(0) vec4<f32> {
    return tint;
}";
    let uniforms = Uniforms::new().with("tint", [1.0_f32, 0.0, 1.0, 1.0]);
    let mut unit = DrawUnit::new(&ctx, source, uniforms, DrawOptions::default()).unwrap();
    unit.draw(&target).unwrap();
    assert_eq!(&read(&target).as_u8().unwrap()[..4], &[255, 0, 255, 255]);
}

#[test]
fn oversized_uniform_payload_is_rejected() {
    let Some(ctx) = try_context(4, 4) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(4, 4)).unwrap();
    let source = "@group(1) @binding(0) var<uniform> tint: vec4<f32>;
@fragment
fn main() -> @location(0) vec4<f32> {
    return tint;
}";
    let uniforms = Uniforms::new().with("tint", vec![0.5_f32; 8]);
    let mut unit = DrawUnit::new(&ctx, source, uniforms, DrawOptions::default()).unwrap();

    let err = unit.draw(&target).unwrap_err();
    let ShadeError::IncompatibleResource { name, reason } = &err else {
        panic!("expected an incompatible resource, got {err:?}");
    };
    assert_eq!(name, "tint");
    assert!(reason.contains("32 bytes"), "{reason}");

    unit.uniforms().get("tint").unwrap().set([0.0_f32, 1.0, 0.0, 1.0]);
    unit.draw(&target).unwrap();
    assert_eq!(&read(&target).as_u8().unwrap()[..4], &[0, 255, 0, 255]);
}

#[test]
fn blend_change_switches_only_that_units_pipeline() {
    let Some(ctx) = try_context(4, 4) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(4, 4)).unwrap();
    let source = solid_color_shader([0.25, 0.0, 0.0, 1.0]);
    let mut glow = DrawUnit::new(&ctx, &source, Uniforms::new(), DrawOptions::default()).unwrap();
    let mut plain = DrawUnit::new(&ctx, &source, Uniforms::new(), DrawOptions::default()).unwrap();

    glow.draw(&target).unwrap();
    plain.draw(&target).unwrap();
    assert_eq!(glow.pipeline_id(), plain.pipeline_id());
    assert_eq!(ctx.pipeline_compile_count(), 1);
    let shared = plain.pipeline_id();

    glow.set_blend(BlendMode::Additive);
    glow.set_load(LoadMode::Load);
    assert_eq!(glow.state(), UnitState::Dirty);
    assert_eq!(glow.pipeline_id(), None);

    glow.draw(&target).unwrap();
    assert_eq!(glow.state(), UnitState::Ready);
    assert_eq!(ctx.pipeline_compile_count(), 2);
    assert_ne!(glow.pipeline_id(), shared);
    let red = read(&target).as_u8().unwrap()[0];
    assert!(red.abs_diff(128) <= 1, "additive red was {red}");

    plain.draw(&target).unwrap();
    assert_eq!(plain.pipeline_id(), shared);
    assert_eq!(ctx.pipeline_compile_count(), 2);
    assert_eq!(&read(&target).as_u8().unwrap()[..4], &[64, 0, 0, 255]);
}

#[test]
fn shader_without_globals_does_not_bind_them() {
    let Some(ctx) = try_context(8, 8) else { return };
    let plain = DrawUnit::new(&ctx, &solid_color_shader([0.0; 4]), Uniforms::new(), DrawOptions::default()).unwrap();
    assert!(!plain.uses_globals());

    let animated = DrawUnit::new(
        &ctx,
        "@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(fract(globals.time), 0.0, 0.0, 1.0); }",
        Uniforms::new(),
        DrawOptions::default(),
    )
    .unwrap();
    assert!(animated.uses_globals());
}

#[test]
fn disposed_unit_refuses_to_draw() {
    let Some(ctx) = try_context(8, 8) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(8, 8)).unwrap();
    let mut unit =
        DrawUnit::new(&ctx, &solid_color_shader([1.0; 4]), Uniforms::new(), DrawOptions::default()).unwrap();
    unit.dispose();
    assert!(matches!(unit.draw(&target), Err(ShadeError::Disposed(_))));
}

#[test]
fn headless_context_has_no_drawable_screen() {
    let Some(ctx) = try_context(8, 8) else { return };
    let mut unit =
        DrawUnit::new(&ctx, &solid_color_shader([1.0; 4]), Uniforms::new(), DrawOptions::default()).unwrap();
    assert!(matches!(unit.draw(&ctx.screen()), Err(ShadeError::Surface(_))));
}

#[test]
fn vertex_buffer_drives_vertex_count() {
    let Some(ctx) = try_context(8, 8) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(8, 8)).unwrap();
    let positions = StorageBuffer::from_pod(&ctx, &[-1.0_f32, -1.0, 3.0, -1.0, -1.0, 3.0], Some("positions")).unwrap();
    let source = "@vertex
fn vs(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}
@fragment
fn fs() -> @location(0) vec4<f32> {
    return vec4<f32>(0.0, 0.0, 1.0, 1.0);
}";
    let options = DrawOptions {
        vertex_buffers: vec![VertexBufferDesc::new(
            &positions,
            8,
            vec![wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: 0,
                shader_location: 0,
            }],
        )],
        ..Default::default()
    };
    let mut unit = DrawUnit::new(&ctx, source, Uniforms::new(), options).unwrap();
    assert!(!unit.is_fullscreen());
    unit.draw(&target).unwrap();

    assert!(read(&target).as_u8().unwrap().chunks_exact(4).all(|px| px == [0, 0, 255, 255]));
}

#[test]
fn misaligned_vertex_stride_is_rejected() {
    let Some(ctx) = try_context(8, 8) else { return };
    let positions = StorageBuffer::new(&ctx, 24, None).unwrap();
    let options = DrawOptions {
        vertex_buffers: vec![VertexBufferDesc::new(
            &positions,
            6,
            vec![wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32,
                offset: 0,
                shader_location: 0,
            }],
        )],
        ..Default::default()
    };
    let source = "@vertex fn vs(@location(0) x: f32) -> @builtin(position) vec4<f32> { return vec4<f32>(x); }
@fragment fn fs() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";
    let err = DrawUnit::new(&ctx, source, Uniforms::new(), options).unwrap_err();
    assert!(matches!(err, ShadeError::InvalidVertexLayout(_)));
}

// ============================================================================
// Frame Tests
// ============================================================================

const FRAME_COUNTER: &str = "@fragment
fn main() -> @location(0) vec4<f32> {
    return vec4<f32>(f32(globals.frame) / 255.0, globals.resolution.x / 255.0, globals.resolution.y / 255.0, 1.0);
}";

#[test]
fn globals_advance_once_per_frame_and_reach_the_shader() {
    let Some(ctx) = try_context(16, 8) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(1, 1)).unwrap();
    let mut unit = DrawUnit::new(&ctx, FRAME_COUNTER, Uniforms::new(), DrawOptions::default()).unwrap();
    assert!(unit.uses_globals());

    for frame in 1..=2_u8 {
        ctx.begin_frame().unwrap();
        assert!(matches!(ctx.begin_frame(), Err(ShadeError::FrameInProgress)));
        assert!(ctx.frame_in_progress());

        unit.draw(&target).unwrap();
        ctx.end_frame().unwrap();

        assert_eq!(ctx.globals().frame, u64::from(frame));
        assert_eq!(read(&target).as_u8().unwrap(), &[frame, 16, 8, 255]);
    }

    assert!(matches!(ctx.end_frame(), Err(ShadeError::NoFrameInProgress)));
}

// ============================================================================
// Target Tests
// ============================================================================

#[test]
fn resize_keeps_the_handle_and_changes_readback_size() {
    let Some(ctx) = try_context(8, 8) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(8, 8)).unwrap();
    let before = target.texture();

    target.resize(32, 16).unwrap();

    assert_eq!(target.texture(), before);
    assert_eq!(target.size().unwrap(), (32, 16));
    assert_eq!(read(&target).len(), 32 * 16 * 4);
}

#[test]
fn captured_texture_reference_follows_a_resize() {
    let Some(ctx) = try_context(4, 4) else { return };
    let source_target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(4, 4)).unwrap();
    let output = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(1, 1)).unwrap();
    let shader = "@group(1) @binding(0) var src: texture_2d<f32>;
@fragment
fn main() -> @location(0) vec4<f32> {
    let size = vec2<f32>(textureDimensions(src));
    return vec4<f32>(size.x / 255.0, size.y / 255.0, 0.0, 1.0);
}";
    let uniforms = Uniforms::new().with("src", source_target.texture());
    let mut unit = DrawUnit::new(&ctx, shader, uniforms, DrawOptions::default()).unwrap();

    unit.draw(&output).unwrap();
    assert_eq!(read(&output).as_u8().unwrap(), &[4, 4, 0, 255]);

    source_target.resize(8, 2).unwrap();
    unit.draw(&output).unwrap();
    assert_eq!(read(&output).as_u8().unwrap(), &[8, 2, 0, 255]);
}

#[test]
fn blocking_and_async_readback_agree() {
    let Some(ctx) = try_context(4, 4) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(4, 4)).unwrap();
    let mut unit =
        DrawUnit::new(&ctx, &solid_color_shader([0.0, 0.0, 1.0, 1.0]), Uniforms::new(), DrawOptions::default())
            .unwrap();
    unit.draw(&target).unwrap();

    let blocking = target.read_pixels_blocking().unwrap();
    assert_eq!(blocking, read(&target));
    assert!(blocking.as_u8().unwrap().chunks_exact(4).all(|px| px == [0, 0, 255, 255]));
}

#[test]
fn float_target_reads_back_as_f32() {
    let Some(ctx) = try_context(4, 4) else { return };
    let config = TargetConfig::sized(4, 4).with_format(wgpu::TextureFormat::Rgba32Float);
    let target = myth_shade::RenderTarget::new(&ctx, &config).unwrap();
    let mut unit =
        DrawUnit::new(&ctx, &solid_color_shader([0.25, 2.0, -1.0, 1.0]), Uniforms::new(), DrawOptions::default())
            .unwrap();
    unit.draw(&target).unwrap();

    let pixels = read(&target);
    let floats = pixels.as_f32().expect("float readback");
    assert_eq!(floats.len(), 4 * 4 * 4);
    assert_eq!(&floats[..4], &[0.25, 2.0, -1.0, 1.0]);
}

#[test]
fn presentation_target_cannot_be_read() {
    let Some(ctx) = try_context(8, 8) else { return };
    let result = pollster::block_on(ctx.screen().read_pixels());
    assert!(matches!(result, Err(ShadeError::UnreadableTarget)));
}

#[test]
fn written_pixels_read_back_unchanged() {
    let Some(ctx) = try_context(3, 2) else { return };
    let target = myth_shade::RenderTarget::new(&ctx, &TargetConfig::sized(3, 2)).unwrap();
    let data: Vec<u8> = (0..3 * 2 * 4).map(|i| i as u8).collect();
    target.write_pixels(&data).unwrap();
    assert_eq!(read(&target).as_u8().unwrap(), data.as_slice());

    assert!(matches!(target.write_pixels(&data[..5]), Err(ShadeError::StorageOverflow { .. })));
}

// ============================================================================
// Ping-Pong Tests
// ============================================================================

#[test]
fn double_swap_restores_roles() {
    let Some(ctx) = try_context(8, 8) else { return };
    let mut pair = PingPong::new(&ctx, &TargetConfig::sized(8, 8)).unwrap();
    let read_before = pair.read().texture();
    let write_before = pair.write().texture();
    assert_ne!(read_before, write_before);

    pair.swap();
    assert_eq!(pair.read().texture(), write_before);
    pair.swap();
    assert_eq!(pair.read().texture(), read_before);
    assert_eq!(pair.write().texture(), write_before);
}

#[test]
fn feedback_passes_preserve_a_constant() {
    let Some(ctx) = try_context(8, 8) else { return };
    let mut pair = PingPong::new(&ctx, &TargetConfig::sized(8, 8)).unwrap();

    let mut seed =
        DrawUnit::new(&ctx, &solid_color_shader([0.0, 1.0, 0.0, 1.0]), Uniforms::new(), DrawOptions::default())
            .unwrap();
    seed.draw(pair.write()).unwrap();
    pair.swap();

    let copy_source = "@group(1) @binding(0) var src: texture_2d<f32>;
@group(1) @binding(1) var srcSampler: sampler;
@fragment
fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(src, srcSampler, uv);
}";
    let mut copy = DrawUnit::new(&ctx, copy_source, Uniforms::new(), DrawOptions::default()).unwrap();
    for _ in 0..3 {
        copy.uniforms_mut().insert("src", pair.read());
        copy.draw(pair.write()).unwrap();
        pair.swap();
    }

    let pixels = read(pair.read());
    assert!(pixels.as_u8().unwrap().chunks_exact(4).all(|px| px == [0, 255, 0, 255]));
}

// ============================================================================
// Storage Tests
// ============================================================================

#[test]
fn storage_bounds_use_the_requested_length() {
    let Some(ctx) = try_context(4, 4) else { return };
    let buffer = StorageBuffer::new(&ctx, 6, Some("odd")).unwrap();
    assert_eq!(buffer.byte_length(), 6);

    buffer.write(&[1, 2, 3, 4, 5, 6]).unwrap();
    assert!(matches!(
        buffer.write(&[0; 7]),
        Err(ShadeError::StorageOverflow { len: 7, capacity: 6 })
    ));
    assert!(matches!(buffer.write_at(4, &[0; 4]), Err(ShadeError::StorageOverflow { .. })));

    assert_eq!(buffer.read_blocking().unwrap(), vec![1, 2, 3, 4, 5, 6]);
}

// ============================================================================
// Compute Tests
// ============================================================================

const DOUBLE: &str = "@group(1) @binding(0) var<storage, read_write> data: array<f32>;
@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = data[id.x] * 2.0;
    }
}";

#[test]
fn compute_doubles_a_storage_buffer() -> anyhow::Result<()> {
    let Some(ctx) = try_context(8, 8) else { return Ok(()) };
    let buffer = StorageBuffer::from_pod(&ctx, &[1.0_f32, 2.0, 3.0, 4.0], Some("data"))?;
    let uniforms = Uniforms::new().with("data", &buffer);
    let mut unit = ComputeUnit::new(&ctx, DOUBLE, uniforms, ComputeOptions::default())?;
    assert_eq!(unit.workgroup_size(), [64, 1, 1]);

    unit.dispatch_for_size(4, 1)?;

    let values: Vec<f32> = pollster::block_on(buffer.read_pod())?;
    assert_eq!(values, vec![2.0, 4.0, 6.0, 8.0]);
    Ok(())
}

#[test]
fn zero_sized_dispatch_is_a_no_op() {
    let Some(ctx) = try_context(8, 8) else { return };
    // Bindings are deliberately absent: an empty dispatch never validates them.
    let mut unit = ComputeUnit::new(&ctx, DOUBLE, Uniforms::new(), ComputeOptions::default()).unwrap();
    unit.dispatch(0, 1, 1).unwrap();
    unit.dispatch(4, 0, 1).unwrap();
    assert_eq!(unit.pipeline_id(), None);
    assert_eq!(ctx.pipeline_compile_count(), 0);
}

#[test]
fn compute_reports_missing_storage_by_kind() {
    let Some(ctx) = try_context(8, 8) else { return };
    let mut unit = ComputeUnit::new(&ctx, DOUBLE, Uniforms::new(), ComputeOptions::default()).unwrap();
    let err = unit.dispatch(1, 1, 1).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("data"), "{message}");
    assert!(message.contains("group 1"), "{message}");
    assert!(message.contains("storage buffer"), "{message}");
}
