//! Binding Declaration Tests
//!
//! Tests for:
//! - parse_bindings: kind classification, ordering, skipped declarations
//! - validate_bindings: missing and mistyped uniforms, paired samplers
//! - PreparedShader: entry point discovery, globals prelude, compile errors

use myth_shade::binding::{BindingKind, ProblemReason, scan_bindings};
use myth_shade::pipeline::{EntryStage, PreparedShader, ShaderStages, find_entry_points};
use myth_shade::{ShadeError, Uniforms, parse_bindings, uses_globals, validate_bindings};

const ALL_KINDS: &str = r"
@group(1) @binding(0) var<uniform> params: Params;
@group(1) @binding(1) var<storage> points: array<vec4<f32>>;
@group(1) @binding(2) var<storage, read_write> out: array<f32>;
@group(2) @binding(0) var tex: texture_2d<f32>;
@group(2) @binding(1) var texSampler: sampler;
@group(2) @binding(2) var img: texture_storage_2d<rgba8unorm, write>;
@group(2) @binding(3) var shadow: sampler_comparison;
";

// ============================================================================
// Parser Tests
// ============================================================================

#[test]
fn parser_classifies_every_kind_in_source_order() {
    let decls = parse_bindings(ALL_KINDS);
    let kinds: Vec<_> = decls.iter().map(|d| (d.name.as_str(), d.group, d.binding, d.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            ("params", 1, 0, BindingKind::Uniform),
            ("points", 1, 1, BindingKind::StorageReadOnly),
            ("out", 1, 2, BindingKind::StorageReadWrite),
            ("tex", 2, 0, BindingKind::SampledTexture),
            ("texSampler", 2, 1, BindingKind::Sampler),
            ("img", 2, 2, BindingKind::StorageTexture),
            ("shadow", 2, 3, BindingKind::Sampler),
        ]
    );
}

#[test]
fn parser_keeps_type_text_without_whitespace() {
    let decls = parse_bindings("@group(1) @binding(0) var img: texture_storage_2d< rgba8unorm , write >;");
    assert_eq!(decls[0].ty, "texture_storage_2d<rgba8unorm,write>");
}

#[test]
fn parser_ignores_commented_declarations() {
    let source = "
// @group(1) @binding(0) var<uniform> hidden: f32;
/* @group(1) @binding(1) var<uniform> alsoHidden: f32; */
@group(1) @binding(2) var<uniform> visible: f32;
";
    let decls = parse_bindings(source);
    assert_eq!(decls.len(), 1);
    assert_eq!(decls[0].name, "visible");
}

#[test]
fn parser_skips_duplicate_slots_with_a_warning() {
    let scan = scan_bindings(
        "@group(1) @binding(0) var<uniform> a: f32;\n@group(1) @binding(0) var<uniform> b: f32;",
    );
    assert_eq!(scan.declarations.len(), 1);
    assert_eq!(scan.declarations[0].name, "a");
    assert_eq!(scan.warnings.len(), 1);
    assert!(scan.warnings[0].contains("line 2"));
}

#[test]
fn parser_rejects_private_and_workgroup_variables() {
    let scan = scan_bindings("var<private> counter: u32;\nvar<workgroup> tile: array<f32, 64>;");
    assert!(scan.declarations.is_empty());
    assert!(scan.warnings.is_empty(), "unbound variables are not resource declarations");
}

// ============================================================================
// Validation Tests
// ============================================================================

#[test]
fn missing_bindings_are_reported_together() {
    let decls = parse_bindings(ALL_KINDS);
    let problems = validate_bindings(&decls, &Uniforms::new()).expect("nothing supplied");

    // Samplers fall back to defaults, everything else is missing.
    let names: Vec<_> = problems.problems().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["params", "points", "out", "tex", "img"]);
    assert!(problems.problems().iter().all(|p| p.reason == ProblemReason::Missing));
}

#[test]
fn storage_problem_message_names_kind_group_and_index() {
    let decls = parse_bindings("@group(1) @binding(3) var<storage, read_write> particles: array<f32>;");
    let problems = validate_bindings(&decls, &Uniforms::new()).unwrap();
    let message = problems.to_string();

    assert!(message.contains("particles"), "{message}");
    assert!(message.contains("storage buffer"), "{message}");
    assert!(message.contains("group 1"), "{message}");
    assert!(message.contains("binding 3"), "{message}");
    assert!(message.contains("StorageBuffer"), "suggestion missing: {message}");
}

#[test]
fn wrong_value_type_is_distinguished_from_missing() {
    let decls = parse_bindings("@group(1) @binding(0) var<storage> data: array<f32>;");
    let uniforms = Uniforms::new().with("data", 1.0_f32);
    let problems = validate_bindings(&decls, &uniforms).unwrap();
    let problem = problems.find("data").unwrap();
    assert!(matches!(problem.reason, ProblemReason::WrongType { .. }));
}

#[test]
fn data_uniforms_satisfy_uniform_declarations() {
    let decls = parse_bindings(
        "@group(1) @binding(0) var<uniform> tint: vec4<f32>;\n@group(1) @binding(1) var<uniform> weights: array<vec4<f32>, 2>;",
    );
    let uniforms = Uniforms::new()
        .with("tint", [1.0_f32, 0.5, 0.25, 1.0])
        .with("weights", vec![0.0_f32; 8]);
    assert!(validate_bindings(&decls, &uniforms).is_none());
}

// ============================================================================
// Shader Preparation Tests
// ============================================================================

#[test]
fn entry_points_report_stage_and_workgroup_size() {
    let entries = find_entry_points(
        "@compute @workgroup_size(8, 4) fn step() {}\n@fragment fn shade() -> @location(0) vec4<f32> { return vec4<f32>(0.0); }",
    );
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].stage, EntryStage::Compute);
    assert_eq!(entries[0].workgroup_size, Some([8, 4, 1]));
    assert_eq!(entries[1].stage, EntryStage::Fragment);
    assert_eq!(entries[1].name, "shade");
}

#[test]
fn fragment_only_shader_gets_a_fullscreen_vertex_stage() {
    let shader = PreparedShader::draw("@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }")
        .unwrap();
    assert!(shader.is_fullscreen());
    assert!(!shader.uses_globals);
    assert!(!shader.binds_globals);
    let ShaderStages::Draw { fragment, .. } = &shader.stages else {
        panic!("expected draw stages");
    };
    assert_eq!(fragment, "main");
}

#[test]
fn globals_reference_injects_the_prelude() {
    let source = "@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(fract(globals.time)); }";
    assert!(uses_globals(source));
    let shader = PreparedShader::draw(source).unwrap();
    assert!(shader.uses_globals);
    assert!(shader.binds_globals);
    assert!(shader.source.contains("struct Globals"));
}

#[test]
fn draw_shader_without_fragment_stage_is_rejected() {
    let err = PreparedShader::draw("@compute @workgroup_size(1) fn main() {}").unwrap_err();
    assert!(matches!(err, ShadeError::MissingEntryPoint("fragment")));
}

#[test]
fn named_compute_entry_must_exist() {
    let err = PreparedShader::compute("@compute @workgroup_size(1) fn a() {}", Some("b")).unwrap_err();
    assert!(matches!(err, ShadeError::MissingEntryPoint("compute")));

    let shader = PreparedShader::compute(
        "@compute @workgroup_size(1) fn a() {}\n@compute @workgroup_size(16) fn b() {}",
        Some("b"),
    )
    .unwrap();
    assert_eq!(
        shader.stages,
        ShaderStages::Compute {
            entry: "b".to_owned(),
            workgroup_size: [16, 1, 1],
        }
    );
}

#[test]
fn compile_errors_carry_caller_line_numbers_even_with_prelude() {
    let source = "@fragment fn main() -> @location(0) vec4<f32> {\n    let t = globals.time;\n    return vec4<f32>(t, undefined_name, 0.0, 1.0);\n}";
    let err = PreparedShader::draw(source).unwrap_err();
    let ShadeError::ShaderCompile { line, source_code, .. } = err else {
        panic!("expected a compile error, got {err:?}");
    };
    assert_eq!(line, Some(3));
    assert_eq!(source_code, source);
}

#[test]
fn uniform_sizes_come_from_reflection() {
    let shader = PreparedShader::draw(
        "struct P { a: vec3<f32>, b: f32, c: vec2<f32> }\n@group(1) @binding(0) var<uniform> p: P;\n@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(p.a, p.b + p.c.x); }",
    )
    .unwrap();
    assert_eq!(shader.uniform_sizes.get(&(1, 0)), Some(&32));
}
