//! Shader Preparation
//!
//! Turns caller WGSL into the final module source:
//!
//! 1. Entry points are discovered textually (`@vertex`, `@fragment`,
//!    `@compute` before `fn`).
//! 2. A draw shader without a vertex stage is a fullscreen pass; a
//!    fullscreen-triangle vertex stage is appended.
//! 3. Shaders that read `globals.<field>` without declaring group 0 get the
//!    [`GLOBALS_WGSL`] prelude.
//! 4. The result is validated with `naga`, so compile failures surface as
//!    [`ShadeError::ShaderCompile`] with lines in the caller's numbering.
//!
//! Modules are cached by the xxh3-128 of the final source in
//! [`ShaderManager`].

use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_128;

use crate::binding::layout::StageSet;
use crate::binding::parser::{
    BindingDeclaration, BindingScan, attributes_before, find_keyword, is_ident_byte, scan_bindings, strip_comments,
};
use crate::errors::{Result, ShadeError};
use crate::globals::{GLOBALS_WGSL, GlobalsUniforms, uses_globals};

/// Vertex stage appended to fragment-only shaders. Draws one oversized
/// triangle; `uv` is available at `@location(0)`.
pub const FULLSCREEN_VERTEX_WGSL: &str = "
struct ShadeFullscreenOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn shade_fullscreen_vs(@builtin(vertex_index) index: u32) -> ShadeFullscreenOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: ShadeFullscreenOutput;
    out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}
";

/// Entry point name of [`FULLSCREEN_VERTEX_WGSL`].
pub const FULLSCREEN_VERTEX_ENTRY: &str = "shade_fullscreen_vs";

/// Vertices drawn for a fullscreen pass.
pub const FULLSCREEN_VERTEX_COUNT: u32 = 3;

// ─── Entry Points ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStage {
    Vertex,
    Fragment,
    Compute,
}

/// One `@vertex` / `@fragment` / `@compute` function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub stage: EntryStage,
    pub name: String,
    /// Literal `@workgroup_size`, padded with 1s. `None` when it uses
    /// override expressions.
    pub workgroup_size: Option<[u32; 3]>,
}

/// Lists the entry points of `source` in declaration order.
#[must_use]
pub fn find_entry_points(source: &str) -> Vec<EntryPoint> {
    let text = strip_comments(source);
    let mut entries = Vec::new();

    let mut search = 0;
    while let Some(offset) = find_keyword(&text, "fn", search) {
        search = offset + 2;

        let attributes = attributes_before(&text, offset);
        let stage = attributes.iter().find_map(|a| match a.name.as_str() {
            "vertex" => Some(EntryStage::Vertex),
            "fragment" => Some(EntryStage::Fragment),
            "compute" => Some(EntryStage::Compute),
            _ => None,
        });
        let Some(stage) = stage else {
            continue;
        };

        let rest = text[search..].trim_start();
        let len = rest.bytes().take_while(|b| is_ident_byte(*b)).count();
        if len == 0 {
            continue;
        }

        let workgroup_size = attributes
            .iter()
            .find(|a| a.name == "workgroup_size")
            .and_then(|a| a.arg.as_deref())
            .and_then(parse_workgroup_size);

        entries.push(EntryPoint {
            stage,
            name: rest[..len].to_owned(),
            workgroup_size,
        });
    }

    entries
}

fn parse_workgroup_size(arg: &str) -> Option<[u32; 3]> {
    let mut size = [1u32; 3];
    let mut count = 0;
    for (slot, part) in size.iter_mut().zip(arg.split(',')) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let digits = part
            .strip_suffix('u')
            .or_else(|| part.strip_suffix('i'))
            .unwrap_or(part);
        *slot = digits.parse().ok()?;
        count += 1;
    }
    (count > 0).then_some(size)
}

// ─── Prepared Shader ─────────────────────────────────────────────────────────

/// Which stages a prepared shader runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderStages {
    Draw {
        vertex: String,
        fragment: String,
        /// The vertex stage was synthesized.
        fullscreen: bool,
    },
    Compute {
        entry: String,
        workgroup_size: [u32; 3],
    },
}

/// Final WGSL plus everything derived from it at construction.
#[derive(Debug, Clone)]
pub struct PreparedShader {
    /// Source handed to the device.
    pub source: String,
    /// xxh3-128 of [`source`](Self::source).
    pub hash: u128,
    pub stages: ShaderStages,
    /// The caller's source reads `globals.<field>`.
    pub uses_globals: bool,
    /// Group 0 is part of the pipeline layout as the globals group.
    pub binds_globals: bool,
    /// User declarations (groups >= 1) in source order.
    pub declarations: Vec<BindingDeclaration>,
    /// Reflected byte size of each uniform-buffer binding, by (group, binding).
    pub uniform_sizes: FxHashMap<(u32, u32), u64>,
}

impl PreparedShader {
    /// Prepares a draw shader.
    pub fn draw(source: &str) -> Result<Self> {
        let entries = find_entry_points(source);
        let fragment = entries
            .iter()
            .find(|e| e.stage == EntryStage::Fragment)
            .ok_or(ShadeError::MissingEntryPoint("fragment"))?
            .name
            .clone();
        let vertex = entries.iter().find(|e| e.stage == EntryStage::Vertex);

        let (stages, epilogue) = match vertex {
            Some(v) => (
                ShaderStages::Draw {
                    vertex: v.name.clone(),
                    fragment,
                    fullscreen: false,
                },
                "",
            ),
            None => (
                ShaderStages::Draw {
                    vertex: FULLSCREEN_VERTEX_ENTRY.to_owned(),
                    fragment,
                    fullscreen: true,
                },
                FULLSCREEN_VERTEX_WGSL,
            ),
        };
        Self::assemble(source, stages, epilogue)
    }

    /// Prepares a compute shader. `entry` picks one of several `@compute`
    /// functions; the first is used otherwise.
    pub fn compute(source: &str, entry: Option<&str>) -> Result<Self> {
        let entries = find_entry_points(source);
        let chosen = entries
            .iter()
            .filter(|e| e.stage == EntryStage::Compute)
            .find(|e| entry.is_none_or(|name| e.name == name))
            .ok_or(ShadeError::MissingEntryPoint("compute"))?;

        let workgroup_size = chosen.workgroup_size.unwrap_or_else(|| {
            log::warn!(
                "compute entry `{}` has a non-literal @workgroup_size; size-based dispatch assumes 1x1x1",
                chosen.name
            );
            [1, 1, 1]
        });
        let stages = ShaderStages::Compute {
            entry: chosen.name.clone(),
            workgroup_size,
        };
        Self::assemble(source, stages, "")
    }

    fn assemble(source: &str, stages: ShaderStages, epilogue: &str) -> Result<Self> {
        let mut scan = scan_bindings(source);
        let uses_globals = uses_globals(source);

        let prelude = if uses_globals && !scan.declares_group_zero {
            GLOBALS_WGSL
        } else {
            ""
        };
        let final_source = format!("{prelude}{source}\n{epilogue}");
        let prelude_lines = prelude.lines().count() as u32;
        let source_lines = source.lines().count().max(1) as u32;

        let module = validate(&final_source, source, prelude_lines, source_lines)?;
        let uniform_sizes = reflect_bindings(&module, &mut scan)?;
        let binds_globals = uses_globals || scan.declares_group_zero;

        Ok(Self {
            hash: xxh3_128(final_source.as_bytes()),
            source: final_source,
            stages,
            uses_globals,
            binds_globals,
            declarations: scan.declarations,
            uniform_sizes,
        })
    }

    #[must_use]
    pub fn is_fullscreen(&self) -> bool {
        matches!(self.stages, ShaderStages::Draw { fullscreen: true, .. })
    }

    #[must_use]
    pub fn stage_set(&self) -> StageSet {
        match self.stages {
            ShaderStages::Draw { .. } => StageSet::Draw,
            ShaderStages::Compute { .. } => StageSet::Compute,
        }
    }

    /// User groups in ascending order, each with its declarations.
    #[must_use]
    pub fn groups(&self) -> Vec<(u32, Vec<BindingDeclaration>)> {
        let mut groups: Vec<(u32, Vec<BindingDeclaration>)> = Vec::new();
        for decl in &self.declarations {
            match groups.iter_mut().find(|(g, _)| *g == decl.group) {
                Some((_, decls)) => decls.push(decl.clone()),
                None => groups.push((decl.group, vec![decl.clone()])),
            }
        }
        groups.sort_by_key(|(g, _)| *g);
        groups
    }
}

/// Parses and validates `final_source`, mapping error positions back onto
/// the caller's `original`.
fn validate(final_source: &str, original: &str, prelude_lines: u32, source_lines: u32) -> Result<naga::Module> {
    let map_line = |line: u32| {
        (line > prelude_lines && line <= prelude_lines + source_lines).then(|| line - prelude_lines)
    };

    let module = naga::front::wgsl::parse_str(final_source).map_err(|err| {
        let location = err.location(final_source);
        ShadeError::ShaderCompile {
            message: err.message().to_owned(),
            line: location.and_then(|l| map_line(l.line_number)),
            column: location.map(|l| l.line_position),
            source_code: original.to_owned(),
        }
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator.validate(&module).map_err(|err| {
        let location = err.location(final_source);
        ShadeError::ShaderCompile {
            message: err.emit_to_string(final_source),
            line: location.and_then(|l| map_line(l.line_number)),
            column: location.map(|l| l.line_position),
            source_code: original.to_owned(),
        }
    })?;

    Ok(module)
}

/// Cross-checks naga's view of the resource bindings against the textual
/// scan and collects uniform buffer sizes.
///
/// Declarations the scan could only recognise by name get their indices
/// from the module here; a bound global the scan never recognised at all
/// cannot be given a layout entry and is rejected.
fn reflect_bindings(module: &naga::Module, scan: &mut BindingScan) -> Result<FxHashMap<(u32, u32), u64>> {
    let mut sizes = FxHashMap::default();

    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        let name = var.name.clone().unwrap_or_default();
        let size = u64::from(module.types[var.ty].inner.size(module.to_ctx()));

        if binding.group == 0 {
            let is_globals = binding.binding == 0
                && var.space == naga::AddressSpace::Uniform
                && size <= std::mem::size_of::<GlobalsUniforms>() as u64;
            if !is_globals {
                return Err(ShadeError::IncompatibleResource {
                    name,
                    reason: "group 0 is reserved for the runtime globals (`@group(0) @binding(0) var<uniform> globals: Globals`)"
                        .to_owned(),
                });
            }
            scan.declares_group_zero = true;
            continue;
        }

        let known = scan
            .declarations
            .iter()
            .any(|d| d.group == binding.group && d.binding == binding.binding);
        if !known {
            let Some(index) = scan.unresolved.iter().position(|u| u.name == name) else {
                return Err(ShadeError::IncompatibleResource {
                    name,
                    reason: format!(
                        "group {}, binding {} could not be recognised as a bindable resource",
                        binding.group, binding.binding
                    ),
                });
            };
            let pending = scan.unresolved.swap_remove(index);
            log::debug!(
                "line {}: `{name}` resolved to group {}, binding {}",
                pending.line,
                binding.group,
                binding.binding
            );
            scan.declarations.push(pending.resolve(binding.group, binding.binding));
        }

        if var.space == naga::AddressSpace::Uniform {
            sizes.insert((binding.group, binding.binding), size);
        }
    }

    Ok(sizes)
}

// ─── ShaderManager ────────────────────────────────────────────────────────────

/// Shader module cache keyed by the xxh3-128 of the final WGSL.
pub(crate) struct ShaderManager {
    module_cache: FxHashMap<u128, wgpu::ShaderModule>,
    debug: bool,
}

impl ShaderManager {
    #[must_use]
    pub fn new(debug: bool) -> Self {
        Self {
            module_cache: FxHashMap::default(),
            debug,
        }
    }

    /// Returns the cached module for `shader`, creating it on first use.
    pub fn get_or_compile(&mut self, device: &wgpu::Device, shader: &PreparedShader, label: &str) -> wgpu::ShaderModule {
        let debug = self.debug;
        self.module_cache
            .entry(shader.hash)
            .or_insert_with(|| {
                if debug {
                    log::info!("================= Shader Module {label} =================\n{}", shader.source);
                }
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(shader.source.as_str().into()),
                })
            })
            .clone()
    }

    #[must_use]
    pub fn module_count(&self) -> usize {
        self.module_cache.len()
    }

    pub fn clear(&mut self) {
        self.module_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: &str = "@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(1.0, 0.0, 0.0, 1.0); }";

    #[test]
    fn fragment_only_shader_becomes_fullscreen_pass() {
        let shader = PreparedShader::draw(RED).unwrap();
        assert!(shader.is_fullscreen());
        assert!(!shader.uses_globals);
        assert!(!shader.binds_globals);
        assert!(shader.source.contains(FULLSCREEN_VERTEX_ENTRY));
    }

    #[test]
    fn globals_prelude_is_injected_once() {
        let source = "@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(globals.time, 0.0, 0.0, 1.0); }";
        let shader = PreparedShader::draw(source).unwrap();
        assert!(shader.uses_globals);
        assert!(shader.source.starts_with("struct Globals"));
        assert_eq!(shader.source.matches("struct Globals").count(), 1);
    }

    #[test]
    fn compile_errors_use_caller_line_numbers() {
        let source = "// header\n@fragment fn main() -> @location(0) vec4<f32> {\n  let t = globals.time +;\n  return vec4<f32>(t);\n}";
        let err = PreparedShader::draw(source).unwrap_err();
        let ShadeError::ShaderCompile { line, .. } = err else {
            panic!("expected a compile error, got {err:?}");
        };
        assert_eq!(line, Some(3));
    }

    #[test]
    fn missing_fragment_stage_is_reported() {
        let err = PreparedShader::draw("@vertex fn vs() -> @builtin(position) vec4<f32> { return vec4<f32>(); }")
            .unwrap_err();
        assert!(matches!(err, ShadeError::MissingEntryPoint("fragment")));
    }

    #[test]
    fn compute_entry_and_workgroup_size_are_found() {
        let source = "@group(1) @binding(0) var<storage, read_write> data: array<f32>;
@compute @workgroup_size(8, 4)
fn step(@builtin(global_invocation_id) id: vec3<u32>) { data[id.x] = 1.0; }";
        let shader = PreparedShader::compute(source, None).unwrap();
        assert_eq!(
            shader.stages,
            ShaderStages::Compute {
                entry: "step".into(),
                workgroup_size: [8, 4, 1],
            }
        );
        assert_eq!(shader.declarations.len(), 1);
    }

    #[test]
    fn uniform_sizes_come_from_reflection() {
        let source = "struct Params { color: vec3<f32>, gain: f32, offset: vec2<f32> }
@group(1) @binding(0) var<uniform> params: Params;
@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(params.color * params.gain, 1.0); }";
        let shader = PreparedShader::draw(source).unwrap();
        assert_eq!(shader.uniform_sizes.get(&(1, 0)), Some(&32));
    }

    #[test]
    fn hex_indices_get_a_layout_entry() {
        let source = "@group(0x1) @binding(0) var<uniform> tint: vec4f;
@fragment fn main() -> @location(0) vec4<f32> { return tint; }";
        let shader = PreparedShader::draw(source).unwrap();
        assert_eq!(shader.declarations.len(), 1);
        assert_eq!((shader.declarations[0].group, shader.declarations[0].binding), (1, 0));
        assert_eq!(shader.uniform_sizes.get(&(1, 0)), Some(&16));
    }

    #[test]
    fn unreadable_indices_are_taken_from_the_module() {
        let mut scan = scan_bindings("@group(1 + 1) @binding(0) var<uniform> tint: vec4f;");
        assert_eq!(scan.unresolved.len(), 1);
        let module = naga::front::wgsl::parse_str("@group(2) @binding(0) var<uniform> tint: vec4f;").unwrap();

        let sizes = reflect_bindings(&module, &mut scan).unwrap();
        assert!(scan.unresolved.is_empty());
        assert_eq!((scan.declarations[0].group, scan.declarations[0].binding), (2, 0));
        assert_eq!(scan.declarations[0].name, "tint");
        assert_eq!(sizes.get(&(2, 0)), Some(&16));
    }

    #[test]
    fn group_zero_misuse_is_rejected() {
        let source = "@group(0) @binding(3) var tex: texture_2d<f32>;
@fragment fn main() -> @location(0) vec4<f32> { return textureLoad(tex, vec2<i32>(0), 0); }";
        assert!(matches!(
            PreparedShader::draw(source),
            Err(ShadeError::IncompatibleResource { .. })
        ));
    }
}
