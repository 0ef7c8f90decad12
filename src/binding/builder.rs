//! Bind Group Builder
//!
//! Reconciles parsed declarations against a [`Uniforms`] map without
//! touching the GPU. The rules, in order:
//!
//! 1. A declaration is matched to the uniform with exactly its name.
//! 2. A sampler declaration named `<texture>Sampler` is satisfied by the
//!    sampler a texture-like value (such as a render target) carries, so
//!    one map entry can serve both declarations.
//! 3. An unmatched sampler falls back to a default sampler (a warning, not
//!    an error).
//! 4. Any other unmatched or mistyped declaration is a hard problem naming
//!    the binding and how to fix it.

use std::fmt;

use serde::Serialize;

use crate::binding::parser::{BindingDeclaration, BindingKind};
use crate::resources::{SamplerRef, StorageRef, TextureRef};
use crate::uniforms::{Uniform, Uniforms};

/// Suffix linking a sampler declaration to its texture declaration.
pub const SAMPLER_SUFFIX: &str = "Sampler";

/// Where a declaration's resource comes from.
#[derive(Debug, Clone)]
pub enum ResolvedSource {
    /// Plain data packed from this cell into a uniform buffer.
    Data(Uniform),
    Storage(StorageRef),
    Texture(TextureRef),
    Sampler(SamplerRef),
    /// No sampler was supplied; the context's default is used.
    DefaultSampler,
}

/// A declaration together with the resource that satisfies it.
#[derive(Debug, Clone)]
pub struct ResolvedBinding<'a> {
    pub declaration: &'a BindingDeclaration,
    pub source: ResolvedSource,
}

/// Why a declaration could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProblemReason {
    /// No uniform with the declaration's name.
    Missing,
    /// A uniform exists but holds the wrong kind of value.
    WrongType { found: &'static str },
}

/// One unsatisfied declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingProblem {
    pub name: String,
    pub kind: BindingKind,
    pub group: u32,
    pub binding: u32,
    pub reason: ProblemReason,
}

impl BindingProblem {
    fn new(decl: &BindingDeclaration, reason: ProblemReason) -> Self {
        Self {
            name: decl.name.clone(),
            kind: decl.kind,
            group: decl.group,
            binding: decl.binding,
            reason,
        }
    }

    /// A concrete fix for the problem.
    #[must_use]
    pub fn suggestion(&self) -> String {
        let name = &self.name;
        match self.kind {
            BindingKind::Uniform => {
                format!("insert a scalar, vector, matrix or array: `uniforms.insert(\"{name}\", value)`")
            }
            BindingKind::StorageReadOnly | BindingKind::StorageReadWrite => format!(
                "create a `StorageBuffer` and insert it: `uniforms.insert(\"{name}\", &buffer)`"
            ),
            BindingKind::SampledTexture | BindingKind::StorageTexture => format!(
                "insert a render target or texture: `uniforms.insert(\"{name}\", &target)`"
            ),
            BindingKind::Sampler => format!(
                "insert a sampler: `uniforms.insert(\"{name}\", ctx.create_sampler(&config))`"
            ),
        }
    }
}

impl fmt::Display for BindingProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "binding `{}` ({}, group {}, binding {}): ",
            self.name, self.kind, self.group, self.binding
        )?;
        match &self.reason {
            ProblemReason::Missing => write!(f, "no uniform named `{}` was supplied", self.name)?,
            ProblemReason::WrongType { found } => write!(f, "the supplied uniform holds a {found}")?,
        }
        write!(f, "; {}", self.suggestion())
    }
}

/// Every problem found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingProblems(pub Vec<BindingProblem>);

impl BindingProblems {
    #[must_use]
    pub fn problems(&self) -> &[BindingProblem] {
        &self.0
    }

    /// The problem for the binding called `name`, if any.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&BindingProblem> {
        self.0.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for BindingProblems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "Unresolved shader {single}"),
            problems => {
                write!(f, "{} unresolved shader bindings:", problems.len())?;
                for problem in problems {
                    write!(f, "\n  - {problem}")?;
                }
                Ok(())
            }
        }
    }
}

/// Checks `declarations` against `uniforms`; `None` means every declaration
/// is satisfied.
#[must_use]
pub fn validate_bindings(declarations: &[BindingDeclaration], uniforms: &Uniforms) -> Option<BindingProblems> {
    resolve_bindings(declarations, uniforms).err()
}

/// Resolves every declaration or reports all problems at once.
pub fn resolve_bindings<'a>(
    declarations: &'a [BindingDeclaration],
    uniforms: &Uniforms,
) -> Result<Vec<ResolvedBinding<'a>>, BindingProblems> {
    let mut resolved = Vec::with_capacity(declarations.len());
    let mut problems = Vec::new();

    for decl in declarations {
        match resolve_one(decl, declarations, uniforms) {
            Ok(source) => resolved.push(ResolvedBinding {
                declaration: decl,
                source,
            }),
            Err(reason) => problems.push(BindingProblem::new(decl, reason)),
        }
    }

    if problems.is_empty() {
        Ok(resolved)
    } else {
        Err(BindingProblems(problems))
    }
}

fn resolve_one(
    decl: &BindingDeclaration,
    declarations: &[BindingDeclaration],
    uniforms: &Uniforms,
) -> Result<ResolvedSource, ProblemReason> {
    let entry = uniforms.get(&decl.name);

    match decl.kind {
        BindingKind::Uniform => {
            let uniform = entry.ok_or(ProblemReason::Missing)?;
            let value = uniform.read();
            if value.is_buffer_data() {
                Ok(ResolvedSource::Data(uniform.clone()))
            } else {
                Err(ProblemReason::WrongType {
                    found: value.kind_name(),
                })
            }
        }
        BindingKind::StorageReadOnly | BindingKind::StorageReadWrite => {
            let value = entry.ok_or(ProblemReason::Missing)?.read();
            value.as_storage().map(ResolvedSource::Storage).ok_or(ProblemReason::WrongType {
                found: value.kind_name(),
            })
        }
        BindingKind::SampledTexture | BindingKind::StorageTexture => {
            let value = entry.ok_or(ProblemReason::Missing)?.read();
            value
                .as_texture()
                .map(|t| ResolvedSource::Texture(t.texture))
                .ok_or(ProblemReason::WrongType {
                    found: value.kind_name(),
                })
        }
        BindingKind::Sampler => {
            if let Some(uniform) = entry {
                let value = uniform.read();
                return value.as_sampler().map(ResolvedSource::Sampler).ok_or(ProblemReason::WrongType {
                    found: value.kind_name(),
                });
            }
            Ok(paired_sampler(decl, declarations, uniforms).map_or(ResolvedSource::DefaultSampler, ResolvedSource::Sampler))
        }
    }
}

/// Sampler carried by the texture that `<texture>Sampler` refers to.
fn paired_sampler(
    decl: &BindingDeclaration,
    declarations: &[BindingDeclaration],
    uniforms: &Uniforms,
) -> Option<SamplerRef> {
    let texture_name = decl.name.strip_suffix(SAMPLER_SUFFIX)?;
    declarations
        .iter()
        .find(|d| d.kind == BindingKind::SampledTexture && d.name == texture_name)?;
    uniforms.get(texture_name)?.read().as_texture()?.sampler
}
