//! Shader binding discovery, validation and bind group management.
//!
//! - [`parser`]: textual scan of WGSL resource declarations
//! - [`builder`]: pure reconciliation of declarations against a uniform map
//! - [`layout`]: layout entries derived from declarations and bound resources
//! - `state`: per-unit GPU bind groups rebuilt only when resource identity changes

pub mod builder;
pub mod layout;
pub mod parser;
pub(crate) mod state;

pub use builder::{
    BindingProblem, BindingProblems, ProblemReason, ResolvedBinding, ResolvedSource, resolve_bindings,
    validate_bindings,
};
pub use layout::{BoundResource, StageSet};
pub use parser::{
    BindingDeclaration, BindingKind, BindingScan, UnresolvedDeclaration, parse_bindings, scan_bindings,
};
