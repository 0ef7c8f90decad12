//! Draw and compute units.
//!
//! A unit owns one shader program, its uniform map and the bind groups
//! derived from them. Both kinds share the binding plumbing in this module:
//! group 0 is the globals group (or an empty placeholder), groups 1.. are the
//! user groups managed by one [`GroupBinder`] each.

pub mod compute;
pub mod draw;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::binding::state::GroupBinder;
use crate::context::ContextInner;
use crate::errors::{Result, ShadeError};
use crate::pipeline::shader::PreparedShader;
use crate::resources::ids::ResourceId;
use crate::uniforms::Uniforms;

pub use compute::{ComputeOptions, ComputeUnit};
pub use draw::{BlendMode, DrawOptions, DrawUnit, IndexBufferDesc, LoadMode, VertexBufferDesc};

/// Lifecycle of a unit.
///
/// `Dirty` is entered when topology or blend changes and lasts until the next
/// draw resolves a pipeline for the new state. `Recording` is only observable
/// from inside a draw or dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Ready,
    Dirty,
    Recording,
    Disposed,
}

/// One bind group slot in pipeline order.
pub(crate) struct BoundGroup {
    pub layout: wgpu::BindGroupLayout,
    pub layout_id: ResourceId,
    pub bind_group: wgpu::BindGroup,
}

/// Group 0 plus every user group of a unit.
pub(crate) struct UnitBindings {
    binds_globals: bool,
    binders: Vec<GroupBinder>,
}

impl UnitBindings {
    pub fn new(inner: &ContextInner, shader: &PreparedShader, label: &str) -> Result<Self> {
        let max_groups = inner.device.limits().max_bind_groups;
        let stages = shader.stage_set();

        let mut binders = Vec::new();
        for (group, declarations) in shader.groups() {
            if group >= max_groups {
                let name = declarations.first().map(|d| d.name.clone()).unwrap_or_default();
                return Err(ShadeError::IncompatibleResource {
                    name,
                    reason: format!("group {group} exceeds the device limit of {max_groups} bind groups"),
                });
            }
            let min_sizes = declarations
                .iter()
                .filter_map(|d| shader.uniform_sizes.get(&(group, d.binding)).map(|s| (d.binding, *s)))
                .collect();
            binders.push(GroupBinder::new(group, declarations, stages, min_sizes, label));
        }

        Ok(Self {
            binds_globals: shader.binds_globals,
            binders,
        })
    }

    /// Brings every user group up to date. Returns how many were rebuilt.
    pub fn prepare(&mut self, inner: &ContextInner, uniforms: &Uniforms) -> Result<usize> {
        let mut rebuilt = 0;
        let mut problems = Vec::new();
        for binder in &mut self.binders {
            match binder.prepare(inner, uniforms) {
                Ok(true) => rebuilt += 1,
                Ok(false) => {}
                Err(ShadeError::Bindings(mut found)) => problems.append(&mut found.0),
                Err(e) => return Err(e),
            }
        }
        if problems.is_empty() {
            Ok(rebuilt)
        } else {
            Err(ShadeError::Bindings(crate::binding::BindingProblems(problems)))
        }
    }

    /// Dense group list, group 0 first, gaps filled with the empty group.
    /// Only valid after a successful [`prepare`](Self::prepare).
    pub fn bound_groups(&self, inner: &ContextInner) -> Result<SmallVec<[BoundGroup; 4]>> {
        let (layout, layout_id, bind_group) = inner.group_zero(self.binds_globals);
        let mut groups: SmallVec<[BoundGroup; 4]> = SmallVec::new();
        groups.push(BoundGroup {
            layout,
            layout_id,
            bind_group,
        });

        for binder in &self.binders {
            while (groups.len() as u32) < binder.group() {
                groups.push(BoundGroup {
                    layout: inner.empty_layout.clone(),
                    layout_id: inner.empty_layout_id,
                    bind_group: inner.empty_bind_group.clone(),
                });
            }
            let (Some(layout), Some(layout_id), Some(bind_group)) =
                (binder.layout(), binder.layout_id(), binder.bind_group())
            else {
                return Err(ShadeError::IncompatibleResource {
                    name: binder.declarations().first().map(|d| d.name.clone()).unwrap_or_default(),
                    reason: format!("group {} has not been prepared", binder.group()),
                });
            };
            groups.push(BoundGroup {
                layout: layout.clone(),
                layout_id,
                bind_group: bind_group.clone(),
            });
        }
        Ok(groups)
    }
}
