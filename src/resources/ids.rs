//! Resource identity tracking
//!
//! Every physical GPU object the runtime creates gets a fresh [`ResourceId`].
//! Reallocating (resize, buffer growth) produces a new id while the logical
//! handle stays the same, so a bind group only needs rebuilding when the
//! ids it was built from differ from the ids its handles resolve to now.

use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

/// Unique identifier of one physical GPU allocation.
pub type ResourceId = u64;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a process-unique id for a freshly created GPU object.
#[inline]
#[must_use]
pub fn generate_resource_id() -> ResourceId {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Physical ids a bind group was built from, in binding order, plus the id
/// of its layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BindGroupFingerprint {
    pub resource_ids: SmallVec<[ResourceId; 8]>,
    pub layout_id: ResourceId,
}

impl BindGroupFingerprint {
    /// Whether a bind group built for `self` can serve `current`.
    #[must_use]
    pub fn matches(&self, current: &BindGroupFingerprint) -> bool {
        self == current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = generate_resource_id();
        let b = generate_resource_id();
        assert_ne!(a, b);
    }

    fn fingerprint(layout_id: ResourceId, ids: &[ResourceId]) -> BindGroupFingerprint {
        BindGroupFingerprint {
            resource_ids: SmallVec::from_slice(ids),
            layout_id,
        }
    }

    #[test]
    fn fingerprint_detects_reallocation() {
        let before = fingerprint(7, &[1, 2]);
        assert!(before.matches(&fingerprint(7, &[1, 2])));
        assert!(!before.matches(&fingerprint(7, &[1, 3])));
        assert!(!before.matches(&fingerprint(8, &[1, 2])));
    }
}
