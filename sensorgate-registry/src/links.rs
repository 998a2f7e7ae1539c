//! Provider links.
//!
//! A link is a one-sided relation: the child id is recorded on the parent's
//! admin record and nothing is written to the child. Targets are not
//! checked, so a link may name a provider that does not exist (yet).

use sensorgate_model::Provider;

/// Adds `child` to the parent's links. Returns false if already linked.
pub fn link(parent: &mut Provider, child: &str) -> bool {
    if parent.admin.is_linked_to(child) {
        return false;
    }
    parent.admin.linked_providers.push(child.to_string());
    true
}

/// Removes `child` from the parent's links. Returns false if not linked.
pub fn unlink(parent: &mut Provider, child: &str) -> bool {
    let before = parent.admin.linked_providers.len();
    parent.admin.linked_providers.retain(|id| id != child);
    parent.admin.linked_providers.len() != before
}
