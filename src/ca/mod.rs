//! The certificate authority model.

pub mod authority;
pub mod certificates;
pub mod commands;
pub mod keys;
pub mod services;
pub mod tree;

use rpki::repository::resources::ResourceSet;

/// Returns whether two resource sets hold exactly the same resources.
pub fn equivalent_resources(left: &ResourceSet, right: &ResourceSet) -> bool {
    left.contains(right) && right.contains(left)
}

/// Returns the resources in `set` that are not in `held`.
pub fn excess_resources(set: &ResourceSet, held: &ResourceSet) -> ResourceSet {
    ResourceSet::new(
        set.asn().difference(held.asn()),
        set.ipv4().difference(held.ipv4()).into(),
        set.ipv6().difference(held.ipv6()).into(),
    )
}


//============ Tests =========================================================
