//! Container/kind taxonomy and the item contract.
//!
//! Every protected object is addressed by a [`Target`]: the coarse
//! container kind, the specific container type and the item name. Two
//! sentinel item names address container-level defaults and the tenant
//! root.

use crate::error::Result;
use crate::types::validate_token;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Item name carrying container-level default grants.
pub const DEFAULT_ITEM: &str = "$$default$$";

/// Item name and container type used for tenant-root checks.
pub const ROOT_ITEM: &str = "$$root$$";

/// Container kind shared by every tenant resource.
pub const CONTAINERS_KIND: &str = "containers";

/// Container kind used by the master scope.
pub const MASTER_KIND: &str = "master";

/// Container types every tenant bootstraps.
pub const DEFAULT_CONTAINERS: [&str; 9] = [
    "clients",
    "containers",
    "cookbooks",
    "data",
    "environments",
    "groups",
    "nodes",
    "roles",
    "sandboxes",
];

/// Objects governed by the master scope.
pub const MASTER_OBJECTS: [&str; 3] = ["organizations", "reindex", "users"];

/// Returns true if `name` is one of the bootstrapped container types.
pub fn is_default_container(name: &str) -> bool {
    DEFAULT_CONTAINERS.contains(&name)
}

/// A protected resource.
///
/// Resource modules implement this for their own types; the authorization
/// core only needs the three coordinates.
pub trait Item: Send + Sync {
    /// Item name within its container.
    fn name(&self) -> &str;

    /// Coarse bucket, almost always [`CONTAINERS_KIND`].
    fn container_kind(&self) -> &str;

    /// Specific resource type such as `roles` or `nodes`.
    fn container_type(&self) -> &str;
}

/// Plain item reference for callers without a richer resource type.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ItemRef {
    name: String,
    container_kind: String,
    container_type: String,
}

impl ItemRef {
    /// Creates a reference to an item in the `containers` kind.
    pub fn new(container_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container_kind: CONTAINERS_KIND.to_string(),
            container_type: container_type.into(),
        }
    }

    /// Overrides the container kind.
    pub fn with_kind(mut self, container_kind: impl Into<String>) -> Self {
        self.container_kind = container_kind.into();
        self
    }
}

impl Item for ItemRef {
    fn name(&self) -> &str {
        &self.name
    }

    fn container_kind(&self) -> &str {
        &self.container_kind
    }

    fn container_type(&self) -> &str {
        &self.container_type
    }
}

/// Canonical object coordinates used for policy matching.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Target {
    pub container_kind: String,
    pub container_type: String,
    pub name: String,
}

impl Target {
    /// Creates a target from its three coordinates.
    pub fn new(
        container_kind: impl Into<String>,
        container_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            container_kind: container_kind.into(),
            container_type: container_type.into(),
            name: name.into(),
        }
    }

    /// Target addressing `item`.
    pub fn of(item: &dyn Item) -> Self {
        Self::new(item.container_kind(), item.container_type(), item.name())
    }

    /// Container-level default target for `container_type`.
    pub fn container_default(container_type: impl Into<String>) -> Self {
        Self::new(CONTAINERS_KIND, container_type, DEFAULT_ITEM)
    }

    /// Tenant-root target.
    pub fn root() -> Self {
        Self::new(CONTAINERS_KIND, ROOT_ITEM, ROOT_ITEM)
    }

    /// Master-scope target for `object`.
    pub fn master(object: impl Into<String>) -> Self {
        Self::new(MASTER_KIND, object, DEFAULT_ITEM)
    }

    /// Same kind and type, different item name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self::new(&self.container_kind, &self.container_type, name)
    }
}

/// Checks that every coordinate of `target` can be written as a policy row.
///
/// Sentinel item names and the root container type are accepted as is.
pub fn validate_target(target: &Target) -> Result<()> {
    validate_token(&target.container_kind, "container kind")?;
    if target.container_type != ROOT_ITEM {
        validate_token(&target.container_type, "container type")?;
    }
    if target.name != DEFAULT_ITEM && target.name != ROOT_ITEM {
        validate_token(&target.name, "item name")?;
    }
    Ok(())
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.container_kind, self.container_type, self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_ref_defaults_to_containers_kind() {
        let item = ItemRef::new("roles", "webserver");
        assert_eq!(
            Target::of(&item),
            Target::new("containers", "roles", "webserver")
        );
    }

    #[test]
    fn sentinels_are_not_default_containers() {
        assert!(is_default_container("roles"));
        assert!(!is_default_container(ROOT_ITEM));
        assert!(!is_default_container(DEFAULT_ITEM));
    }

    #[test]
    fn writable_targets_allow_sentinels_only_in_their_slots() {
        assert!(validate_target(&Target::root()).is_ok());
        assert!(validate_target(&Target::container_default("nodes")).is_ok());
        assert!(validate_target(&Target::new("containers", "nodes", "web01.example.com")).is_ok());

        assert!(validate_target(&Target::new("containers", "nodes", "web01,evil")).is_err());
        assert!(validate_target(&Target::new("containers", "nodes", " web01")).is_err());
        assert!(validate_target(&Target::new("containers", "no des", "web01")).is_err());
        assert!(validate_target(&Target::new("containers", DEFAULT_ITEM, "web01")).is_err());
    }

    #[test]
    fn renamed_keeps_kind_and_type() {
        let target = Target::new("containers", "nodes", "old");
        assert_eq!(target.renamed("new"), Target::new("containers", "nodes", "new"));
    }
}
