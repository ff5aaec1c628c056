use crate::taxonomy::{CONTAINERS_KIND, DEFAULT_ITEM, Item};
use crate::types::ContainerName;
use serde::{Deserialize, Serialize};

/// A tenant container: the bucket a resource type lives in.
///
/// As an [`Item`] a container addresses its own `$$default$$` grants, so
/// editing a container's ACL edits the defaults every check of that
/// container type falls back on.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Container {
    name: ContainerName,
}

impl Container {
    pub fn new(name: ContainerName) -> Self {
        Self { name }
    }

    pub fn container_name(&self) -> &ContainerName {
        &self.name
    }
}

impl Item for Container {
    fn name(&self) -> &str {
        DEFAULT_ITEM
    }

    fn container_kind(&self) -> &str {
        CONTAINERS_KIND
    }

    fn container_type(&self) -> &str {
        self.name.as_str()
    }
}
