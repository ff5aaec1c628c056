use crate::container::Container;
use crate::error::StoreError;
use crate::group::Group;
use crate::org::OrgRecord;
use crate::policy::{PolicyCodec, PolicySnapshot};
use crate::types::{ContainerName, GroupName, OrgName};
use async_trait::async_trait;
use std::fmt;

/// Policy scope persisted by a [`PolicyAdapter`].
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum PolicyScope {
    /// One tenant.
    Org(OrgName),
    /// The cross-tenant master scope.
    Master,
}

impl fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyScope::Org(org) => write!(f, "org:{org}"),
            PolicyScope::Master => f.write_str("master"),
        }
    }
}

/// Durable storage for evaluator state.
#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    /// Loads a scope's policy. `None` means nothing was ever saved.
    async fn load_policy(
        &self,
        scope: &PolicyScope,
    ) -> std::result::Result<Option<PolicySnapshot>, StoreError>;

    /// Replaces a scope's stored policy.
    async fn save_policy(
        &self,
        scope: &PolicyScope,
        snapshot: &PolicySnapshot,
    ) -> std::result::Result<(), StoreError>;

    /// Drops a scope's stored policy.
    async fn delete_policy(&self, scope: &PolicyScope) -> std::result::Result<(), StoreError>;

    /// Adopts the codec built from the configured role prefix.
    ///
    /// Called once by [`crate::AuthzBuilder::build`]. Adapters that do not
    /// store policy as text ignore it.
    fn use_codec(&mut self, _codec: PolicyCodec) {}
}

/// Store interface for organization records.
#[async_trait]
pub trait OrgStore {
    /// Returns an organization record.
    async fn get_org(&self, org: &OrgName) -> std::result::Result<Option<OrgRecord>, StoreError>;

    /// Inserts a new organization. Returns false if the name is taken.
    async fn insert_org(&self, record: &OrgRecord) -> std::result::Result<bool, StoreError>;

    /// Deletes an organization record. Returns false if it did not exist.
    async fn delete_org(&self, org: &OrgName) -> std::result::Result<bool, StoreError>;
}

/// Store interface for tenant groups.
#[async_trait]
pub trait GroupStore {
    /// Returns a group.
    async fn get_group(
        &self,
        org: &OrgName,
        name: &GroupName,
    ) -> std::result::Result<Option<Group>, StoreError>;

    /// Inserts a new group. Returns false if the name is taken.
    async fn insert_group(&self, org: &OrgName, group: &Group)
    -> std::result::Result<bool, StoreError>;

    /// Inserts or replaces a group.
    async fn put_group(&self, org: &OrgName, group: &Group) -> std::result::Result<(), StoreError>;

    /// Deletes a group. Returns false if it did not exist.
    async fn delete_group(
        &self,
        org: &OrgName,
        name: &GroupName,
    ) -> std::result::Result<bool, StoreError>;

    /// Lists every group of a tenant.
    async fn list_groups(&self, org: &OrgName) -> std::result::Result<Vec<Group>, StoreError>;
}

/// Store interface for tenant containers.
#[async_trait]
pub trait ContainerStore {
    /// Returns a container.
    async fn get_container(
        &self,
        org: &OrgName,
        name: &ContainerName,
    ) -> std::result::Result<Option<Container>, StoreError>;

    /// Inserts a new container. Returns false if the name is taken.
    async fn insert_container(
        &self,
        org: &OrgName,
        container: &Container,
    ) -> std::result::Result<bool, StoreError>;

    /// Deletes a container. Returns false if it did not exist.
    async fn delete_container(
        &self,
        org: &OrgName,
        name: &ContainerName,
    ) -> std::result::Result<bool, StoreError>;

    /// Lists every container of a tenant.
    async fn list_containers(
        &self,
        org: &OrgName,
    ) -> std::result::Result<Vec<Container>, StoreError>;
}

/// Composite store trait.
pub trait Store: OrgStore + GroupStore + ContainerStore + Send + Sync {}

impl<T> Store for T where T: OrgStore + GroupStore + ContainerStore + Send + Sync {}
