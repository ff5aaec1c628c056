use crate::container::Container;
use crate::error::StoreError;
use crate::group::Group;
use crate::org::OrgRecord;
use crate::policy::PolicySnapshot;
use crate::store::{ContainerStore, GroupStore, OrgStore, PolicyAdapter, PolicyScope};
use crate::types::{ContainerName, GroupName, OrgName};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// In-memory record store for tests and demos.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    orgs: RwLock<HashMap<OrgName, OrgRecord>>,
    groups: RwLock<HashMap<OrgName, BTreeMap<GroupName, Group>>>,
    containers: RwLock<HashMap<OrgName, BTreeMap<ContainerName, Container>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrgStore for MemoryStore {
    async fn get_org(&self, org: &OrgName) -> std::result::Result<Option<OrgRecord>, StoreError> {
        Ok(self.inner.orgs.read().get(org).cloned())
    }

    async fn insert_org(&self, record: &OrgRecord) -> std::result::Result<bool, StoreError> {
        let mut guard = self.inner.orgs.write();
        if guard.contains_key(&record.name) {
            return Ok(false);
        }
        guard.insert(record.name.clone(), record.clone());
        Ok(true)
    }

    async fn delete_org(&self, org: &OrgName) -> std::result::Result<bool, StoreError> {
        Ok(self.inner.orgs.write().remove(org).is_some())
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn get_group(
        &self,
        org: &OrgName,
        name: &GroupName,
    ) -> std::result::Result<Option<Group>, StoreError> {
        let guard = self.inner.groups.read();
        Ok(guard.get(org).and_then(|groups| groups.get(name)).cloned())
    }

    async fn insert_group(
        &self,
        org: &OrgName,
        group: &Group,
    ) -> std::result::Result<bool, StoreError> {
        let mut guard = self.inner.groups.write();
        let groups = guard.entry(org.clone()).or_default();
        if groups.contains_key(group.name()) {
            return Ok(false);
        }
        groups.insert(group.name().clone(), group.clone());
        Ok(true)
    }

    async fn put_group(&self, org: &OrgName, group: &Group) -> std::result::Result<(), StoreError> {
        let mut guard = self.inner.groups.write();
        guard
            .entry(org.clone())
            .or_default()
            .insert(group.name().clone(), group.clone());
        Ok(())
    }

    async fn delete_group(
        &self,
        org: &OrgName,
        name: &GroupName,
    ) -> std::result::Result<bool, StoreError> {
        let mut guard = self.inner.groups.write();
        Ok(guard
            .get_mut(org)
            .and_then(|groups| groups.remove(name))
            .is_some())
    }

    async fn list_groups(&self, org: &OrgName) -> std::result::Result<Vec<Group>, StoreError> {
        let guard = self.inner.groups.read();
        Ok(guard
            .get(org)
            .map(|groups| groups.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ContainerStore for MemoryStore {
    async fn get_container(
        &self,
        org: &OrgName,
        name: &ContainerName,
    ) -> std::result::Result<Option<Container>, StoreError> {
        let guard = self.inner.containers.read();
        Ok(guard
            .get(org)
            .and_then(|containers| containers.get(name))
            .cloned())
    }

    async fn insert_container(
        &self,
        org: &OrgName,
        container: &Container,
    ) -> std::result::Result<bool, StoreError> {
        let mut guard = self.inner.containers.write();
        let containers = guard.entry(org.clone()).or_default();
        if containers.contains_key(container.container_name()) {
            return Ok(false);
        }
        containers.insert(container.container_name().clone(), container.clone());
        Ok(true)
    }

    async fn delete_container(
        &self,
        org: &OrgName,
        name: &ContainerName,
    ) -> std::result::Result<bool, StoreError> {
        let mut guard = self.inner.containers.write();
        Ok(guard
            .get_mut(org)
            .and_then(|containers| containers.remove(name))
            .is_some())
    }

    async fn list_containers(
        &self,
        org: &OrgName,
    ) -> std::result::Result<Vec<Container>, StoreError> {
        let guard = self.inner.containers.read();
        Ok(guard
            .get(org)
            .map(|containers| containers.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// In-memory policy adapter.
///
/// Clones share state, so a test can keep a handle and inspect what was
/// persisted.
#[derive(Debug, Default, Clone)]
pub struct MemoryAdapter {
    policies: Arc<RwLock<HashMap<PolicyScope, PolicySnapshot>>>,
}

impl MemoryAdapter {
    /// Creates an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored snapshot of `scope`.
    pub fn stored(&self, scope: &PolicyScope) -> Option<PolicySnapshot> {
        self.policies.read().get(scope).cloned()
    }
}

#[async_trait]
impl PolicyAdapter for MemoryAdapter {
    async fn load_policy(
        &self,
        scope: &PolicyScope,
    ) -> std::result::Result<Option<PolicySnapshot>, StoreError> {
        Ok(self.stored(scope))
    }

    async fn save_policy(
        &self,
        scope: &PolicyScope,
        snapshot: &PolicySnapshot,
    ) -> std::result::Result<(), StoreError> {
        self.policies.write().insert(scope.clone(), snapshot.clone());
        Ok(())
    }

    async fn delete_policy(&self, scope: &PolicyScope) -> std::result::Result<(), StoreError> {
        self.policies.write().remove(scope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn org() -> OrgName {
        OrgName::try_from("acme").unwrap()
    }

    #[test]
    fn insert_group_should_report_conflicts() {
        let store = MemoryStore::new();
        let group = Group::empty(GroupName::try_from("ops").unwrap());

        assert!(block_on(store.insert_group(&org(), &group)).unwrap());
        assert!(!block_on(store.insert_group(&org(), &group)).unwrap());
        assert_eq!(block_on(store.list_groups(&org())).unwrap(), vec![group.clone()]);
        assert!(block_on(store.delete_group(&org(), group.name())).unwrap());
        assert!(block_on(store.get_group(&org(), group.name())).unwrap().is_none());
    }

    #[test]
    fn adapter_clones_share_state() {
        let adapter = MemoryAdapter::new();
        let handle = adapter.clone();
        let scope = PolicyScope::Master;

        assert!(block_on(adapter.load_policy(&scope)).unwrap().is_none());
        block_on(adapter.save_policy(&scope, &PolicySnapshot::default())).unwrap();

        assert_eq!(handle.stored(&scope), Some(PolicySnapshot::default()));
        block_on(handle.delete_policy(&scope)).unwrap();
        assert!(adapter.stored(&scope).is_none());
    }
}
