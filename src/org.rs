use crate::actor::{Client, User};
use crate::bootstrap::{CLIENTS_GROUP, USERS_GROUP, seed_container, seed_org};
use crate::config::AuthzConfig;
use crate::container::Container;
use crate::error::{Error, Result};
use crate::evaluator::{Evaluator, LazyEvaluator};
use crate::group::Group;
use crate::policy::{PolicyFilter, Subject};
use crate::store::{PolicyAdapter, PolicyScope, Store};
use crate::taxonomy::{CONTAINERS_KIND, DEFAULT_CONTAINERS, is_default_container};
use crate::types::{ActorName, ContainerName, GroupName, OrgName};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Persisted organization record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OrgRecord {
    pub name: OrgName,
    pub full_name: String,
}

/// Collaborators shared by every tenant of one [`crate::Authz`].
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) adapter: Arc<dyn PolicyAdapter>,
    pub(crate) config: AuthzConfig,
}

/// A tenant. Owns one evaluator, loaded on first use and then kept.
///
/// The permission checks and item-ACL operations live on the
/// [`crate::PermissionChecker`] implementation.
pub struct Organization {
    record: OrgRecord,
    shared: Arc<Shared>,
    evaluator: LazyEvaluator,
}

impl std::fmt::Debug for Organization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Organization")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Prefix reserved for per-user access groups.
pub const USAG_PREFIX: &str = "usag-";

/// Name of the per-user access group for `user`.
///
/// The reserved prefix followed by the hex BLAKE3 digest of the user name,
/// so every user name maps to a 69-character group name.
pub fn usag_name(user: &ActorName) -> GroupName {
    let digest = blake3::hash(user.as_str().as_bytes());
    GroupName::from_string(format!("{USAG_PREFIX}{}", hex::encode(digest.as_bytes())))
}

/// Returns true if `name` lies in the per-user access group namespace.
pub fn is_usag_name(name: &str) -> bool {
    name.starts_with(USAG_PREFIX)
}

impl Organization {
    pub(crate) fn new(record: OrgRecord, shared: Arc<Shared>) -> Self {
        Self {
            record,
            shared,
            evaluator: LazyEvaluator::new(),
        }
    }

    /// Opens a fresh tenant: seeds and persists the default skeleton,
    /// then writes the default containers and groups.
    pub(crate) async fn bootstrap(record: OrgRecord, shared: Arc<Shared>) -> Result<Self> {
        let scope = PolicyScope::Org(record.name.clone());
        shared
            .adapter
            .delete_policy(&scope)
            .await
            .map_err(Error::from)?;
        let evaluator = Evaluator::open(
            scope,
            shared.adapter.clone(),
            shared.config.max_role_depth,
            seed_org,
        )
        .await?;

        let org = Self {
            record,
            shared,
            evaluator: LazyEvaluator::with(Arc::new(evaluator)),
        };
        for name in DEFAULT_CONTAINERS {
            let container = Container::new(ContainerName::from_string(name.to_string()));
            org.store()
                .insert_container(org.name(), &container)
                .await
                .map_err(Error::from)?;
        }
        for name in crate::bootstrap::DEFAULT_GROUPS {
            let group = Group::empty(GroupName::from_string(name.to_string()));
            org.store()
                .insert_group(org.name(), &group)
                .await
                .map_err(Error::from)?;
        }
        info!(org = %org.name(), "organization bootstrapped");
        Ok(org)
    }

    pub fn name(&self) -> &OrgName {
        &self.record.name
    }

    pub fn record(&self) -> &OrgRecord {
        &self.record
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.shared.store.as_ref()
    }

    /// The tenant's evaluator, loading it on first use.
    ///
    /// A tenant whose stored policy has gone missing is reseeded with the
    /// default skeleton.
    pub async fn evaluator(&self) -> Result<Arc<Evaluator>> {
        if self.is_retired() {
            return Err(Error::not_found("organization", self.name().as_str()));
        }
        self.evaluator
            .get_or_try_init(|| {
                let org = self.record.name.clone();
                Evaluator::open(
                    PolicyScope::Org(org.clone()),
                    self.shared.adapter.clone(),
                    self.shared.config.max_role_depth,
                    move |model| {
                        warn!(%org, "no stored policy for organization; reseeding defaults");
                        seed_org(model);
                    },
                )
            })
            .await
    }

    /// Stops this handle from reading or writing policy. Used when the
    /// organization is deleted while other handles may still be held.
    pub(crate) async fn retire(&self) {
        self.evaluator.close().await;
    }

    pub fn is_retired(&self) -> bool {
        self.evaluator.is_closed()
    }

    /// Creates a container with admin-only default grants.
    pub async fn create_container(&self, name: &str) -> Result<Container> {
        let name = ContainerName::new(name)?;
        let container = Container::new(name.clone());
        if !self
            .store()
            .insert_container(self.name(), &container)
            .await
            .map_err(Error::from)?
        {
            return Err(Error::conflict("container", name.as_str()));
        }

        let evaluator = self.evaluator().await?;
        let seeded = evaluator
            .update(|model| {
                seed_container(model, name.as_str());
                Ok(())
            })
            .await;
        if let Err(err) = seeded {
            if let Err(cleanup) = self.store().delete_container(self.name(), &name).await {
                warn!(org = %self.name(), container = %name, error = %cleanup, "container cleanup failed");
            }
            return Err(err);
        }
        info!(org = %self.name(), container = %name, "container created");
        Ok(container)
    }

    pub async fn get_container(&self, name: &str) -> Result<Container> {
        let name = ContainerName::new(name)?;
        self.store()
            .get_container(self.name(), &name)
            .await
            .map_err(Error::from)?
            .ok_or_else(|| Error::not_found("container", name.as_str()))
    }

    pub async fn list_containers(&self) -> Result<Vec<Container>> {
        self.store()
            .list_containers(self.name())
            .await
            .map_err(Error::from)
    }

    /// Deletes a container and every policy row of its container type.
    pub async fn delete_container(&self, name: &str) -> Result<()> {
        let container = self.get_container(name).await?;
        let name = container.container_name().clone();
        if is_default_container(name.as_str()) {
            return Err(Error::Protected(format!(
                "container {name} is built in and cannot be deleted"
            )));
        }

        let evaluator = self.evaluator().await?;
        let removed = evaluator
            .remove_policies(PolicyFilter::any().container(CONTAINERS_KIND, name.as_str()))
            .await?;
        self.store()
            .delete_container(self.name(), &name)
            .await
            .map_err(Error::from)?;
        info!(org = %self.name(), container = %name, removed, "container deleted");
        Ok(())
    }

    /// Associates `user` with the tenant by creating their access group and
    /// nesting it in `users`.
    pub async fn accept_association(&self, user: &User) -> Result<Group> {
        let mut usag = Group::insert(self, usag_name(user.name())).await?;
        let joined = async {
            usag.add_actor(self, user.name()).await?;
            let mut users = Group::get(self, USERS_GROUP).await?;
            users.add_group(self, &usag).await
        }
        .await;

        if let Err(err) = joined {
            warn!(org = %self.name(), user = %user.name(), error = %err, "association failed; removing access group");
            if let Err(cleanup) = usag.clone().delete(self).await {
                warn!(org = %self.name(), group = %usag.name(), error = %cleanup, "access group cleanup failed");
            }
            return Err(err);
        }
        info!(org = %self.name(), user = %user.name(), group = %usag.name(), "association accepted");
        Ok(usag)
    }

    /// Removes `user` from the tenant: deletes their access group, drops
    /// them from every group and removes every row naming them.
    pub async fn remove_association(&self, user: &User) -> Result<()> {
        let usag = Group::get(self, usag_name(user.name()).as_str()).await?;
        usag.delete(self).await?;
        self.purge_actor(user.name()).await?;
        info!(org = %self.name(), user = %user.name(), "association removed");
        Ok(())
    }

    /// Adds `client` to the `clients` group.
    pub async fn add_client(&self, client: &Client) -> Result<()> {
        let mut clients = Group::get(self, CLIENTS_GROUP).await?;
        clients.add_actor(self, client.name()).await
    }

    /// Removes `client` from every group and drops every row naming it.
    pub async fn remove_client(&self, client: &Client) -> Result<()> {
        self.purge_actor(client.name()).await
    }

    async fn purge_actor(&self, actor: &ActorName) -> Result<()> {
        let groups = self
            .store()
            .list_groups(self.name())
            .await
            .map_err(Error::from)?;
        for mut group in groups.into_iter().filter(|g| g.has_actor(actor)) {
            group.del_actor(self, actor).await?;
        }
        let evaluator = self.evaluator().await?;
        evaluator
            .remove_policies(PolicyFilter::any().subject(Subject::Actor(actor.clone())))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usag_name_is_prefixed_digest_of_user_name() {
        let bob = ActorName::try_from("bob").unwrap();
        let name = usag_name(&bob);

        assert_eq!(name, usag_name(&bob));
        assert!(is_usag_name(name.as_str()));
        assert_eq!(name.as_str().len(), USAG_PREFIX.len() + 64);
        assert_ne!(name, usag_name(&ActorName::try_from("bob2").unwrap()));
        assert!(GroupName::new(name.as_str()).is_ok());
    }

    #[test]
    fn usag_name_fits_for_the_longest_user_names() {
        let long = ActorName::try_from("u".repeat(128).as_str()).unwrap();
        assert!(GroupName::new(usag_name(&long).as_str()).is_ok());
    }
}
