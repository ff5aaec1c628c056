use crate::actor::User;
use crate::bootstrap::ADMINS_GROUP;
use crate::config::AuthzConfig;
use crate::error::{Error, Result};
use crate::group::Group;
use crate::master::MasterScope;
use crate::org::{OrgRecord, Organization, Shared};
use crate::store::{PolicyAdapter, PolicyScope, Store};
use crate::types::{ActorName, OrgName};
use futures::lock::Mutex;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Tenant registry and master scope of one server.
///
/// Organizations are cached for the life of this value once loaded.
pub struct Authz {
    shared: Arc<Shared>,
    orgs: RwLock<HashMap<OrgName, Arc<Organization>>>,
    master: Mutex<Option<Arc<MasterScope>>>,
}

impl std::fmt::Debug for Authz {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authz")
            .field("config", &self.shared.config)
            .field("cached_orgs", &self.orgs.read().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Authz`].
pub struct AuthzBuilder {
    store: Arc<dyn Store>,
    adapter: Box<dyn PolicyAdapter>,
    config: AuthzConfig,
}

impl AuthzBuilder {
    /// Creates a new builder with default configuration.
    pub fn new<S, A>(store: S, adapter: A) -> Self
    where
        S: Store + 'static,
        A: PolicyAdapter + 'static,
    {
        Self {
            store: Arc::new(store),
            adapter: Box::new(adapter),
            config: AuthzConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: AuthzConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the role-token prefix written by text policy adapters.
    pub fn role_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.role_prefix = prefix.into();
        self
    }

    /// Sets the master-scope bootstrap identity.
    pub fn bootstrap_user(mut self, user: ActorName) -> Self {
        self.config.bootstrap_user = user;
        self
    }

    /// Sets maximum role traversal depth.
    pub fn max_role_depth(mut self, depth: usize) -> Self {
        self.config.max_role_depth = depth;
        self
    }

    /// Builds the service. The adapter adopts the configured codec.
    pub fn build(self) -> Authz {
        let mut adapter = self.adapter;
        adapter.use_codec(self.config.codec());
        Authz {
            shared: Arc::new(Shared {
                store: self.store,
                adapter: Arc::from(adapter),
                config: self.config,
            }),
            orgs: RwLock::new(HashMap::new()),
            master: Mutex::new(None),
        }
    }
}

impl Authz {
    pub fn config(&self) -> &AuthzConfig {
        &self.shared.config
    }

    /// Creates an organization with its default containers, groups and
    /// policy skeleton.
    ///
    /// When `owner` is given they are associated with the tenant and added
    /// to `admins`.
    pub async fn create_org(
        &self,
        name: &str,
        full_name: Option<&str>,
        owner: Option<&User>,
    ) -> Result<Arc<Organization>> {
        let name = OrgName::new(name)?;
        let record = OrgRecord {
            full_name: full_name.unwrap_or(name.as_str()).to_string(),
            name: name.clone(),
        };
        if !self
            .shared
            .store
            .insert_org(&record)
            .await
            .map_err(Error::from)?
        {
            return Err(Error::conflict("organization", name.as_str()));
        }

        let org = match Organization::bootstrap(record, self.shared.clone()).await {
            Ok(org) => Arc::new(org),
            Err(err) => {
                warn!(org = %name, error = %err, "bootstrap failed; removing organization");
                if let Err(cleanup) = self.remove_all(&name).await {
                    warn!(org = %name, error = %cleanup, "organization cleanup failed");
                }
                return Err(err);
            }
        };

        if let Some(owner) = owner {
            let joined = async {
                org.accept_association(owner).await?;
                let mut admins = Group::get(&org, ADMINS_GROUP).await?;
                admins.add_actor(&org, owner.name()).await
            }
            .await;
            if let Err(err) = joined {
                warn!(org = %name, owner = %owner.name(), error = %err, "owner setup failed; removing organization");
                org.retire().await;
                if let Err(cleanup) = self.remove_all(&name).await {
                    warn!(org = %name, error = %cleanup, "organization cleanup failed");
                }
                return Err(err);
            }
        }

        self.orgs.write().insert(name.clone(), org.clone());
        info!(org = %name, "organization created");
        Ok(org)
    }

    /// Returns an organization, loading it on first use.
    pub async fn get_org(&self, name: &str) -> Result<Arc<Organization>> {
        let name = OrgName::new(name)?;
        let cached = self.orgs.read().get(&name).cloned();
        if let Some(org) = cached {
            return Ok(org);
        }

        let record = self
            .shared
            .store
            .get_org(&name)
            .await
            .map_err(Error::from)?
            .ok_or_else(|| Error::not_found("organization", name.as_str()))?;
        let org = Arc::new(Organization::new(record, self.shared.clone()));
        Ok(self.orgs.write().entry(name).or_insert(org).clone())
    }

    /// Deletes an organization with all of its records and policy state.
    ///
    /// Handles to it that are still held elsewhere are retired first and
    /// fail with `NotFound` from then on.
    pub async fn delete_org(&self, name: &str) -> Result<()> {
        let name = OrgName::new(name)?;
        if self
            .shared
            .store
            .get_org(&name)
            .await
            .map_err(Error::from)?
            .is_none()
        {
            return Err(Error::not_found("organization", name.as_str()));
        }
        let cached = self.orgs.write().remove(&name);
        if let Some(org) = cached {
            org.retire().await;
        }
        self.remove_all(&name).await?;
        info!(org = %name, "organization deleted");
        Ok(())
    }

    /// The master scope, bootstrapped on first use.
    pub async fn master(&self) -> Result<Arc<MasterScope>> {
        let mut slot = self.master.lock().await;
        if let Some(master) = slot.as_ref() {
            return Ok(master.clone());
        }
        let master = Arc::new(MasterScope::open(&self.shared).await?);
        *slot = Some(master.clone());
        Ok(master)
    }

    async fn remove_all(&self, name: &OrgName) -> Result<()> {
        let store = &self.shared.store;
        for group in store.list_groups(name).await.map_err(Error::from)? {
            store
                .delete_group(name, group.name())
                .await
                .map_err(Error::from)?;
        }
        for container in store.list_containers(name).await.map_err(Error::from)? {
            store
                .delete_container(name, container.container_name())
                .await
                .map_err(Error::from)?;
        }
        self.shared
            .adapter
            .delete_policy(&PolicyScope::Org(name.clone()))
            .await
            .map_err(Error::from)?;
        store.delete_org(name).await.map_err(Error::from)?;
        Ok(())
    }
}
