//! Cross-tenant authorization for global objects.

use crate::acl::{Acl, apply_edit};
use crate::action::{Action, EditOp};
use crate::actor::{Actor, User};
use crate::bootstrap::{MASTER_ADMINS_ROLE, seed_master};
use crate::error::{Error, Result};
use crate::evaluator::Evaluator;
use crate::org::Shared;
use crate::policy::{RoleEdge, Subject};
use crate::store::PolicyScope;
use crate::taxonomy::{MASTER_OBJECTS, Target};
use crate::types::GroupName;
use std::sync::Arc;
use tracing::{debug, info};

/// The master scope: one evaluator governing `organizations`, `reindex`
/// and `users`.
///
/// Unlike tenant checks there is no admin bypass here; only rows count.
/// Clients can never hold master permissions.
#[derive(Debug)]
pub struct MasterScope {
    evaluator: Arc<Evaluator>,
}

fn master_target(object: &str) -> Result<Target> {
    if !MASTER_OBJECTS.contains(&object) {
        return Err(Error::InvalidId(format!("unknown master object {object}")));
    }
    Ok(Target::master(object))
}

fn admins_role() -> GroupName {
    GroupName::from_string(MASTER_ADMINS_ROLE.to_string())
}

impl MasterScope {
    /// Loads the master policy, writing the bootstrap skeleton on first use.
    pub(crate) async fn open(shared: &Shared) -> Result<Self> {
        let bootstrap_user = shared.config.bootstrap_user.clone();
        let evaluator = Evaluator::open(
            PolicyScope::Master,
            shared.adapter.clone(),
            shared.config.max_role_depth,
            move |model| {
                info!(%bootstrap_user, "bootstrapping master scope");
                seed_master(model, &bootstrap_user);
            },
        )
        .await?;
        Ok(Self {
            evaluator: Arc::new(evaluator),
        })
    }

    pub fn evaluator(&self) -> &Arc<Evaluator> {
        &self.evaluator
    }

    /// Checks `action` on a master object.
    pub fn check_perm(&self, actor: &Actor, object: &str, action: &str) -> Result<bool> {
        if actor.is_client() {
            return Err(Error::IneligibleSubject(actor.name().to_string()));
        }
        let target = master_target(object)?;
        let action: Action = action.parse()?;
        let allowed = self.evaluator.enforce(&actor.subject(), &target, action);
        debug!(%actor, object, %action, allowed, "master check");
        Ok(allowed)
    }

    /// Adds or removes `user`'s grant of `actions` on a master object.
    pub async fn edit_perm(
        &self,
        user: &User,
        object: &str,
        actions: &[&str],
        op: &str,
    ) -> Result<()> {
        let op: EditOp = op.parse()?;
        let target = master_target(object)?;
        let actions = Action::parse_all(actions)?;
        let subject = Subject::Actor(user.name().clone());
        let changed = self
            .evaluator
            .update(|model| Ok(apply_edit(model, &target, &subject, &actions, op)))
            .await?;
        info!(user = %user.name(), object, ?op, changed, "master grant edited");
        Ok(())
    }

    /// Makes `user` a master administrator.
    pub async fn add_admin(&self, user: &User) -> Result<()> {
        self.evaluator
            .add_role_edge(RoleEdge::new(user.name().clone(), admins_role()))
            .await?;
        info!(user = %user.name(), "master admin added");
        Ok(())
    }

    /// Revokes `user`'s master administrator membership.
    pub async fn remove_admin(&self, user: &User) -> Result<()> {
        self.evaluator
            .remove_role_edge(RoleEdge::new(user.name().clone(), admins_role()))
            .await?;
        info!(user = %user.name(), "master admin removed");
        Ok(())
    }

    /// Permission matrix of a master object.
    pub fn get_acl(&self, object: &str) -> Result<Acl> {
        let target = master_target(object)?;
        Ok(Acl::from_model(&self.evaluator.snapshot(), &target))
    }
}
