//! Permission checks and item-ACL maintenance for one tenant.

use crate::acl::{AceSet, Acl, Member, apply_edit, converge, parse_payload};
use crate::action::{Action, EditOp};
use crate::actor::Actor;
use crate::error::{Error, Result};
use crate::group::Group;
use crate::org::Organization;
use crate::policy::PolicyFilter;
use crate::taxonomy::{DEFAULT_ITEM, Item, Target, validate_target};
use crate::types::validate_item_name;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Capability set every resource module depends on.
///
/// A denied check is `Ok(false)`; errors are reserved for malformed input
/// and collaborator failures. Resource modules must call
/// [`create_item_acl`](Self::create_item_acl) when they create an item,
/// [`delete_item_acl`](Self::delete_item_acl) when they delete one and
/// [`rename_item_acl`](Self::rename_item_acl) when they rename one.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Checks `action` on one item.
    async fn check_item_perm(&self, item: &dyn Item, actor: &Actor, action: &str)
    -> Result<bool>;

    /// Checks `action` on the `$$default$$` item of `container_type`.
    async fn check_container_perm(
        &self,
        actor: &Actor,
        container_type: &str,
        action: &str,
    ) -> Result<bool>;

    /// Checks `action` on the tenant root.
    async fn root_check_perm(&self, actor: &Actor, action: &str) -> Result<bool>;

    /// Permission matrix of one item.
    async fn get_item_acl(&self, item: &dyn Item) -> Result<Acl>;

    /// Adds or removes `member`'s grant of each of `actions`.
    ///
    /// `op` must be `add` or `remove`. Every action is validated before
    /// anything is written.
    async fn edit_item_perm(
        &self,
        item: &dyn Item,
        member: &Member,
        actions: &[&str],
        op: &str,
    ) -> Result<()>;

    /// Replaces the grant set of one action with `payload`.
    async fn edit_from_json(&self, item: &dyn Item, action: &str, payload: &AceSet)
    -> Result<()>;

    /// Seeds a new item's ACL from its container defaults.
    ///
    /// A non-admin `creator` is also granted every action on the item.
    async fn create_item_acl(&self, item: &dyn Item, creator: Option<&Actor>) -> Result<()>;

    /// Removes every row scoped to the item.
    async fn delete_item_acl(&self, item: &dyn Item) -> Result<()>;

    /// Moves every row scoped to the item to `new_name`.
    async fn rename_item_acl(&self, item: &dyn Item, new_name: &str) -> Result<()>;
}

impl Organization {
    async fn check(&self, actor: &Actor, target: Target, action: &str) -> Result<bool> {
        if actor.is_admin() {
            debug!(org = %self.name(), %actor, %target, action, "admin bypass");
            return Ok(true);
        }
        let action: Action = action.parse()?;
        let evaluator = self.evaluator().await?;
        let allowed = evaluator.enforce(&actor.subject(), &target, action);
        debug!(org = %self.name(), %actor, %target, %action, allowed, "permission check");
        Ok(allowed)
    }

    async fn ensure_groups_exist(&self, members: &BTreeSet<Member>) -> Result<()> {
        for member in members {
            if let Member::Group(name) = member {
                Group::get(self, name.as_str()).await?;
            }
        }
        Ok(())
    }

    /// Applies a whole ACL payload to `item` as one evaluator write.
    ///
    /// Every action named in the payload has its grant set replaced;
    /// actions the payload omits are left alone.
    pub async fn edit_from_json_str(&self, item: &dyn Item, json: &str) -> Result<()> {
        let target = Target::of(item);
        validate_target(&target)?;
        let payload = parse_payload(json)?;
        let mut desired = Vec::with_capacity(payload.len());
        for (action, set) in &payload {
            let action: Action = action.parse()?;
            let members = set.members()?;
            self.ensure_groups_exist(&members).await?;
            desired.push((action, members));
        }

        let evaluator = self.evaluator().await?;
        let changed = evaluator
            .update(|model| {
                Ok(desired
                    .iter()
                    .map(|(action, members)| converge(model, &target, *action, members))
                    .sum::<usize>())
            })
            .await?;
        debug!(org = %self.name(), %target, changed, "acl replaced");
        Ok(())
    }
}

#[async_trait]
impl PermissionChecker for Organization {
    async fn check_item_perm(
        &self,
        item: &dyn Item,
        actor: &Actor,
        action: &str,
    ) -> Result<bool> {
        self.check(actor, Target::of(item), action).await
    }

    async fn check_container_perm(
        &self,
        actor: &Actor,
        container_type: &str,
        action: &str,
    ) -> Result<bool> {
        self.check(actor, Target::container_default(container_type), action)
            .await
    }

    async fn root_check_perm(&self, actor: &Actor, action: &str) -> Result<bool> {
        self.check(actor, Target::root(), action).await
    }

    async fn get_item_acl(&self, item: &dyn Item) -> Result<Acl> {
        let evaluator = self.evaluator().await?;
        Ok(Acl::from_model(&evaluator.snapshot(), &Target::of(item)))
    }

    async fn edit_item_perm(
        &self,
        item: &dyn Item,
        member: &Member,
        actions: &[&str],
        op: &str,
    ) -> Result<()> {
        let op: EditOp = op.parse()?;
        let actions = Action::parse_all(actions)?;
        let target = Target::of(item);
        validate_target(&target)?;
        if op == EditOp::Add {
            self.ensure_groups_exist(&BTreeSet::from([member.clone()]))
                .await?;
        }

        let subject = member.subject();
        let evaluator = self.evaluator().await?;
        let changed = evaluator
            .update(|model| Ok(apply_edit(model, &target, &subject, &actions, op)))
            .await?;
        debug!(org = %self.name(), %target, %subject, ?op, changed, "acl edited");
        Ok(())
    }

    async fn edit_from_json(
        &self,
        item: &dyn Item,
        action: &str,
        payload: &AceSet,
    ) -> Result<()> {
        let action: Action = action.parse()?;
        let target = Target::of(item);
        validate_target(&target)?;
        let desired = payload.members()?;
        self.ensure_groups_exist(&desired).await?;

        let evaluator = self.evaluator().await?;
        let changed = evaluator
            .update(|model| Ok(converge(model, &target, action, &desired)))
            .await?;
        debug!(org = %self.name(), %target, %action, changed, "acl converged");
        Ok(())
    }

    async fn create_item_acl(&self, item: &dyn Item, creator: Option<&Actor>) -> Result<()> {
        validate_item_name(item.name())?;
        let target = Target::of(item);
        validate_target(&target)?;
        let defaults = target.renamed(DEFAULT_ITEM);
        let creator = creator
            .filter(|actor| !actor.is_admin())
            .map(Actor::subject);

        let evaluator = self.evaluator().await?;
        let seeded = evaluator
            .update(|model| {
                let mut seeded = model.copy_target(&defaults, &target);
                if let Some(subject) = &creator {
                    seeded += apply_edit(model, &target, subject, &Action::ALL, EditOp::Add);
                }
                Ok(seeded)
            })
            .await?;
        debug!(org = %self.name(), %target, seeded, "item acl created");
        Ok(())
    }

    async fn delete_item_acl(&self, item: &dyn Item) -> Result<()> {
        let target = Target::of(item);
        let evaluator = self.evaluator().await?;
        let removed = evaluator
            .remove_policies(PolicyFilter::target(&target))
            .await?;
        info!(org = %self.name(), %target, removed, "item acl deleted");
        Ok(())
    }

    async fn rename_item_acl(&self, item: &dyn Item, new_name: &str) -> Result<()> {
        validate_item_name(new_name)?;
        let from = Target::of(item);
        let to = from.renamed(new_name.trim());
        if from == to {
            return Ok(());
        }
        validate_target(&to)?;

        let evaluator = self.evaluator().await?;
        let moved = evaluator
            .update(|model| {
                if !model.policies(&PolicyFilter::target(&to)).is_empty() {
                    return Err(Error::conflict("item acl", to.to_string()));
                }
                Ok(model.rename_target(&from, &to))
            })
            .await?;
        info!(org = %self.name(), %from, %to, moved, "item acl renamed");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Checker that grants everything and records nothing.
    #[derive(Clone, Copy, Debug, Default)]
    pub(crate) struct AllowAll;

    #[async_trait]
    impl PermissionChecker for AllowAll {
        async fn check_item_perm(&self, _: &dyn Item, _: &Actor, action: &str) -> Result<bool> {
            action.parse::<Action>().map(|_| true)
        }

        async fn check_container_perm(&self, _: &Actor, _: &str, action: &str) -> Result<bool> {
            action.parse::<Action>().map(|_| true)
        }

        async fn root_check_perm(&self, _: &Actor, action: &str) -> Result<bool> {
            action.parse::<Action>().map(|_| true)
        }

        async fn get_item_acl(&self, item: &dyn Item) -> Result<Acl> {
            Ok(Acl::from_model(
                &crate::evaluator::PolicyModel::new(),
                &Target::of(item),
            ))
        }

        async fn edit_item_perm(&self, _: &dyn Item, _: &Member, _: &[&str], _: &str) -> Result<()> {
            Ok(())
        }

        async fn edit_from_json(&self, _: &dyn Item, _: &str, _: &AceSet) -> Result<()> {
            Ok(())
        }

        async fn create_item_acl(&self, _: &dyn Item, _: Option<&Actor>) -> Result<()> {
            Ok(())
        }

        async fn delete_item_acl(&self, _: &dyn Item) -> Result<()> {
            Ok(())
        }

        async fn rename_item_acl(&self, _: &dyn Item, _: &str) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::AllowAll;
    use super::*;
    use crate::actor::User;
    use crate::taxonomy::ItemRef;
    use crate::types::ActorName;
    use futures::executor::block_on;

    #[test]
    fn test_double_still_rejects_unknown_actions() {
        let checker: &dyn PermissionChecker = &AllowAll;
        let actor = Actor::from(User::new(ActorName::try_from("bob").unwrap()));
        let role = ItemRef::new("roles", "webserver");

        assert!(block_on(checker.check_item_perm(&role, &actor, "read")).unwrap());
        assert!(matches!(
            block_on(checker.root_check_perm(&actor, "frobnatz")),
            Err(Error::UnknownAction(_))
        ));
        let acl = block_on(checker.get_item_acl(&role)).unwrap();
        assert_eq!(acl.perms.len(), Action::ALL.len());
    }
}
