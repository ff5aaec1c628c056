//! Groups: named, nestable collections of actors.
//!
//! Each group is mirrored into the tenant evaluator as a role. Members are
//! edges `actor -> role(group)` and nested groups are edges
//! `role(child) -> role(parent)`. Every mutation writes the evaluator first
//! and the group record second; if the record write fails the evaluator
//! change is rolled back.

use crate::bootstrap::is_default_group;
use crate::error::{Error, Result};
use crate::evaluator::PolicyModel;
use crate::org::{Organization, USAG_PREFIX, is_usag_name};
use crate::policy::{PolicyFilter, RoleEdge, Subject};
use crate::taxonomy::{CONTAINERS_KIND, DEFAULT_ITEM, Item, Target};
use crate::types::{ActorName, GroupName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Container type of group items.
pub const GROUPS_CONTAINER: &str = "groups";

/// A tenant group.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Group {
    name: GroupName,
    actors: BTreeSet<ActorName>,
    groups: BTreeSet<GroupName>,
}

impl Item for Group {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn container_kind(&self) -> &str {
        CONTAINERS_KIND
    }

    fn container_type(&self) -> &str {
        GROUPS_CONTAINER
    }
}

/// Edge changes applied by one save, kept for rollback.
#[derive(Default)]
struct EdgeDelta {
    added: Vec<RoleEdge>,
    removed: Vec<RoleEdge>,
}

impl EdgeDelta {
    fn revert(&self, model: &mut PolicyModel) {
        for edge in &self.added {
            model.remove_role_edge(edge);
        }
        for edge in &self.removed {
            model.add_role_edge(edge.clone());
        }
    }
}

/// One membership change, mirrored as a single role edge.
#[derive(Clone, Copy, Debug)]
enum Change<'a> {
    AddActor(&'a ActorName),
    DelActor(&'a ActorName),
    AddGroup(&'a GroupName),
    DelGroup(&'a GroupName),
}

impl Change<'_> {
    fn edge(self, role: &GroupName) -> RoleEdge {
        let member = match self {
            Change::AddActor(actor) | Change::DelActor(actor) => Subject::Actor(actor.clone()),
            Change::AddGroup(group) | Change::DelGroup(group) => Subject::Role(group.clone()),
        };
        RoleEdge {
            member,
            role: role.clone(),
        }
    }

    fn adds(self) -> bool {
        matches!(self, Change::AddActor(_) | Change::AddGroup(_))
    }

    fn apply_edge(self, model: &mut PolicyModel, edge: &RoleEdge) -> bool {
        if self.adds() {
            model.add_role_edge(edge.clone())
        } else {
            model.remove_role_edge(edge)
        }
    }

    fn revert_edge(self, model: &mut PolicyModel, edge: &RoleEdge) {
        if self.adds() {
            model.remove_role_edge(edge);
        } else {
            model.add_role_edge(edge.clone());
        }
    }

    fn apply_to(self, group: &mut Group) -> bool {
        match self {
            Change::AddActor(actor) => group.actors.insert(actor.clone()),
            Change::DelActor(actor) => group.actors.remove(actor),
            Change::AddGroup(child) => group.groups.insert(child.clone()),
            Change::DelGroup(child) => group.groups.remove(child),
        }
    }
}

impl Group {
    pub(crate) fn empty(name: GroupName) -> Self {
        Self {
            name,
            actors: BTreeSet::new(),
            groups: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &GroupName {
        &self.name
    }

    /// Direct actor members.
    pub fn actors(&self) -> &BTreeSet<ActorName> {
        &self.actors
    }

    /// Directly nested groups.
    pub fn groups(&self) -> &BTreeSet<GroupName> {
        &self.groups
    }

    pub fn has_actor(&self, actor: &ActorName) -> bool {
        self.actors.contains(actor)
    }

    fn role(&self) -> Subject {
        Subject::Role(self.name.clone())
    }

    /// Creates an empty group whose ACL starts as a copy of the `groups`
    /// container defaults.
    ///
    /// Names starting with the per-user access group prefix are reserved.
    pub async fn create(org: &Organization, name: &str) -> Result<Group> {
        let name = GroupName::new(name)?;
        ensure_unreserved(&name)?;
        Self::insert(org, name).await
    }

    pub(crate) async fn insert(org: &Organization, name: GroupName) -> Result<Group> {
        let group = Group::empty(name);
        if !org
            .store()
            .insert_group(org.name(), &group)
            .await
            .map_err(Error::from)?
        {
            return Err(Error::conflict("group", group.name.as_str()));
        }

        let evaluator = org.evaluator().await?;
        let target = Target::of(&group);
        let seeded = evaluator
            .update(|model| {
                model.copy_target(&target.renamed(DEFAULT_ITEM), &target);
                Ok(())
            })
            .await;
        if let Err(err) = seeded {
            if let Err(cleanup) = org.store().delete_group(org.name(), &group.name).await {
                warn!(org = %org.name(), group = %group.name, error = %cleanup, "group cleanup failed");
            }
            return Err(err);
        }
        info!(org = %org.name(), group = %group.name, "group created");
        Ok(group)
    }

    /// Loads a group.
    pub async fn get(org: &Organization, name: &str) -> Result<Group> {
        let name = GroupName::new(name)?;
        org.store()
            .get_group(org.name(), &name)
            .await
            .map_err(Error::from)?
            .ok_or_else(|| Error::not_found("group", name.as_str()))
    }

    /// Replaces the stored group with this copy and converges its role
    /// edges to this copy's member sets.
    ///
    /// Changes made through other handles since this copy was loaded are
    /// overwritten. The membership methods below do not have that problem.
    pub async fn save(&self, org: &Organization) -> Result<()> {
        let evaluator = org.evaluator().await?;
        let role = self.name.clone();
        let desired: BTreeSet<Subject> = self
            .actors
            .iter()
            .cloned()
            .map(Subject::Actor)
            .chain(self.groups.iter().cloned().map(Subject::Role))
            .collect();

        let delta = evaluator
            .update(|model| {
                let current: BTreeSet<Subject> = model.members_of(&role).into_iter().collect();
                let mut delta = EdgeDelta::default();
                for member in current.difference(&desired) {
                    let edge = RoleEdge {
                        member: member.clone(),
                        role: role.clone(),
                    };
                    model.remove_role_edge(&edge);
                    delta.removed.push(edge);
                }
                for member in desired.difference(&current) {
                    let edge = RoleEdge {
                        member: member.clone(),
                        role: role.clone(),
                    };
                    model.add_role_edge(edge.clone());
                    delta.added.push(edge);
                }
                Ok(delta)
            })
            .await?;

        if let Err(err) = org.store().put_group(org.name(), self).await {
            warn!(org = %org.name(), group = %self.name, error = %err, "group write failed; reverting role edges");
            if let Err(revert) = evaluator
                .update(|model| {
                    delta.revert(model);
                    Ok(())
                })
                .await
            {
                warn!(org = %org.name(), group = %self.name, error = %revert, "role edge revert failed");
            }
            return Err(Error::Store(err));
        }
        debug!(
            org = %org.name(),
            group = %self.name,
            added = delta.added.len(),
            removed = delta.removed.len(),
            "group saved"
        );
        Ok(())
    }

    /// Adds an actor to the group.
    pub async fn add_actor(&mut self, org: &Organization, actor: &ActorName) -> Result<()> {
        self.apply(org, Change::AddActor(actor)).await
    }

    /// Removes an actor from the group.
    pub async fn del_actor(&mut self, org: &Organization, actor: &ActorName) -> Result<()> {
        self.apply(org, Change::DelActor(actor)).await
    }

    /// Nests `child` inside this group.
    pub async fn add_group(&mut self, org: &Organization, child: &Group) -> Result<()> {
        if child.name == self.name {
            return Err(Error::Protected(format!(
                "group {} cannot contain itself",
                self.name
            )));
        }
        self.apply(org, Change::AddGroup(&child.name)).await
    }

    /// Removes the nested group `child`.
    pub async fn del_group(&mut self, org: &Organization, child: &Group) -> Result<()> {
        self.apply(org, Change::DelGroup(&child.name)).await
    }

    /// Writes one edge, then applies the same change to the freshly read
    /// stored record. On success `self` is refreshed from that record.
    async fn apply(&mut self, org: &Organization, change: Change<'_>) -> Result<()> {
        let evaluator = org.evaluator().await?;
        let edge = change.edge(&self.name);
        let edge_changed = evaluator
            .update(|model| Ok(change.apply_edge(model, &edge)))
            .await?;

        let written = async {
            let mut record = org
                .store()
                .get_group(org.name(), &self.name)
                .await
                .map_err(Error::from)?
                .ok_or_else(|| Error::not_found("group", self.name.as_str()))?;
            if change.apply_to(&mut record) {
                org.store()
                    .put_group(org.name(), &record)
                    .await
                    .map_err(Error::from)?;
            }
            Ok::<_, Error>(record)
        }
        .await;

        match written {
            Ok(record) => {
                debug!(org = %org.name(), group = %self.name, ?change, edge_changed, "group membership changed");
                *self = record;
                Ok(())
            }
            Err(err) => {
                if edge_changed {
                    warn!(org = %org.name(), group = %self.name, error = %err, "group write failed; reverting role edge");
                    if let Err(revert) = evaluator
                        .update(|model| {
                            change.revert_edge(model, &edge);
                            Ok(())
                        })
                        .await
                    {
                        warn!(org = %org.name(), group = %self.name, error = %revert, "role edge revert failed");
                    }
                }
                Err(err)
            }
        }
    }

    /// Deletes the group, its role edges, every row granted to its role,
    /// its own item ACL, and its entry in every group that nested it.
    pub async fn delete(self, org: &Organization) -> Result<()> {
        if is_default_group(self.name.as_str()) {
            return Err(Error::Protected(format!(
                "group {} is built in and cannot be deleted",
                self.name
            )));
        }

        let evaluator = org.evaluator().await?;
        let parents = evaluator.snapshot().direct_roles(&self.role());
        let role = self.name.clone();
        let target = Target::of(&self);
        evaluator
            .update(|model| {
                model.remove_role(&role);
                model.remove_policies(&PolicyFilter::any().subject(Subject::Role(role.clone())));
                model.remove_policies(&PolicyFilter::target(&target));
                Ok(())
            })
            .await?;

        for parent in parents {
            let Some(mut record) = org
                .store()
                .get_group(org.name(), &parent)
                .await
                .map_err(Error::from)?
            else {
                continue;
            };
            if record.groups.remove(&self.name) {
                org.store()
                    .put_group(org.name(), &record)
                    .await
                    .map_err(Error::from)?;
            }
        }
        org.store()
            .delete_group(org.name(), &self.name)
            .await
            .map_err(Error::from)?;
        info!(org = %org.name(), group = %self.name, "group deleted");
        Ok(())
    }

    /// Renames the group, migrating its role edges, the rows granted to its
    /// role, its own item ACL and every parent's reference to it.
    pub async fn rename(&mut self, org: &Organization, new_name: &str) -> Result<()> {
        if is_default_group(self.name.as_str()) {
            return Err(Error::Protected(format!(
                "group {} is built in and cannot be renamed",
                self.name
            )));
        }
        let new_name = GroupName::new(new_name)?;
        if new_name == self.name {
            return Ok(());
        }
        ensure_unreserved(&new_name)?;

        let mut renamed = self.clone();
        renamed.name = new_name.clone();
        if !org
            .store()
            .insert_group(org.name(), &renamed)
            .await
            .map_err(Error::from)?
        {
            return Err(Error::conflict("group", new_name.as_str()));
        }

        let evaluator = org.evaluator().await?;
        let parents = evaluator.snapshot().direct_roles(&self.role());
        let (old_role, new_role) = (self.role(), renamed.role());
        let (old_target, new_target) = (Target::of(&*self), Target::of(&renamed));
        let migrated = evaluator
            .update(|model| {
                model.rename_subject(&old_role, &new_role);
                model.rename_target(&old_target, &new_target);
                Ok(())
            })
            .await;
        if let Err(err) = migrated {
            if let Err(cleanup) = org.store().delete_group(org.name(), &new_name).await {
                warn!(org = %org.name(), group = %new_name, error = %cleanup, "group cleanup failed");
            }
            return Err(err);
        }

        for parent in parents {
            let Some(mut record) = org
                .store()
                .get_group(org.name(), &parent)
                .await
                .map_err(Error::from)?
            else {
                continue;
            };
            if record.groups.remove(&self.name) {
                record.groups.insert(new_name.clone());
                org.store()
                    .put_group(org.name(), &record)
                    .await
                    .map_err(Error::from)?;
            }
        }
        org.store()
            .delete_group(org.name(), &self.name)
            .await
            .map_err(Error::from)?;
        info!(org = %org.name(), from = %self.name, to = %new_name, "group renamed");
        *self = renamed;
        Ok(())
    }
}

fn ensure_unreserved(name: &GroupName) -> Result<()> {
    if is_usag_name(name.as_str()) {
        return Err(Error::InvalidId(format!(
            "group names starting with {USAG_PREFIX} are reserved"
        )));
    }
    Ok(())
}
