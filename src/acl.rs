//! Item ACLs: the read projection of policy rows for one item and the
//! wire payload used to edit them.

use crate::action::{Action, EditOp, Effect};
use crate::error::{Error, Result};
use crate::evaluator::PolicyModel;
use crate::policy::{PolicyRule, Subject};
use crate::taxonomy::Target;
use crate::types::{ActorName, GroupName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Who an ACL edit applies to.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Member {
    Actor(ActorName),
    Group(GroupName),
}

impl Member {
    /// Policy subject for this member.
    pub fn subject(&self) -> Subject {
        match self {
            Member::Actor(name) => Subject::Actor(name.clone()),
            Member::Group(name) => Subject::Role(name.clone()),
        }
    }
}

impl From<ActorName> for Member {
    fn from(value: ActorName) -> Self {
        Member::Actor(value)
    }
}

impl From<GroupName> for Member {
    fn from(value: GroupName) -> Self {
        Member::Group(value)
    }
}

impl From<Subject> for Member {
    fn from(value: Subject) -> Self {
        match value {
            Subject::Actor(name) => Member::Actor(name),
            Subject::Role(name) => Member::Group(name),
        }
    }
}

/// Grant set for one action.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct AclEntry {
    pub actors: BTreeSet<ActorName>,
    pub groups: BTreeSet<GroupName>,
    pub effect: Effect,
}

/// Permission matrix of one item, computed from the evaluator's rows.
///
/// Every action is always present; an action nobody holds has empty sets.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Acl {
    pub item_name: String,
    pub container_kind: String,
    pub container_type: String,
    pub perms: BTreeMap<Action, AclEntry>,
}

impl Acl {
    /// Projects the allow rows of `target` out of `model`.
    pub fn from_model(model: &PolicyModel, target: &Target) -> Self {
        let perms = Action::ALL
            .into_iter()
            .map(|action| {
                let mut entry = AclEntry::default();
                for subject in model.allowed_subjects(target, action) {
                    match subject {
                        Subject::Actor(name) => {
                            entry.actors.insert(name);
                        }
                        Subject::Role(name) => {
                            entry.groups.insert(name);
                        }
                    }
                }
                (action, entry)
            })
            .collect();

        Self {
            item_name: target.name.clone(),
            container_kind: target.container_kind.clone(),
            container_type: target.container_type.clone(),
            perms,
        }
    }

    /// Grant set for `action`.
    pub fn entry(&self, action: Action) -> Option<&AclEntry> {
        self.perms.get(&action)
    }

    /// Renders the wire payload.
    pub fn to_payload(&self) -> AclPayload {
        self.perms
            .iter()
            .map(|(action, entry)| {
                (
                    action.as_str().to_string(),
                    AceSet {
                        actors: entry.actors.iter().map(ToString::to_string).collect(),
                        groups: entry.groups.iter().map(ToString::to_string).collect(),
                    },
                )
            })
            .collect()
    }
}

/// Actors and groups named for one action in an edit payload.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AceSet {
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl AceSet {
    /// Validates every name and returns the set as members.
    pub fn members(&self) -> Result<BTreeSet<Member>> {
        let actors = self
            .actors
            .iter()
            .map(|name| ActorName::new(name).map(Member::Actor));
        let groups = self
            .groups
            .iter()
            .map(|name| GroupName::new(name).map(Member::Group));
        actors.chain(groups).collect()
    }
}

/// ACL wire payload: action name to grant set.
pub type AclPayload = BTreeMap<String, AceSet>;

/// Parses a JSON body of the form `{"read": {"actors": [...], "groups": [...]}}`.
pub fn parse_payload(json: &str) -> Result<AclPayload> {
    serde_json::from_str(json).map_err(|err| Error::InvalidPayload(err.to_string()))
}

/// Adds or removes one allow row per action for `subject` on `target`.
///
/// This is the single write primitive behind every item-ACL edit.
pub(crate) fn apply_edit(
    model: &mut PolicyModel,
    target: &Target,
    subject: &Subject,
    actions: &[Action],
    op: EditOp,
) -> usize {
    let mut changed = 0;
    for action in actions {
        let rule = PolicyRule::allow(subject.clone(), target.clone(), *action);
        let did = match op {
            EditOp::Add => model.add_policy(rule),
            EditOp::Remove => model.remove_policy(&rule),
        };
        if did {
            changed += 1;
        }
    }
    changed
}

/// Converges the grant set of `action` on `target` to `desired` using
/// [`apply_edit`] for each difference.
pub(crate) fn converge(
    model: &mut PolicyModel,
    target: &Target,
    action: Action,
    desired: &BTreeSet<Member>,
) -> usize {
    let current: BTreeSet<Member> = model
        .allowed_subjects(target, action)
        .into_iter()
        .map(Member::from)
        .collect();

    let mut changed = 0;
    for gone in current.difference(desired) {
        let subject = gone.subject();
        changed += apply_edit(model, target, &subject, &[action], EditOp::Remove);
    }
    for added in desired.difference(&current) {
        let subject = added.subject();
        changed += apply_edit(model, target, &subject, &[action], EditOp::Add);
    }
    changed
}
