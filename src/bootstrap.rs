//! Default policy skeletons for a new tenant and for the master scope.

use crate::action::Action;
use crate::evaluator::PolicyModel;
use crate::policy::{PolicyRule, RoleEdge, Subject};
use crate::taxonomy::{DEFAULT_CONTAINERS, MASTER_OBJECTS, Target};
use crate::types::{ActorName, GroupName};

/// Tenant administrators.
pub const ADMINS_GROUP: &str = "admins";
/// Every user associated with the tenant, through their access group.
pub const USERS_GROUP: &str = "users";
/// Every client of the tenant.
pub const CLIENTS_GROUP: &str = "clients";
/// Billing administrators.
pub const BILLING_ADMINS_GROUP: &str = "billing-admins";

/// Groups every tenant starts with. They cannot be deleted or renamed.
pub const DEFAULT_GROUPS: [&str; 4] = [
    ADMINS_GROUP,
    USERS_GROUP,
    CLIENTS_GROUP,
    BILLING_ADMINS_GROUP,
];

/// Role holding every master-scope action.
pub const MASTER_ADMINS_ROLE: &str = "master-admins";

const CRUD: &[Action] = &[Action::Create, Action::Read, Action::Update, Action::Delete];

const USERS_CONTAINER_GRANTS: &[(&str, &[Action])] = &[
    ("clients", &[Action::Read, Action::Delete]),
    ("cookbooks", CRUD),
    ("data", CRUD),
    ("environments", CRUD),
    ("nodes", CRUD),
    ("roles", CRUD),
    ("sandboxes", &[Action::Create]),
];

const CLIENTS_CONTAINER_GRANTS: &[(&str, &[Action])] = &[
    ("cookbooks", &[Action::Read]),
    ("data", &[Action::Read]),
    ("environments", &[Action::Read]),
    ("nodes", &[Action::Create, Action::Read, Action::Update]),
    ("roles", &[Action::Read]),
];

pub(crate) fn is_default_group(name: &str) -> bool {
    DEFAULT_GROUPS.contains(&name)
}

fn role(name: &str) -> Subject {
    Subject::Role(GroupName::from_string(name.to_string()))
}

fn grant(model: &mut PolicyModel, subject: &Subject, target: &Target, actions: &[Action]) {
    for action in actions {
        model.add_policy(PolicyRule::allow(subject.clone(), target.clone(), *action));
    }
}

/// Container-level grants for a container created after bootstrap.
pub(crate) fn seed_container(model: &mut PolicyModel, container_type: &str) {
    grant(
        model,
        &role(ADMINS_GROUP),
        &Target::container_default(container_type),
        &Action::ALL,
    );
}

/// Writes the default tenant skeleton.
///
/// Root `read` is granted to the users and clients roles, so any actor
/// associated with the tenant can read it without a special case in the
/// checker.
pub fn seed_org(model: &mut PolicyModel) {
    for container in DEFAULT_CONTAINERS {
        seed_container(model, container);
    }
    for (container, actions) in USERS_CONTAINER_GRANTS {
        grant(model, &role(USERS_GROUP), &Target::container_default(*container), actions);
    }
    for (container, actions) in CLIENTS_CONTAINER_GRANTS {
        grant(model, &role(CLIENTS_GROUP), &Target::container_default(*container), actions);
    }

    let root = Target::root();
    grant(model, &role(ADMINS_GROUP), &root, &Action::ALL);
    grant(model, &role(USERS_GROUP), &root, &[Action::Read]);
    grant(model, &role(CLIENTS_GROUP), &root, &[Action::Read]);

    // default groups are items of the groups container
    let groups_default = Target::container_default("groups");
    for group in DEFAULT_GROUPS {
        model.copy_target(&groups_default, &groups_default.renamed(group));
    }
    grant(
        model,
        &role(BILLING_ADMINS_GROUP),
        &groups_default.renamed(BILLING_ADMINS_GROUP),
        &[Action::Read, Action::Update],
    );
}

/// Writes the master skeleton: `bootstrap_user` holds every action on
/// every master object through the master-admins role.
pub fn seed_master(model: &mut PolicyModel, bootstrap_user: &ActorName) {
    let admins = role(MASTER_ADMINS_ROLE);
    for object in MASTER_OBJECTS {
        grant(model, &admins, &Target::master(object), &Action::ALL);
    }
    model.add_role_edge(RoleEdge::new(
        bootstrap_user.clone(),
        GroupName::from_string(MASTER_ADMINS_ROLE.to_string()),
    ));
}
