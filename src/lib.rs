//! Multi-tenant authorization for a fleet configuration-management server.
//!
//! Every organization (tenant) owns one rule [`Evaluator`] holding policy
//! rows `(subject, container kind, container type, item, action, effect)`
//! and role edges between actors and groups. Resource modules depend on
//! the [`PermissionChecker`] capability set to check access and to keep
//! item ACLs in step with the items they manage. A separate
//! [`MasterScope`] governs cross-tenant objects.
//!
//! Denial is never an error: checks return `Ok(false)`.
//!
//! # Examples
//!
//! Creating a tenant and checking a user (enable `memory-store`):
//! ```no_run
//! # #[cfg(feature = "memory-store")]
//! # futures::executor::block_on(async {
//! use tenant_acl::{Actor, ActorName, AuthzBuilder, MemoryAdapter, MemoryStore};
//! use tenant_acl::{PermissionChecker, User};
//!
//! let authz = AuthzBuilder::new(MemoryStore::new(), MemoryAdapter::new()).build();
//! let alice = User::new(ActorName::try_from("alice").unwrap());
//! let org = authz.create_org("acme", None, Some(&alice)).await.unwrap();
//!
//! let bob = User::new(ActorName::try_from("bob").unwrap());
//! org.accept_association(&bob).await.unwrap();
//! let allowed = org
//!     .check_container_perm(&Actor::from(bob), "nodes", "update")
//!     .await
//!     .unwrap();
//! assert!(allowed);
//! # });
//! ```
#![forbid(unsafe_code)]

mod acl;
mod action;
mod actor;
mod authz;
mod bootstrap;
mod checker;
mod config;
mod container;
mod error;
mod evaluator;
mod file_adapter;
mod group;
mod master;
mod org;
mod policy;
mod store;
mod taxonomy;
mod types;

#[cfg(feature = "memory-store")]
mod memory_store;

#[cfg(feature = "axum")]
pub mod axum;

pub use crate::acl::{AceSet, Acl, AclEntry, AclPayload, Member, parse_payload};
pub use crate::action::{Action, EditOp, Effect};
pub use crate::actor::{Actor, ActorKind, Client, User};
pub use crate::authz::{Authz, AuthzBuilder};
pub use crate::bootstrap::{
    ADMINS_GROUP, BILLING_ADMINS_GROUP, CLIENTS_GROUP, DEFAULT_GROUPS, MASTER_ADMINS_ROLE,
    USERS_GROUP, seed_master, seed_org,
};
pub use crate::checker::PermissionChecker;
pub use crate::config::{AuthzConfig, DEFAULT_BOOTSTRAP_USER};
pub use crate::container::Container;
pub use crate::error::{Error, PolicyParseError, Result, StoreError};
pub use crate::evaluator::{DEFAULT_MAX_ROLE_DEPTH, Evaluator, PolicyModel};
pub use crate::file_adapter::FileAdapter;
pub use crate::group::{GROUPS_CONTAINER, Group};
pub use crate::master::MasterScope;
pub use crate::org::{OrgRecord, Organization, USAG_PREFIX, is_usag_name, usag_name};
pub use crate::policy::{
    DEFAULT_ROLE_PREFIX, PolicyCodec, PolicyFilter, PolicyRule, PolicySnapshot, RoleEdge, Subject,
};
pub use crate::store::{ContainerStore, GroupStore, OrgStore, PolicyAdapter, PolicyScope, Store};
pub use crate::taxonomy::{
    CONTAINERS_KIND, DEFAULT_CONTAINERS, DEFAULT_ITEM, Item, ItemRef, MASTER_KIND,
    MASTER_OBJECTS, ROOT_ITEM, Target, is_default_container, validate_target,
};
pub use crate::types::{ActorName, ContainerName, GroupName, OrgName, validate_item_name};

#[cfg(feature = "memory-store")]
pub use crate::memory_store::{MemoryAdapter, MemoryStore};
