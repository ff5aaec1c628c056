//! Actors: the users and clients whose requests are authorized.
//!
//! Actor identity is owned by the actor-management subsystem; this crate
//! only references actors by name and reads their flags.

use crate::policy::Subject;
use crate::types::ActorName;
use std::fmt;

/// A human user.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct User {
    name: ActorName,
    admin: bool,
}

impl User {
    /// Creates a non-admin user.
    pub fn new(name: ActorName) -> Self {
        Self { name, admin: false }
    }

    /// Sets the server-admin flag.
    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    pub fn name(&self) -> &ActorName {
        &self.name
    }
}

/// An API client (a node or a validator).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Client {
    name: ActorName,
    admin: bool,
    validator: bool,
}

impl Client {
    /// Creates a plain client.
    pub fn new(name: ActorName) -> Self {
        Self {
            name,
            admin: false,
            validator: false,
        }
    }

    /// Sets the admin flag.
    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    /// Sets the validator flag.
    pub fn with_validator(mut self, validator: bool) -> Self {
        self.validator = validator;
        self
    }

    pub fn name(&self) -> &ActorName {
        &self.name
    }
}

/// Actor type tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActorKind {
    User,
    Client,
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorKind::User => f.write_str("user"),
            ActorKind::Client => f.write_str("client"),
        }
    }
}

/// The party making a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Actor {
    User(User),
    Client(Client),
}

impl Actor {
    pub fn name(&self) -> &ActorName {
        match self {
            Actor::User(user) => user.name(),
            Actor::Client(client) => client.name(),
        }
    }

    /// Admin actors bypass policy evaluation within a tenant.
    pub fn is_admin(&self) -> bool {
        match self {
            Actor::User(user) => user.admin,
            Actor::Client(client) => client.admin,
        }
    }

    /// Only clients can be validators.
    pub fn is_validator(&self) -> bool {
        match self {
            Actor::User(_) => false,
            Actor::Client(client) => client.validator,
        }
    }

    pub fn kind(&self) -> ActorKind {
        match self {
            Actor::User(_) => ActorKind::User,
            Actor::Client(_) => ActorKind::Client,
        }
    }

    pub fn is_client(&self) -> bool {
        self.kind() == ActorKind::Client
    }

    /// Policy subject for this actor.
    pub fn subject(&self) -> Subject {
        Subject::Actor(self.name().clone())
    }
}

impl From<User> for Actor {
    fn from(value: User) -> Self {
        Actor::User(value)
    }
}

impl From<Client> for Actor {
    fn from(value: Client) -> Self {
        Actor::Client(value)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> ActorName {
        ActorName::try_from(value).unwrap()
    }

    #[test]
    fn users_are_never_validators() {
        let actor = Actor::from(User::new(name("alice")).with_admin(true));
        assert!(actor.is_admin());
        assert!(!actor.is_validator());
        assert_eq!(actor.kind(), ActorKind::User);
    }

    #[test]
    fn clients_carry_validator_flag() {
        let actor = Actor::from(Client::new(name("org-validator")).with_validator(true));
        assert!(actor.is_validator());
        assert!(actor.is_client());
        assert!(!actor.is_admin());
        assert_eq!(actor.to_string(), "client org-validator");
    }
}
