use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Permission action from the fixed vocabulary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Grant,
}

impl Action {
    /// Every action, in canonical order.
    pub const ALL: [Action; 5] = [
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::Grant,
    ];

    /// Returns the wire name of the action.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Grant => "grant",
        }
    }

    /// Parses every entry of `actions`, failing on the first unknown one.
    ///
    /// Nothing is applied by callers until the whole list has parsed.
    pub fn parse_all<S: AsRef<str>>(actions: &[S]) -> Result<Vec<Action>> {
        actions.iter().map(|a| a.as_ref().parse()).collect()
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "create" => Ok(Action::Create),
            "read" => Ok(Action::Read),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "grant" => Ok(Action::Grant),
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effect carried by a policy row. Only `Allow` rows grant access.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    /// Returns the wire name of the effect.
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl FromStr for Effect {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(Error::InvalidPayload(format!("unknown effect {other}"))),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edit operation applied by `edit_item_perm`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EditOp {
    Add,
    Remove,
}

impl FromStr for EditOp {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "add" => Ok(EditOp::Add),
            "remove" => Ok(EditOp::Remove),
            other => Err(Error::UnknownEditOp(other.to_string())),
        }
    }
}
