use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

const MAX_NAME_LEN: usize = 128;

/// Marker shared by every reserved sentinel token.
pub(crate) const RESERVED_MARKER: &str = "$$";

fn validate_simple_name(value: &str, kind: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidId(format!("{kind} must not be empty")));
    }
    if trimmed.contains(RESERVED_MARKER) {
        return Err(Error::InvalidId(format!(
            "{kind} must not contain the reserved token {RESERVED_MARKER}"
        )));
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(Error::InvalidId(format!(
            "{kind} length must be <= {MAX_NAME_LEN}"
        )));
    }
    if !trimmed.chars().all(is_allowed_name_char) {
        return Err(Error::InvalidId(format!(
            "{kind} contains invalid characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn is_allowed_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-' | '@')
}

/// Validates a coordinate that is written verbatim into persisted policy.
///
/// Unlike [`validate_item_name`] the value is not trimmed first, so
/// surrounding whitespace is rejected rather than silently dropped.
pub(crate) fn validate_token(value: &str, kind: &str) -> Result<()> {
    let checked = validate_simple_name(value, kind)?;
    if checked != value {
        return Err(Error::InvalidId(format!(
            "{kind} must not have surrounding whitespace"
        )));
    }
    Ok(())
}

/// Validates a user-supplied item name.
///
/// Resource modules call this before creating or renaming an item so that
/// sentinel names can never be claimed by real objects.
pub fn validate_item_name(value: &str) -> Result<()> {
    validate_simple_name(value, "item name").map(|_| ())
}

macro_rules! define_id_type {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a validated identifier.
            pub fn new(value: impl AsRef<str>) -> Result<Self> {
                validate_simple_name(value.as_ref(), $kind).map(Self)
            }

            /// Creates an identifier from a trusted string without validation.
            pub fn from_string(value: String) -> Self {
                Self(value)
            }

            /// Returns the underlying string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::from_string(value)
            }
        }
    };
}

define_id_type!(
    /// Organization (tenant) name.
    OrgName,
    "organization name"
);
define_id_type!(
    /// User or client name.
    ActorName,
    "actor name"
);
define_id_type!(
    /// Group name.
    GroupName,
    "group name"
);
define_id_type!(
    /// Container name, which doubles as the container type of its items.
    ContainerName,
    "container name"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_should_be_trimmed() {
        let name = GroupName::try_from("  admins ").expect("group name");
        assert_eq!(name.as_str(), "admins");
    }

    #[test]
    fn names_should_reject_reserved_token() {
        let err = GroupName::try_from("$$default$$").expect_err("must reject");
        assert!(err.to_string().contains("reserved token"));
        assert!(err.is_validation());
    }

    #[test]
    fn names_should_reject_invalid_chars() {
        let err = ActorName::try_from("bob smith").expect_err("must reject");
        assert!(err.to_string().contains("actor name"));
    }

    #[test]
    fn item_names_allow_dotted_node_names() {
        validate_item_name("web01.example.com").expect("node name");
        assert!(validate_item_name("a$$b").is_err());
        assert!(validate_item_name("").is_err());
    }

    #[test]
    fn tokens_reject_separators_and_padding() {
        validate_token("web01", "item name").expect("plain token");
        assert!(validate_token("web01,evil", "item name").is_err());
        assert!(validate_token(" web01", "item name").is_err());
        assert!(validate_token("web01\n", "item name").is_err());
    }
}
