use crate::evaluator::DEFAULT_MAX_ROLE_DEPTH;
use crate::policy::{DEFAULT_ROLE_PREFIX, PolicyCodec};
use crate::types::ActorName;
use serde::{Deserialize, Serialize};

/// Default master-scope bootstrap identity.
pub const DEFAULT_BOOTSTRAP_USER: &str = "pivotal";

/// Runtime configuration for [`crate::Authz`].
///
/// Every field has a default, so a partial config file is enough.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthzConfig {
    /// Prefix that turns a group name into a role token in persisted policy.
    pub role_prefix: String,
    /// Super-user granted every master-scope action at bootstrap.
    pub bootstrap_user: ActorName,
    /// Maximum number of role hops followed during a check.
    pub max_role_depth: usize,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            role_prefix: DEFAULT_ROLE_PREFIX.to_string(),
            bootstrap_user: ActorName::from_string(DEFAULT_BOOTSTRAP_USER.to_string()),
            max_role_depth: DEFAULT_MAX_ROLE_DEPTH,
        }
    }
}

impl AuthzConfig {
    /// Codec for the configured role prefix.
    pub fn codec(&self) -> PolicyCodec {
        PolicyCodec::new(self.role_prefix.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: AuthzConfig =
            serde_json::from_str(r#"{"bootstrap_user": "root"}"#).expect("config");

        assert_eq!(config.bootstrap_user.as_str(), "root");
        assert_eq!(config.role_prefix, "role##");
        assert_eq!(config.max_role_depth, 16);
    }
}
