//! Policy rows, role edges and their durable text form.
//!
//! The text form is one record per line, human-diffable:
//!
//! ```text
//! p, role##admins, roles, containers, $$default$$, create, allow
//! g, alice, role##users
//! ```
//!
//! Permission rows list subject, container type, container kind, item
//! name, action and effect. Role edges list member then role. Role tokens
//! carry the configured prefix so they never collide with actor names.

use crate::action::{Action, Effect};
use crate::error::PolicyParseError;
use crate::taxonomy::Target;
use crate::types::{ActorName, GroupName};
use std::fmt;

/// Default prefix distinguishing role tokens from actor names.
pub const DEFAULT_ROLE_PREFIX: &str = "role##";

/// Policy subject: a plain actor or a role (group) token.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Subject {
    Actor(ActorName),
    Role(GroupName),
}

impl Subject {
    /// Returns the role name when this subject is a role.
    pub fn as_role(&self) -> Option<&GroupName> {
        match self {
            Subject::Role(role) => Some(role),
            Subject::Actor(_) => None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Actor(name) => write!(f, "actor:{name}"),
            Subject::Role(name) => write!(f, "role:{name}"),
        }
    }
}

impl From<ActorName> for Subject {
    fn from(value: ActorName) -> Self {
        Subject::Actor(value)
    }
}

impl From<GroupName> for Subject {
    fn from(value: GroupName) -> Self {
        Subject::Role(value)
    }
}

/// One permission row.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PolicyRule {
    pub subject: Subject,
    pub target: Target,
    pub action: Action,
    pub effect: Effect,
}

impl PolicyRule {
    /// Creates an allow row.
    pub fn allow(subject: Subject, target: Target, action: Action) -> Self {
        Self {
            subject,
            target,
            action,
            effect: Effect::Allow,
        }
    }
}

/// Role membership edge: `member` inherits everything granted to `role`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RoleEdge {
    pub member: Subject,
    pub role: GroupName,
}

impl RoleEdge {
    /// Creates an edge.
    pub fn new(member: impl Into<Subject>, role: GroupName) -> Self {
        Self {
            member: member.into(),
            role,
        }
    }
}

/// Full policy state of one scope, as exchanged with a policy adapter.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PolicySnapshot {
    pub rules: Vec<PolicyRule>,
    pub edges: Vec<RoleEdge>,
}

/// Row filter; `None` fields match anything.
#[derive(Clone, Debug, Default)]
pub struct PolicyFilter {
    pub subject: Option<Subject>,
    pub container_kind: Option<String>,
    pub container_type: Option<String>,
    pub name: Option<String>,
    pub action: Option<Action>,
    pub effect: Option<Effect>,
}

impl PolicyFilter {
    /// Filter matching every row.
    pub fn any() -> Self {
        Self::default()
    }

    /// Filter matching every row scoped to `target`.
    pub fn target(target: &Target) -> Self {
        Self {
            container_kind: Some(target.container_kind.clone()),
            container_type: Some(target.container_type.clone()),
            name: Some(target.name.clone()),
            ..Self::default()
        }
    }

    /// Restricts the filter to one subject.
    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Restricts the filter to one container kind and type.
    pub fn container(mut self, kind: impl Into<String>, container_type: impl Into<String>) -> Self {
        self.container_kind = Some(kind.into());
        self.container_type = Some(container_type.into());
        self
    }

    /// Restricts the filter to one action.
    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Returns true if `rule` passes the filter.
    pub fn matches(&self, rule: &PolicyRule) -> bool {
        fn field<T: PartialEq + ?Sized>(want: Option<&T>, have: &T) -> bool {
            want.is_none_or(|want| want == have)
        }

        field(self.subject.as_ref(), &rule.subject)
            && field(self.container_kind.as_deref(), rule.target.container_kind.as_str())
            && field(self.container_type.as_deref(), rule.target.container_type.as_str())
            && field(self.name.as_deref(), rule.target.name.as_str())
            && field(self.action.as_ref(), &rule.action)
            && field(self.effect.as_ref(), &rule.effect)
    }
}

/// Encodes and decodes the durable text form.
#[derive(Clone, Debug)]
pub struct PolicyCodec {
    role_prefix: String,
}

impl Default for PolicyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ROLE_PREFIX)
    }
}

impl PolicyCodec {
    /// Creates a codec using `role_prefix` for role tokens.
    pub fn new(role_prefix: impl Into<String>) -> Self {
        Self {
            role_prefix: role_prefix.into(),
        }
    }

    /// Returns the token written for `subject`.
    pub fn subject_token(&self, subject: &Subject) -> String {
        match subject {
            Subject::Actor(name) => name.to_string(),
            Subject::Role(role) => format!("{}{role}", self.role_prefix),
        }
    }

    /// Parses a subject token.
    pub fn parse_subject(&self, token: &str) -> Subject {
        match token.strip_prefix(self.role_prefix.as_str()) {
            Some(role) => Subject::Role(GroupName::from_string(role.to_string())),
            None => Subject::Actor(ActorName::from_string(token.to_string())),
        }
    }

    /// Renders a snapshot, rules first, in a stable order.
    pub fn encode(&self, snapshot: &PolicySnapshot) -> String {
        let mut rules = snapshot.rules.clone();
        rules.sort();
        let mut edges = snapshot.edges.clone();
        edges.sort();

        let mut out = String::new();
        for rule in &rules {
            out.push_str(&format!(
                "p, {}, {}, {}, {}, {}, {}\n",
                self.subject_token(&rule.subject),
                rule.target.container_type,
                rule.target.container_kind,
                rule.target.name,
                rule.action,
                rule.effect,
            ));
        }
        for edge in &edges {
            out.push_str(&format!(
                "g, {}, {}{}\n",
                self.subject_token(&edge.member),
                self.role_prefix,
                edge.role,
            ));
        }
        out
    }

    /// Parses the text form. Blank lines and `#` comments are skipped.
    pub fn decode(&self, text: &str) -> std::result::Result<PolicySnapshot, PolicyParseError> {
        let mut snapshot = PolicySnapshot::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let err = |reason: String| PolicyParseError {
                line: idx + 1,
                reason,
            };
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match fields.as_slice() {
                ["p", subject, container_type, container_kind, name, action, effect] => {
                    let action = action
                        .parse::<Action>()
                        .map_err(|e| err(e.to_string()))?;
                    let effect = effect
                        .parse::<Effect>()
                        .map_err(|e| err(e.to_string()))?;
                    snapshot.rules.push(PolicyRule {
                        subject: self.parse_subject(subject),
                        target: Target::new(*container_kind, *container_type, *name),
                        action,
                        effect,
                    });
                }
                ["g", member, role] => {
                    let Some(role) = role.strip_prefix(self.role_prefix.as_str()) else {
                        return Err(err(format!("role {role} lacks the role prefix")));
                    };
                    snapshot.edges.push(RoleEdge {
                        member: self.parse_subject(member),
                        role: GroupName::from_string(role.to_string()),
                    });
                }
                _ => return Err(err(format!("unrecognized record {line:?}"))),
            }
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str) -> GroupName {
        GroupName::try_from(name).unwrap()
    }

    fn actor(name: &str) -> ActorName {
        ActorName::try_from(name).unwrap()
    }

    #[test]
    fn encode_writes_seven_field_rows_and_prefixed_roles() {
        let snapshot = PolicySnapshot {
            rules: vec![PolicyRule::allow(
                Subject::Role(group("admins")),
                Target::container_default("roles"),
                Action::Create,
            )],
            edges: vec![RoleEdge::new(actor("test1"), group("admins"))],
        };

        let text = PolicyCodec::default().encode(&snapshot);

        assert_eq!(
            text,
            "p, role##admins, roles, containers, $$default$$, create, allow\n\
             g, test1, role##admins\n"
        );
    }

    #[test]
    fn decode_reads_back_encoded_text() {
        let codec = PolicyCodec::new("grp:");
        let snapshot = PolicySnapshot {
            rules: vec![
                PolicyRule::allow(Subject::Actor(actor("bob")), Target::root(), Action::Read),
                PolicyRule {
                    subject: Subject::Role(group("users")),
                    target: Target::new("containers", "nodes", "web01"),
                    action: Action::Delete,
                    effect: Effect::Deny,
                },
            ],
            edges: vec![RoleEdge::new(group("child"), group("parent"))],
        };

        let decoded = codec.decode(&codec.encode(&snapshot)).unwrap();

        let mut expected = snapshot.rules.clone();
        expected.sort();
        assert_eq!(decoded.rules, expected);
        assert_eq!(decoded.edges, snapshot.edges);
    }

    #[test]
    fn decode_reports_line_of_bad_action() {
        let text = "# header\n\np, bob, roles, containers, web, frobnatz, allow\n";
        let err = PolicyCodec::default().decode(text).unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.reason.contains("frobnatz"));
    }

    #[test]
    fn decode_rejects_unprefixed_role() {
        let err = PolicyCodec::default().decode("g, bob, admins").unwrap_err();
        assert!(err.reason.contains("role prefix"));
    }

    #[test]
    fn filter_matches_only_selected_fields() {
        let rule = PolicyRule::allow(
            Subject::Actor(actor("bob")),
            Target::new("containers", "nodes", "web01"),
            Action::Read,
        );

        assert!(PolicyFilter::any().matches(&rule));
        assert!(PolicyFilter::target(&rule.target).matches(&rule));
        assert!(
            !PolicyFilter::target(&rule.target)
                .action(Action::Update)
                .matches(&rule)
        );
        assert!(
            !PolicyFilter::any()
                .subject(Subject::Actor(actor("alice")))
                .matches(&rule)
        );
    }
}
