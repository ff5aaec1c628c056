use crate::action::{Action, Effect};
use crate::error::{Error, Result};
use crate::policy::{PolicyFilter, PolicyRule, PolicySnapshot, RoleEdge, Subject};
use crate::store::{PolicyAdapter, PolicyScope};
use crate::taxonomy::Target;
use crate::types::GroupName;
use futures::lock::Mutex;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Default bound on role-edge traversal depth.
pub const DEFAULT_MAX_ROLE_DEPTH: usize = 16;

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct Grant {
    subject: Subject,
    action: Action,
    effect: Effect,
}

/// In-memory policy rows and role edges of one scope.
///
/// Rows are indexed by target so a check only looks at the rows of the
/// object being checked. Every mutating method reports whether it changed
/// anything.
#[derive(Clone, Debug, Default)]
pub struct PolicyModel {
    rules: BTreeMap<Target, BTreeSet<Grant>>,
    edges: BTreeMap<Subject, BTreeSet<GroupName>>,
    revision: u64,
}

impl PolicyModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a model from persisted state.
    pub fn from_snapshot(snapshot: PolicySnapshot) -> Self {
        let mut model = Self::default();
        for rule in snapshot.rules {
            model.add_policy(rule);
        }
        for edge in snapshot.edges {
            model.add_role_edge(edge);
        }
        model.revision = 0;
        model
    }

    /// Flattens the model for persistence.
    pub fn to_snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            rules: self.policies(&PolicyFilter::any()),
            edges: self
                .edges
                .iter()
                .flat_map(|(member, roles)| {
                    roles.iter().map(|role| RoleEdge {
                        member: member.clone(),
                        role: role.clone(),
                    })
                })
                .collect(),
        }
    }

    /// Returns true when there are no rows and no edges.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.edges.is_empty()
    }

    /// Adds a row. Returns false if the identical row already existed.
    pub fn add_policy(&mut self, rule: PolicyRule) -> bool {
        let grant = Grant {
            subject: rule.subject,
            action: rule.action,
            effect: rule.effect,
        };
        let added = self.rules.entry(rule.target).or_default().insert(grant);
        self.touch(added)
    }

    /// Removes one exact row.
    pub fn remove_policy(&mut self, rule: &PolicyRule) -> bool {
        let grant = Grant {
            subject: rule.subject.clone(),
            action: rule.action,
            effect: rule.effect,
        };
        let removed = match self.rules.get_mut(&rule.target) {
            Some(grants) => {
                let removed = grants.remove(&grant);
                if grants.is_empty() {
                    self.rules.remove(&rule.target);
                }
                removed
            }
            None => false,
        };
        self.touch(removed)
    }

    /// Removes every row passing `filter` and returns how many went.
    pub fn remove_policies(&mut self, filter: &PolicyFilter) -> usize {
        let doomed = self.policies(filter);
        for rule in &doomed {
            self.remove_policy(rule);
        }
        doomed.len()
    }

    /// Returns every row passing `filter`.
    pub fn policies(&self, filter: &PolicyFilter) -> Vec<PolicyRule> {
        let candidates: Box<dyn Iterator<Item = (&Target, &BTreeSet<Grant>)> + '_> =
            match (&filter.container_kind, &filter.container_type, &filter.name) {
                (Some(kind), Some(container_type), Some(name)) => {
                    let target = Target::new(kind, container_type, name);
                    Box::new(self.rules.get_key_value(&target).into_iter())
                }
                _ => Box::new(self.rules.iter()),
            };

        candidates
            .flat_map(|(target, grants)| {
                grants.iter().map(|grant| PolicyRule {
                    subject: grant.subject.clone(),
                    target: target.clone(),
                    action: grant.action,
                    effect: grant.effect,
                })
            })
            .filter(|rule| filter.matches(rule))
            .collect()
    }

    /// Subjects holding an allow row for `action` on exactly `target`.
    pub fn allowed_subjects(&self, target: &Target, action: Action) -> BTreeSet<Subject> {
        self.rules
            .get(target)
            .map(|grants| {
                grants
                    .iter()
                    .filter(|g| g.action == action && g.effect == Effect::Allow)
                    .map(|g| g.subject.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Copies every row of `from` onto `to`, keeping subject, action and effect.
    pub fn copy_target(&mut self, from: &Target, to: &Target) -> usize {
        let grants: Vec<Grant> = self
            .rules
            .get(from)
            .map(|grants| grants.iter().cloned().collect())
            .unwrap_or_default();
        let mut copied = 0;
        for grant in grants {
            let added = self.rules.entry(to.clone()).or_default().insert(grant);
            if self.touch(added) {
                copied += 1;
            }
        }
        copied
    }

    /// Moves every row of `from` to `to`.
    ///
    /// New rows are written before the old ones are dropped.
    pub fn rename_target(&mut self, from: &Target, to: &Target) -> usize {
        if from == to {
            return 0;
        }
        let moved = self.copy_target(from, to);
        if self.rules.remove(from).is_some() {
            self.touch(true);
        }
        moved
    }

    /// Adds a role edge.
    pub fn add_role_edge(&mut self, edge: RoleEdge) -> bool {
        let added = self.edges.entry(edge.member).or_default().insert(edge.role);
        self.touch(added)
    }

    /// Removes a role edge.
    pub fn remove_role_edge(&mut self, edge: &RoleEdge) -> bool {
        let removed = match self.edges.get_mut(&edge.member) {
            Some(roles) => {
                let removed = roles.remove(&edge.role);
                if roles.is_empty() {
                    self.edges.remove(&edge.member);
                }
                removed
            }
            None => false,
        };
        self.touch(removed)
    }

    /// Roles `subject` is a direct member of.
    pub fn direct_roles(&self, subject: &Subject) -> Vec<GroupName> {
        self.edges
            .get(subject)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct members of `role`.
    pub fn members_of(&self, role: &GroupName) -> Vec<Subject> {
        self.edges
            .iter()
            .filter(|(_, roles)| roles.contains(role))
            .map(|(member, _)| member.clone())
            .collect()
    }

    /// Drops every edge touching `role`, as member or as role.
    pub fn remove_role(&mut self, role: &GroupName) -> usize {
        let as_member = Subject::Role(role.clone());
        let mut removed = self
            .edges
            .remove(&as_member)
            .map(|roles| roles.len())
            .unwrap_or(0);
        for member in self.members_of(role) {
            if self.remove_role_edge(&RoleEdge {
                member,
                role: role.clone(),
            }) {
                removed += 1;
            }
        }
        self.touch(removed > 0);
        removed
    }

    /// Rewrites every row and edge mentioning `old` to mention `new`.
    pub fn rename_subject(&mut self, old: &Subject, new: &Subject) -> usize {
        let mut changed = 0;

        for rule in self.policies(&PolicyFilter::any().subject(old.clone())) {
            let renamed = PolicyRule {
                subject: new.clone(),
                ..rule.clone()
            };
            self.add_policy(renamed);
            self.remove_policy(&rule);
            changed += 1;
        }

        if let Some(roles) = self.edges.remove(old) {
            changed += roles.len();
            self.edges.entry(new.clone()).or_default().extend(roles);
        }

        if let (Subject::Role(old_role), Subject::Role(new_role)) = (old, new) {
            for member in self.members_of(old_role) {
                if let Some(roles) = self.edges.get_mut(&member) {
                    roles.remove(old_role);
                    roles.insert(new_role.clone());
                    changed += 1;
                }
            }
        }

        self.touch(changed > 0);
        changed
    }

    /// Transitive role closure of `subject`, excluding the subject itself.
    ///
    /// Traversal is breadth-first with a visited set, so cyclic edges
    /// terminate and every role is reached at its shortest depth. Roles more
    /// than `max_depth` hops away are not expanded.
    pub fn role_closure(&self, subject: &Subject, max_depth: usize) -> Vec<GroupName> {
        let mut visited: HashSet<GroupName> = HashSet::new();
        let mut output = Vec::new();
        let mut queue: VecDeque<(GroupName, usize)> = self
            .direct_roles(subject)
            .into_iter()
            .map(|role| (role, 1))
            .collect();

        while let Some((role, depth)) = queue.pop_front() {
            if depth > max_depth || !visited.insert(role.clone()) {
                continue;
            }
            let parents = self.direct_roles(&Subject::Role(role.clone()));
            output.push(role);
            queue.extend(parents.into_iter().map(|parent| (parent, depth + 1)));
        }

        output
    }

    /// True iff an allow row for `action` on `target` names `subject` or a
    /// role reachable from it.
    pub fn enforce(
        &self,
        subject: &Subject,
        target: &Target,
        action: Action,
        max_depth: usize,
    ) -> bool {
        let Some(grants) = self.rules.get(target) else {
            return false;
        };
        let holders: BTreeSet<&Subject> = grants
            .iter()
            .filter(|g| g.action == action && g.effect == Effect::Allow)
            .map(|g| &g.subject)
            .collect();
        if holders.is_empty() {
            return false;
        }
        if holders.contains(subject) {
            return true;
        }
        self.role_closure(subject, max_depth)
            .into_iter()
            .any(|role| holders.contains(&Subject::Role(role)))
    }

    fn touch(&mut self, changed: bool) -> bool {
        if changed {
            self.revision += 1;
        }
        changed
    }
}

/// Rule evaluator for one scope (a tenant or the master scope).
///
/// Readers work on an immutable snapshot and never block on persistence.
/// Writers are serialized: each write clones the current snapshot, applies
/// the change, persists it through the adapter and only then publishes it.
/// A persistence failure leaves the published state untouched.
pub struct Evaluator {
    scope: PolicyScope,
    adapter: Arc<dyn PolicyAdapter>,
    model: RwLock<Arc<PolicyModel>>,
    writer: Mutex<()>,
    closed: AtomicBool,
    max_role_depth: usize,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("scope", &self.scope)
            .field("max_role_depth", &self.max_role_depth)
            .finish_non_exhaustive()
    }
}

impl Evaluator {
    /// Loads the scope's policy, seeding and persisting it if the adapter
    /// has never stored anything for this scope.
    pub async fn open<F>(
        scope: PolicyScope,
        adapter: Arc<dyn PolicyAdapter>,
        max_role_depth: usize,
        seed: F,
    ) -> Result<Self>
    where
        F: FnOnce(&mut PolicyModel) + Send,
    {
        let model = match adapter.load_policy(&scope).await.map_err(Error::from)? {
            Some(snapshot) => PolicyModel::from_snapshot(snapshot),
            None => {
                let mut model = PolicyModel::new();
                seed(&mut model);
                adapter
                    .save_policy(&scope, &model.to_snapshot())
                    .await
                    .map_err(Error::from)?;
                debug!(%scope, "seeded policy skeleton");
                model
            }
        };

        Ok(Self {
            scope,
            adapter,
            model: RwLock::new(Arc::new(model)),
            writer: Mutex::new(()),
            closed: AtomicBool::new(false),
            max_role_depth,
        })
    }

    /// Scope this evaluator governs.
    pub fn scope(&self) -> &PolicyScope {
        &self.scope
    }

    /// Current published model.
    pub fn snapshot(&self) -> Arc<PolicyModel> {
        self.model.read().clone()
    }

    /// Checks `subject` for `action` on `target`.
    pub fn enforce(&self, subject: &Subject, target: &Target, action: Action) -> bool {
        self.snapshot()
            .enforce(subject, target, action, self.max_role_depth)
    }

    /// Transitive roles of `subject`.
    pub fn roles_of(&self, subject: &Subject) -> Vec<GroupName> {
        self.snapshot().role_closure(subject, self.max_role_depth)
    }

    /// Applies `change` as one unit.
    ///
    /// If `change` fails nothing is written. If the change alters the
    /// model it is persisted before it becomes visible to readers.
    pub async fn update<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut PolicyModel) -> Result<T> + Send,
        T: Send,
    {
        let _guard = self.writer.lock().await;
        self.ensure_open()?;
        let current = self.snapshot();
        let mut next = PolicyModel::clone(&current);
        let output = change(&mut next)?;
        if next.revision == current.revision {
            return Ok(output);
        }
        if let Err(err) = self.adapter.save_policy(&self.scope, &next.to_snapshot()).await {
            warn!(scope = %self.scope, error = %err, "policy persist failed; change discarded");
            return Err(Error::Store(err));
        }
        *self.model.write() = Arc::new(next);
        Ok(output)
    }

    /// Adds one row.
    pub async fn add_policy(&self, rule: PolicyRule) -> Result<bool> {
        self.update(move |model| Ok(model.add_policy(rule))).await
    }

    /// Removes every row passing `filter`.
    pub async fn remove_policies(&self, filter: PolicyFilter) -> Result<usize> {
        self.update(move |model| Ok(model.remove_policies(&filter)))
            .await
    }

    /// Adds a role edge.
    pub async fn add_role_edge(&self, edge: RoleEdge) -> Result<bool> {
        self.update(move |model| Ok(model.add_role_edge(edge))).await
    }

    /// Removes a role edge.
    pub async fn remove_role_edge(&self, edge: RoleEdge) -> Result<bool> {
        self.update(move |model| Ok(model.remove_role_edge(&edge)))
            .await
    }

    /// Writes the published model through the adapter.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.ensure_open()?;
        let snapshot = self.snapshot().to_snapshot();
        self.adapter
            .save_policy(&self.scope, &snapshot)
            .await
            .map_err(Error::from)
    }

    /// Refuses every later write. Waits for an in-flight write to finish.
    pub async fn close(&self) {
        let _guard = self.writer.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        debug!(scope = %self.scope, "evaluator closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::not_found("policy scope", self.scope.to_string()));
        }
        Ok(())
    }

    /// Replaces the published model with the adapter's copy.
    pub async fn load(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        let snapshot = self
            .adapter
            .load_policy(&self.scope)
            .await
            .map_err(Error::from)?
            .unwrap_or_default();
        *self.model.write() = Arc::new(PolicyModel::from_snapshot(snapshot));
        Ok(())
    }
}

/// Evaluator slot that is filled on first use and then kept.
#[derive(Default)]
pub(crate) struct LazyEvaluator {
    slot: RwLock<Option<Arc<Evaluator>>>,
    init: Mutex<()>,
    closed: AtomicBool,
}

impl LazyEvaluator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(evaluator: Arc<Evaluator>) -> Self {
        Self {
            slot: RwLock::new(Some(evaluator)),
            init: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Closes the loaded evaluator, if any, and refuses to load one later.
    pub(crate) async fn close(&self) {
        let _guard = self.init.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        let loaded = self.slot.read().clone();
        if let Some(evaluator) = loaded {
            evaluator.close().await;
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<Arc<Evaluator>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Evaluator>>,
    {
        let loaded = self.slot.read().clone();
        if let Some(evaluator) = loaded {
            return Ok(evaluator);
        }
        let _guard = self.init.lock().await;
        let loaded = self.slot.read().clone();
        if let Some(evaluator) = loaded {
            return Ok(evaluator);
        }
        if self.is_closed() {
            return Err(Error::not_found("policy scope", "closed"));
        }
        let evaluator = Arc::new(init().await?);
        *self.slot.write() = Some(evaluator.clone());
        Ok(evaluator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActorName;

    fn actor(name: &str) -> Subject {
        Subject::Actor(ActorName::try_from(name).unwrap())
    }

    fn role(name: &str) -> GroupName {
        GroupName::try_from(name).unwrap()
    }

    fn roles_target() -> Target {
        Target::container_default("roles")
    }

    #[test]
    fn enforce_should_allow_direct_subject() {
        let mut model = PolicyModel::new();
        model.add_policy(PolicyRule::allow(actor("bob"), roles_target(), Action::Read));

        assert!(model.enforce(&actor("bob"), &roles_target(), Action::Read, 16));
        assert!(!model.enforce(&actor("bob"), &roles_target(), Action::Update, 16));
        assert!(!model.enforce(&actor("alice"), &roles_target(), Action::Read, 16));
    }

    #[test]
    fn enforce_should_follow_nested_roles() {
        let mut model = PolicyModel::new();
        model.add_policy(PolicyRule::allow(
            Subject::Role(role("users")),
            roles_target(),
            Action::Read,
        ));
        model.add_role_edge(RoleEdge::new(role("usag1"), role("users")));
        model.add_role_edge(RoleEdge::new(ActorName::try_from("bob").unwrap(), role("usag1")));

        assert!(model.enforce(&actor("bob"), &roles_target(), Action::Read, 16));
        assert!(!model.enforce(&actor("bob"), &roles_target(), Action::Read, 1));
    }

    #[test]
    fn enforce_should_ignore_deny_rows() {
        let mut model = PolicyModel::new();
        model.add_policy(PolicyRule {
            subject: actor("bob"),
            target: roles_target(),
            action: Action::Read,
            effect: Effect::Deny,
        });

        assert!(!model.enforce(&actor("bob"), &roles_target(), Action::Read, 16));
    }

    #[test]
    fn role_closure_should_terminate_on_cycles() {
        let mut model = PolicyModel::new();
        model.add_role_edge(RoleEdge::new(ActorName::try_from("bob").unwrap(), role("a")));
        model.add_role_edge(RoleEdge::new(role("a"), role("b")));
        model.add_role_edge(RoleEdge::new(role("b"), role("a")));

        let mut closure = model.role_closure(&actor("bob"), 16);
        closure.sort();

        assert_eq!(closure, vec![role("a"), role("b")]);
    }

    #[test]
    fn rename_target_should_move_every_row() {
        let mut model = PolicyModel::new();
        let old = Target::new("containers", "nodes", "web01");
        let new = old.renamed("web02");
        model.add_policy(PolicyRule::allow(actor("bob"), old.clone(), Action::Read));
        model.add_policy(PolicyRule::allow(
            Subject::Role(role("admins")),
            old.clone(),
            Action::Grant,
        ));

        assert_eq!(model.rename_target(&old, &new), 2);
        assert!(model.policies(&PolicyFilter::target(&old)).is_empty());
        assert_eq!(model.policies(&PolicyFilter::target(&new)).len(), 2);
    }

    #[test]
    fn remove_role_should_drop_both_edge_directions() {
        let mut model = PolicyModel::new();
        model.add_role_edge(RoleEdge::new(ActorName::try_from("bob").unwrap(), role("ops")));
        model.add_role_edge(RoleEdge::new(role("ops"), role("users")));

        assert_eq!(model.remove_role(&role("ops")), 2);
        assert!(model.is_empty());
    }

    #[test]
    fn rename_subject_should_rewrite_rows_and_edges() {
        let mut model = PolicyModel::new();
        model.add_policy(PolicyRule::allow(
            Subject::Role(role("ops")),
            roles_target(),
            Action::Read,
        ));
        model.add_role_edge(RoleEdge::new(ActorName::try_from("bob").unwrap(), role("ops")));
        model.add_role_edge(RoleEdge::new(role("ops"), role("users")));

        model.rename_subject(&Subject::Role(role("ops")), &Subject::Role(role("sre")));

        assert!(model.enforce(&actor("bob"), &roles_target(), Action::Read, 16));
        assert_eq!(model.direct_roles(&actor("bob")), vec![role("sre")]);
        assert_eq!(
            model.direct_roles(&Subject::Role(role("sre"))),
            vec![role("users")]
        );
        assert!(model.members_of(&role("ops")).is_empty());
    }

    #[cfg(feature = "memory-store")]
    #[test]
    fn closed_evaluator_refuses_writes_but_keeps_serving_reads() {
        use crate::memory_store::MemoryAdapter;
        use futures::executor::block_on;

        let adapter = MemoryAdapter::new();
        let evaluator = block_on(Evaluator::open(
            PolicyScope::Master,
            Arc::new(adapter.clone()),
            DEFAULT_MAX_ROLE_DEPTH,
            |model| {
                model.add_policy(PolicyRule::allow(actor("bob"), roles_target(), Action::Read));
            },
        ))
        .unwrap();

        block_on(evaluator.close());

        let rule = PolicyRule::allow(actor("alice"), roles_target(), Action::Read);
        assert!(matches!(
            block_on(evaluator.add_policy(rule)),
            Err(Error::NotFound { .. })
        ));
        assert!(block_on(evaluator.persist()).is_err());
        assert!(evaluator.enforce(&actor("bob"), &roles_target(), Action::Read));
        let stored = block_on(adapter.load_policy(&PolicyScope::Master))
            .unwrap()
            .unwrap();
        assert_eq!(stored.rules.len(), 1);
    }

    #[test]
    fn snapshot_round_trip_preserves_state() {
        let mut model = PolicyModel::new();
        model.add_policy(PolicyRule::allow(actor("bob"), roles_target(), Action::Read));
        model.add_role_edge(RoleEdge::new(ActorName::try_from("bob").unwrap(), role("ops")));

        let rebuilt = PolicyModel::from_snapshot(model.to_snapshot());

        assert_eq!(rebuilt.to_snapshot(), model.to_snapshot());
    }
}
