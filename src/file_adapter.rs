//! Policy adapter persisting each scope as a text file.

use crate::error::StoreError;
use crate::policy::{PolicyCodec, PolicySnapshot};
use crate::store::{PolicyAdapter, PolicyScope};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const POLICY_EXTENSION: &str = "policy";

/// Stores `master.policy` and `orgs/<org>.policy` under a root directory.
///
/// Files use the row-oriented text form of [`PolicyCodec`]. Every save
/// writes a temporary sibling and renames it over the old file, so a
/// reader never sees a half-written policy. I/O goes through `tokio::fs`
/// and therefore needs a Tokio runtime.
#[derive(Clone, Debug)]
pub struct FileAdapter {
    root: PathBuf,
    codec: PolicyCodec,
}

impl FileAdapter {
    /// Creates an adapter using the default role prefix.
    ///
    /// [`crate::AuthzBuilder`] replaces the codec with one built from its
    /// configured prefix.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_codec(root, PolicyCodec::default())
    }

    /// Creates an adapter with an explicit codec.
    pub fn with_codec(root: impl Into<PathBuf>, codec: PolicyCodec) -> Self {
        Self {
            root: root.into(),
            codec,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn codec(&self) -> &PolicyCodec {
        &self.codec
    }

    /// File backing `scope`.
    pub fn path_for(&self, scope: &PolicyScope) -> PathBuf {
        match scope {
            PolicyScope::Master => self.root.join(format!("master.{POLICY_EXTENSION}")),
            PolicyScope::Org(org) => self
                .root
                .join("orgs")
                .join(format!("{org}.{POLICY_EXTENSION}")),
        }
    }
}

#[async_trait]
impl PolicyAdapter for FileAdapter {
    async fn load_policy(
        &self,
        scope: &PolicyScope,
    ) -> std::result::Result<Option<PolicySnapshot>, StoreError> {
        let path = self.path_for(scope);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(self.codec.decode(&text)?))
    }

    async fn save_policy(
        &self,
        scope: &PolicyScope,
        snapshot: &PolicySnapshot,
    ) -> std::result::Result<(), StoreError> {
        let path = self.path_for(scope);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = path.with_extension(format!("{POLICY_EXTENSION}.tmp"));
        fs::write(&temp, self.codec.encode(snapshot)).await?;
        fs::rename(&temp, &path).await?;
        debug!(%scope, path = %path.display(), "policy written");
        Ok(())
    }

    async fn delete_policy(&self, scope: &PolicyScope) -> std::result::Result<(), StoreError> {
        match fs::remove_file(self.path_for(scope)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn use_codec(&mut self, codec: PolicyCodec) {
        self.codec = codec;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::policy::{PolicyRule, RoleEdge, Subject};
    use crate::taxonomy::Target;
    use crate::types::{ActorName, GroupName, OrgName};

    fn snapshot() -> PolicySnapshot {
        PolicySnapshot {
            rules: vec![PolicyRule::allow(
                Subject::Role(GroupName::try_from("admins").unwrap()),
                Target::container_default("nodes"),
                Action::Update,
            )],
            edges: vec![RoleEdge::new(
                ActorName::try_from("test1").unwrap(),
                GroupName::try_from("admins").unwrap(),
            )],
        }
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileAdapter::new(dir.path());

        assert!(adapter.load_policy(&PolicyScope::Master).await.unwrap().is_none());
        adapter.delete_policy(&PolicyScope::Master).await.unwrap();
    }

    #[tokio::test]
    async fn save_writes_text_rows_and_loads_them_back() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileAdapter::new(dir.path());
        let scope = PolicyScope::Org(OrgName::try_from("acme").unwrap());

        adapter.save_policy(&scope, &snapshot()).await.unwrap();

        let path = dir.path().join("orgs").join("acme.policy");
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("p, role##admins, nodes, containers, $$default$$, update, allow"));
        assert!(text.contains("g, test1, role##admins"));
        assert!(!path.with_extension("policy.tmp").exists());
        assert_eq!(adapter.load_policy(&scope).await.unwrap(), Some(snapshot()));

        adapter.delete_policy(&scope).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileAdapter::new(dir.path());
        std::fs::write(dir.path().join("master.policy"), "p, only, three\n").unwrap();

        assert!(adapter.load_policy(&PolicyScope::Master).await.is_err());
    }

    #[tokio::test]
    async fn adopted_codec_controls_role_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let mut adapter = FileAdapter::new(dir.path());
        adapter.use_codec(PolicyCodec::new("grp:"));

        adapter.save_policy(&PolicyScope::Master, &snapshot()).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("master.policy")).unwrap();
        assert!(text.contains("g, test1, grp:admins"));
        assert!(!text.contains("role##"));
        assert_eq!(
            adapter.load_policy(&PolicyScope::Master).await.unwrap(),
            Some(snapshot())
        );
    }

    #[cfg(feature = "memory-store")]
    #[tokio::test]
    async fn item_names_that_break_rows_are_never_persisted() {
        use crate::acl::Member;
        use crate::actor::{Actor, User};
        use crate::authz::AuthzBuilder;
        use crate::checker::PermissionChecker;
        use crate::error::Error;
        use crate::memory_store::MemoryStore;
        use crate::taxonomy::ItemRef;

        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let bob = ActorName::try_from("bob").unwrap();
        let member = Member::Actor(bob.clone());
        {
            let authz = AuthzBuilder::new(store.clone(), FileAdapter::new(dir.path())).build();
            let org = authz.create_org("acme", None, None).await.unwrap();

            for item in [
                ItemRef::new("nodes", "web01,evil"),
                ItemRef::new("nodes", " web01"),
                ItemRef::new("no,des", "web01"),
            ] {
                assert!(matches!(
                    org.edit_item_perm(&item, &member, &["read"], "add").await,
                    Err(Error::InvalidId(_))
                ));
                assert!(matches!(
                    org.create_item_acl(&item, None).await,
                    Err(Error::InvalidId(_))
                ));
                assert!(matches!(
                    org.edit_from_json_str(&item, r#"{"read": {"actors": ["bob"]}}"#).await,
                    Err(Error::InvalidId(_))
                ));
            }
            let node = ItemRef::new("nodes", "web01");
            org.edit_item_perm(&node, &member, &["read"], "add").await.unwrap();
            assert!(matches!(
                org.rename_item_acl(&node, "web02,evil").await,
                Err(Error::InvalidId(_))
            ));
        }

        let authz = AuthzBuilder::new(store, FileAdapter::new(dir.path())).build();
        let org = authz.get_org("acme").await.unwrap();
        let bob = Actor::from(User::new(bob));
        assert!(
            org.check_item_perm(&ItemRef::new("nodes", "web01"), &bob, "read")
                .await
                .unwrap()
        );
        assert!(!org.check_container_perm(&bob, "nodes", "read").await.unwrap());
    }
}
