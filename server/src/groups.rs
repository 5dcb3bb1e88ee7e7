//! Cooperative group membership

use crate::error::StoreError;
use async_trait::async_trait;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use shared::{GroupId, PlayerId};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Durable coop membership.
///
/// Implementations serialize writes per call; `remove_member` must be
/// idempotent so concurrent prunes of the same member are harmless.
#[async_trait]
pub trait GroupRegistry: Send + Sync {
    async fn group_of(&self, player: PlayerId) -> Option<GroupId>;

    async fn members(&self, group: GroupId) -> HashSet<PlayerId>;

    /// Returns true if the member was present and has been removed
    async fn remove_member(&self, group: GroupId, player: PlayerId) -> bool;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Groups {
    members: HashMap<GroupId, HashSet<PlayerId>>,
    index: HashMap<PlayerId, GroupId>,
}

impl Groups {
    fn create(&mut self, members: impl IntoIterator<Item = PlayerId>) -> GroupId {
        let group = GroupId::random();
        let mut set = HashSet::new();

        for player in members {
            if let Some(old) = self.index.insert(player, group) {
                if let Some(old_members) = self.members.get_mut(&old) {
                    old_members.remove(&player);
                }
            }
            set.insert(player);
        }

        info!("Created group {} with {} members", group, set.len());
        self.members.insert(group, set);
        group
    }

    fn group_of(&self, player: PlayerId) -> Option<GroupId> {
        self.index.get(&player).copied()
    }

    fn members(&self, group: GroupId) -> HashSet<PlayerId> {
        self.members.get(&group).cloned().unwrap_or_default()
    }

    fn remove(&mut self, group: GroupId, player: PlayerId) -> bool {
        let removed = self
            .members
            .get_mut(&group)
            .map(|members| members.remove(&player))
            .unwrap_or(false);

        if removed && self.index.get(&player) == Some(&group) {
            self.index.remove(&player);
        }
        removed
    }
}

#[derive(Debug, Default)]
pub struct MemoryGroupRegistry {
    groups: RwLock<Groups>,
}

impl MemoryGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a group from `members`.
    ///
    /// Players already in another group are moved out of it first, keeping
    /// each player in at most one group.
    pub async fn create_group(&self, members: impl IntoIterator<Item = PlayerId>) -> GroupId {
        self.groups.write().await.create(members)
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.members.len()
    }
}

#[async_trait]
impl GroupRegistry for MemoryGroupRegistry {
    async fn group_of(&self, player: PlayerId) -> Option<GroupId> {
        self.groups.read().await.group_of(player)
    }

    async fn members(&self, group: GroupId) -> HashSet<PlayerId> {
        self.groups.read().await.members(group)
    }

    async fn remove_member(&self, group: GroupId, player: PlayerId) -> bool {
        self.groups.write().await.remove(group, player)
    }
}

/// Membership kept in memory and written through to one bincode file.
///
/// Each write replaces the whole file while the write lock is held, so the
/// file always holds the latest membership. The file belongs to one process.
#[derive(Debug)]
pub struct FileGroupRegistry {
    path: PathBuf,
    groups: RwLock<Groups>,
}

impl FileGroupRegistry {
    /// Opens the registry at `path`, starting empty if the file does not exist
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let groups = match tokio::fs::read(&path).await {
            Ok(bytes) => bincode::deserialize(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Groups::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            groups: RwLock::new(groups),
        })
    }

    pub async fn create_group(
        &self,
        members: impl IntoIterator<Item = PlayerId>,
    ) -> Result<GroupId, StoreError> {
        let mut groups = self.groups.write().await;
        let group = groups.create(members);
        self.write(&groups).await?;
        Ok(group)
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.members.len()
    }

    async fn write(&self, groups: &Groups) -> Result<(), StoreError> {
        let bytes = bincode::serialize(groups)?;
        let tmp = self.path.with_extension(format!("{:016x}.tmp", rand::random::<u64>()));

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Wrote {} groups to {}", groups.members.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl GroupRegistry for FileGroupRegistry {
    async fn group_of(&self, player: PlayerId) -> Option<GroupId> {
        self.groups.read().await.group_of(player)
    }

    async fn members(&self, group: GroupId) -> HashSet<PlayerId> {
        self.groups.read().await.members(group)
    }

    async fn remove_member(&self, group: GroupId, player: PlayerId) -> bool {
        let mut groups = self.groups.write().await;
        let removed = groups.remove(group, player);

        if removed {
            if let Err(e) = self.write(&groups).await {
                error!(
                    "Removed {} from group {} but could not write {}: {}",
                    player,
                    group,
                    self.path.display(),
                    e
                );
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_group_indexes_members() {
        let registry = MemoryGroupRegistry::new();
        let p = PlayerId::random();
        let q = PlayerId::random();

        let group = registry.create_group([p, q]).await;

        assert_eq!(registry.group_of(p).await, Some(group));
        assert_eq!(registry.group_of(q).await, Some(group));
        assert_eq!(registry.members(group).await, HashSet::from([p, q]));
        assert_eq!(registry.group_of(PlayerId::random()).await, None);
    }

    #[tokio::test]
    async fn test_player_moves_to_new_group() {
        let registry = MemoryGroupRegistry::new();
        let p = PlayerId::random();
        let q = PlayerId::random();

        let first = registry.create_group([p, q]).await;
        let second = registry.create_group([p]).await;

        assert_eq!(registry.group_of(p).await, Some(second));
        assert_eq!(registry.members(first).await, HashSet::from([q]));
        assert_eq!(registry.group_count().await, 2);
    }

    #[tokio::test]
    async fn test_remove_member_is_idempotent() {
        let registry = MemoryGroupRegistry::new();
        let p = PlayerId::random();
        let s = PlayerId::random();
        let group = registry.create_group([p, s]).await;

        assert!(registry.remove_member(group, s).await);
        assert!(!registry.remove_member(group, s).await);

        assert_eq!(registry.members(group).await, HashSet::from([p]));
        assert_eq!(registry.group_of(s).await, None);
    }

    #[tokio::test]
    async fn test_unknown_group_is_empty() {
        let registry = MemoryGroupRegistry::new();
        let group = GroupId::random();

        assert!(registry.members(group).await.is_empty());
        assert!(!registry.remove_member(group, PlayerId::random()).await);
    }

    #[tokio::test]
    async fn test_file_registry_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.bin");
        let p = PlayerId::random();
        let s = PlayerId::random();

        let registry = FileGroupRegistry::open(&path).await.unwrap();
        assert_eq!(registry.group_count().await, 0);
        let group = registry.create_group([p, s]).await.unwrap();
        assert!(registry.remove_member(group, s).await);
        drop(registry);

        let reopened = FileGroupRegistry::open(&path).await.unwrap();
        assert_eq!(reopened.group_count().await, 1);
        assert_eq!(reopened.members(group).await, HashSet::from([p]));
        assert_eq!(reopened.group_of(p).await, Some(group));
        assert_eq!(reopened.group_of(s).await, None);
    }

    #[tokio::test]
    async fn test_file_registry_concurrent_removals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.bin");
        let players: Vec<PlayerId> = (0..6).map(|_| PlayerId::random()).collect();

        let registry = std::sync::Arc::new(FileGroupRegistry::open(&path).await.unwrap());
        let group = registry.create_group(players.iter().copied()).await.unwrap();

        let removals: Vec<_> = players[1..]
            .iter()
            .map(|player| {
                let registry = std::sync::Arc::clone(&registry);
                let player = *player;
                tokio::spawn(async move { registry.remove_member(group, player).await })
            })
            .collect();
        for removal in removals {
            assert!(removal.await.unwrap());
        }

        let reopened = FileGroupRegistry::open(&path).await.unwrap();
        assert_eq!(reopened.members(group).await, HashSet::from([players[0]]));
    }

    #[tokio::test]
    async fn test_file_registry_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.bin");
        std::fs::write(&path, [0xff; 3]).unwrap();

        match FileGroupRegistry::open(&path).await {
            Err(StoreError::Codec(_)) => {}
            other => panic!("Expected codec error, got {:?}", other.map(|_| ())),
        }
    }
}
