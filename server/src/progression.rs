//! Resident progression counters and their durable storage
//!
//! The [`ProgressionStore`] holds the counters of players whose session lives
//! on this process. It is the only place counters are mutated, and every
//! mutation happens under its write lock so callers can pair a change with the
//! event announcing it.
//!
//! Durable storage sits behind [`PersistenceAdapter`]. Two adapters ship with
//! the node: a file-per-player store for real deployments and an in-memory
//! store for tests and throwaway nodes. [`WriteOrder`] sits in front of either
//! so concurrent writes for one player land oldest first.

use crate::error::StoreError;
use async_trait::async_trait;
use log::debug;
use shared::{PlayerId, ProgressionCounter, ResourceType};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Returns `None` when nothing has been stored for the player yet.
    async fn load(&self, player: PlayerId) -> Result<Option<ProgressionCounter>, StoreError>;

    async fn store(&self, player: PlayerId, counter: &ProgressionCounter) -> Result<(), StoreError>;
}

/// Counters of the players currently loaded on this process
#[derive(Debug, Default)]
pub struct ProgressionStore {
    counters: RwLock<HashMap<PlayerId, ProgressionCounter>>,
}

impl ProgressionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, player: PlayerId, counter: ProgressionCounter) {
        self.counters.write().await.insert(player, counter);
    }

    /// Inserts only if the player is not loaded yet; returns whether it did
    pub async fn insert_if_absent(&self, player: PlayerId, counter: ProgressionCounter) -> bool {
        let mut counters = self.counters.write().await;
        if counters.contains_key(&player) {
            return false;
        }
        counters.insert(player, counter);
        true
    }

    pub async fn remove(&self, player: &PlayerId) -> Option<ProgressionCounter> {
        self.counters.write().await.remove(player)
    }

    pub async fn is_loaded(&self, player: &PlayerId) -> bool {
        self.counters.read().await.contains_key(player)
    }

    /// Snapshot of a player's counter
    pub async fn get(&self, player: &PlayerId) -> Option<ProgressionCounter> {
        self.counters.read().await.get(player).cloned()
    }

    pub async fn amount(&self, player: &PlayerId, resource: ResourceType) -> Option<u64> {
        self.counters
            .read()
            .await
            .get(player)
            .map(|counter| counter.get(resource))
    }

    /// Runs `f` against the player's counter while holding the write lock.
    ///
    /// Returns `None` if the player is not loaded. Nothing else can read any
    /// counter until `f` returns, so `f` must not block.
    pub async fn apply<F, R>(&self, player: &PlayerId, f: F) -> Option<R>
    where
        F: FnOnce(&mut ProgressionCounter) -> R,
    {
        let mut counters = self.counters.write().await;
        counters.get_mut(player).map(f)
    }

    pub async fn len(&self) -> usize {
        self.counters.read().await.len()
    }
}

/// Orders durable writes per player so an older snapshot never replaces a
/// newer one.
///
/// Tickets must be taken while the snapshot is taken, under the
/// [`ProgressionStore`] write lock.
#[derive(Debug, Default)]
pub struct WriteOrder {
    next_ticket: AtomicU64,
    last_written: Mutex<HashMap<PlayerId, Arc<Mutex<u64>>>>,
}

impl WriteOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Writes `counter` unless a snapshot with a later ticket is already
    /// durable. Returns whether the write happened.
    pub async fn store(
        &self,
        persistence: &dyn PersistenceAdapter,
        player: PlayerId,
        ticket: u64,
        counter: &ProgressionCounter,
    ) -> Result<bool, StoreError> {
        let slot = Arc::clone(self.last_written.lock().await.entry(player).or_default());
        let mut last = slot.lock().await;
        if *last > ticket {
            return Ok(false);
        }

        persistence.store(player, counter).await?;
        *last = ticket;
        Ok(true)
    }
}

/// Stores each player's counter as a bincode file named after their id.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, player: PlayerId) -> PathBuf {
        self.dir.join(format!("{}.bin", player))
    }
}

#[async_trait]
impl PersistenceAdapter for FilePersistence {
    async fn load(&self, player: PlayerId) -> Result<Option<ProgressionCounter>, StoreError> {
        match tokio::fs::read(self.path_for(player)).await {
            Ok(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, player: PlayerId, counter: &ProgressionCounter) -> Result<(), StoreError> {
        let bytes = bincode::serialize(counter)?;
        let path = self.path_for(player);
        let tmp = self
            .dir
            .join(format!("{}.{:016x}.tmp", player, rand::random::<u64>()));

        // Rename so a crash never leaves a half-written record behind
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Persisted progression for {} ({} bytes)", player, bytes.len());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: RwLock<HashMap<PlayerId, ProgressionCounter>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stored(&self, player: &PlayerId) -> Option<ProgressionCounter> {
        self.records.read().await.get(player).cloned()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryPersistence {
    async fn load(&self, player: PlayerId) -> Result<Option<ProgressionCounter>, StoreError> {
        Ok(self.records.read().await.get(&player).cloned())
    }

    async fn store(&self, player: PlayerId, counter: &ProgressionCounter) -> Result<(), StoreError> {
        self.records.write().await.insert(player, counter.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn counter_with(resource: ResourceType, amount: u64) -> ProgressionCounter {
        let mut counter = ProgressionCounter::new();
        counter.add(resource, amount);
        counter
    }

    #[tokio::test]
    async fn test_store_apply_requires_loaded_player() {
        let store = ProgressionStore::new();
        let player = PlayerId::random();

        let result = store.apply(&player, |c| c.add(ResourceType::Ore, 1)).await;
        assert!(result.is_none());

        store.insert(player, counter_with(ResourceType::Ore, 5)).await;
        let previous = store.apply(&player, |c| c.add(ResourceType::Ore, 3)).await;

        assert_eq!(previous, Some(5));
        assert_eq!(store.amount(&player, ResourceType::Ore).await, Some(8));
    }

    #[tokio::test]
    async fn test_store_remove() {
        let store = ProgressionStore::new();
        let player = PlayerId::random();

        store.insert(player, ProgressionCounter::new()).await;
        assert!(store.is_loaded(&player).await);
        assert_eq!(store.len().await, 1);

        assert!(store.remove(&player).await.is_some());
        assert!(!store.is_loaded(&player).await);
        assert!(store.remove(&player).await.is_none());
    }

    #[tokio::test]
    async fn test_store_insert_if_absent_keeps_resident_counter() {
        let store = ProgressionStore::new();
        let player = PlayerId::random();

        assert!(store.insert_if_absent(player, counter_with(ResourceType::Coal, 4)).await);
        assert!(!store.insert_if_absent(player, ProgressionCounter::new()).await);
        assert_eq!(store.amount(&player, ResourceType::Coal).await, Some(4));
    }

    #[tokio::test]
    async fn test_file_persistence_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path()).await.unwrap();

        let loaded = assert_ok!(persistence.load(PlayerId::random()).await);
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_file_persistence_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path().join("progression"))
            .await
            .unwrap();
        let player = PlayerId::random();

        assert_ok!(persistence.store(player, &counter_with(ResourceType::Wood, 12)).await);
        assert_ok!(persistence.store(player, &counter_with(ResourceType::Wood, 20)).await);

        let loaded = persistence.load(player).await.unwrap().unwrap();
        assert_eq!(loaded.get(ResourceType::Wood), 20);
    }

    #[tokio::test]
    async fn test_file_persistence_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path()).await.unwrap();
        let player = PlayerId::random();

        std::fs::write(dir.path().join(format!("{}.bin", player)), [0xff; 3]).unwrap();

        match persistence.load(player).await {
            Err(StoreError::Codec(_)) => {}
            other => panic!("Expected codec error, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_persistence_concurrent_stores() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Arc::new(FilePersistence::open(dir.path()).await.unwrap());
        let player = PlayerId::random();

        let writers: Vec<_> = (1..=8)
            .map(|amount| {
                let persistence = Arc::clone(&persistence);
                tokio::spawn(async move {
                    persistence
                        .store(player, &counter_with(ResourceType::Ore, amount))
                        .await
                })
            })
            .collect();

        for writer in writers {
            assert_ok!(writer.await.unwrap());
        }

        let loaded = persistence.load(player).await.unwrap().unwrap();
        assert!((1..=8).contains(&loaded.get(ResourceType::Ore)));

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().map_or(false, |ext| ext == "tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_write_order_skips_stale_snapshot() {
        let order = WriteOrder::new();
        let persistence = MemoryPersistence::new();
        let player = PlayerId::random();

        let older = order.ticket();
        let newer = order.ticket();

        assert!(assert_ok!(
            order
                .store(&persistence, player, newer, &counter_with(ResourceType::Sand, 2))
                .await
        ));
        assert!(!assert_ok!(
            order
                .store(&persistence, player, older, &counter_with(ResourceType::Sand, 1))
                .await
        ));

        assert_eq!(
            persistence.stored(&player).await,
            Some(counter_with(ResourceType::Sand, 2))
        );
    }

    #[tokio::test]
    async fn test_write_order_is_per_player() {
        let order = WriteOrder::new();
        let persistence = MemoryPersistence::new();
        let p = PlayerId::random();
        let q = PlayerId::random();

        let for_p = order.ticket();
        let for_q = order.ticket();

        assert!(assert_ok!(order.store(&persistence, q, for_q, &ProgressionCounter::new()).await));
        assert!(assert_ok!(order.store(&persistence, p, for_p, &ProgressionCounter::new()).await));
    }

    #[tokio::test]
    async fn test_memory_persistence() {
        let persistence = MemoryPersistence::new();
        let player = PlayerId::random();

        assert!(persistence.load(player).await.unwrap().is_none());
        assert_ok!(persistence.store(player, &counter_with(ResourceType::Fish, 2)).await);
        assert_eq!(
            persistence.stored(&player).await,
            Some(counter_with(ResourceType::Fish, 2))
        );
    }
}
