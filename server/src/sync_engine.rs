//! Collection progression and coop synchronization
//!
//! [`CollectionSyncEngine::record_production`] is the single entry point for a
//! resource-producing action. Its steps, in order:
//!
//! 1. Reject a zero amount and players whose counters are not resident.
//! 2. Add the amount and publish the local update under one write lock, so no
//!    in-process observer sees one without the other.
//! 3. Fan the update out to the producer's coop. Members on this node hear
//!    about it right away; everyone else is resolved in spawned tasks that
//!    notify remote processes or prune members that are confirmed offline
//!    everywhere.
//! 4. Write the counter through the persistence adapter. A failed write is
//!    returned to the caller but never undoes step 2.
//!
//! Nothing in step 3 waits on step 4. Callers that must not wait on storage
//! at all use [`CollectionSyncEngine::begin_production`] and commit the
//! returned [`PendingWrite`] elsewhere.
//!
//! Spawned continuations never touch the in-memory counter and never report
//! back to the caller.

use crate::error::SyncError;
use crate::event_bus::LocalEventBus;
use crate::groups::GroupRegistry;
use crate::locator::{SessionLocation, SessionLocator};
use crate::notifier::RemoteNotifier;
use crate::progression::{PersistenceAdapter, ProgressionStore, WriteOrder};
use log::{debug, error, info, warn};
use shared::{CollectionUpdateNotification, GroupId, PlayerId, ProgressionCounter, ResourceType};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Collaborators a member-delivery task needs once it leaves the caller
#[derive(Clone)]
struct Delivery {
    bus: Arc<LocalEventBus>,
    groups: Arc<dyn GroupRegistry>,
    locator: Arc<SessionLocator>,
    notifier: Arc<RemoteNotifier>,
}

impl Delivery {
    async fn reach_member(self, group: GroupId, member: PlayerId, update: CollectionUpdateNotification) {
        let addressed = update.for_subject(member);

        match self.locator.resolve(member).await {
            SessionLocation::Local => self.bus.publish(addressed),
            SessionLocation::Remote(process) => {
                self.notifier.notify(process, addressed).await;
            }
            SessionLocation::Unreachable => {
                debug!("Skipping {}: session location unknown", member);
            }
            SessionLocation::Absent => self.prune(group, member).await,
        }
    }

    async fn prune(&self, group: GroupId, member: PlayerId) {
        if !self.locator.confirm_absent(member).await {
            debug!("Keeping {} in group {}: liveness re-check did not confirm", member, group);
            return;
        }

        if self.groups.remove_member(group, member).await {
            info!("Pruned absent member {} from group {}", member, group);
        } else {
            debug!("Member {} already gone from group {}", member, group);
        }
    }
}

/// A counter snapshot that still has to be made durable
#[must_use = "the snapshot is not persisted until committed"]
pub struct PendingWrite {
    player: PlayerId,
    ticket: u64,
    snapshot: ProgressionCounter,
    persistence: Arc<dyn PersistenceAdapter>,
    order: Arc<WriteOrder>,
}

impl PendingWrite {
    /// Writes the snapshot. A snapshot already superseded on disk is skipped.
    pub async fn commit(self) -> Result<(), SyncError> {
        match self
            .order
            .store(self.persistence.as_ref(), self.player, self.ticket, &self.snapshot)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!("Skipped superseded progression write for {}", self.player);
                Ok(())
            }
            Err(e) => {
                warn!("Progression write for {} failed: {}", self.player, e);
                Err(e.into())
            }
        }
    }
}

pub struct CollectionSyncEngine {
    progression: Arc<ProgressionStore>,
    persistence: Arc<dyn PersistenceAdapter>,
    writes: Arc<WriteOrder>,
    delivery: Delivery,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl CollectionSyncEngine {
    pub fn new(
        progression: Arc<ProgressionStore>,
        persistence: Arc<dyn PersistenceAdapter>,
        bus: Arc<LocalEventBus>,
        groups: Arc<dyn GroupRegistry>,
        locator: Arc<SessionLocator>,
        notifier: Arc<RemoteNotifier>,
    ) -> Self {
        Self {
            progression,
            persistence,
            writes: Arc::new(WriteOrder::new()),
            delivery: Delivery {
                bus,
                groups,
                locator,
                notifier,
            },
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn progression(&self) -> &Arc<ProgressionStore> {
        &self.progression
    }

    pub fn bus(&self) -> &Arc<LocalEventBus> {
        &self.delivery.bus
    }

    /// Makes a player's counters resident, starting from zero if none are stored
    pub async fn load_player(&self, player: PlayerId) -> Result<(), SyncError> {
        if self.progression.is_loaded(&player).await {
            return Ok(());
        }

        let counter = self.persistence.load(player).await?.unwrap_or_default();
        if self.progression.insert_if_absent(player, counter).await {
            debug!("Loaded progression for {}", player);
        }
        Ok(())
    }

    /// Flushes and evicts a player's counters. Unknown players are a no-op.
    ///
    /// The counter is evicted even if the flush fails.
    pub async fn unload_player(&self, player: PlayerId) -> Result<(), SyncError> {
        match self.progression.remove(&player).await {
            Some(counter) => {
                // Taken after eviction, so it outranks any production's snapshot
                let ticket = self.writes.ticket();
                self.writes
                    .store(self.persistence.as_ref(), player, ticket, &counter)
                    .await?;
                debug!("Unloaded progression for {}", player);
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub async fn record_production(
        &self,
        player: PlayerId,
        resource: ResourceType,
        amount: u64,
    ) -> Result<(), SyncError> {
        self.begin_production(player, resource, amount)
            .await?
            .commit()
            .await
    }

    /// Applies a production and starts its fan-out, handing the durable write
    /// back to the caller.
    pub async fn begin_production(
        &self,
        player: PlayerId,
        resource: ResourceType,
        amount: u64,
    ) -> Result<PendingWrite, SyncError> {
        if amount == 0 {
            return Err(SyncError::InvalidArgument);
        }

        let bus = &self.delivery.bus;
        let writes = &self.writes;
        let (previous, ticket, snapshot) = self
            .progression
            .apply(&player, |counter| {
                let previous = counter.add(resource, amount);
                bus.publish(CollectionUpdateNotification::new(Some(player), resource, previous));
                (previous, writes.ticket(), counter.clone())
            })
            .await
            .ok_or(SyncError::NotLoaded(player))?;

        debug!("{} produced {} {} (was {})", player, amount, resource, previous);

        self.fan_out(player, resource, previous).await;

        Ok(PendingWrite {
            player,
            ticket,
            snapshot,
            persistence: Arc::clone(&self.persistence),
            order: Arc::clone(&self.writes),
        })
    }

    async fn fan_out(&self, player: PlayerId, resource: ResourceType, previous: u64) {
        let Some(group) = self.delivery.groups.group_of(player).await else {
            return;
        };

        let update = CollectionUpdateNotification::new(Some(player), resource, previous);
        let members = self.delivery.groups.members(group).await;
        let mut spawned = Vec::new();

        for member in members.into_iter().filter(|member| *member != player) {
            if self.delivery.locator.is_local(&member).await {
                self.delivery.bus.publish(update.for_subject(member));
                continue;
            }

            let delivery = self.delivery.clone();
            spawned.push(tokio::spawn(delivery.reach_member(group, member, update)));
        }

        if !spawned.is_empty() {
            let mut pending = self.pending.lock().await;
            pending.retain(|handle| !handle.is_finished());
            pending.extend(spawned);
        }
    }

    /// Waits until every spawned fan-out continuation has finished
    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.pending.lock().await);
            if handles.is_empty() {
                return;
            }

            for handle in handles {
                if let Err(e) = handle.await {
                    error!("Fan-out task failed: {}", e);
                }
            }
        }
    }
}
