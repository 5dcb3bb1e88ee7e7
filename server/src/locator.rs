//! Resolving where a coop member's session currently lives
//!
//! Resolution always starts with the sessions hosted on this node. Only when
//! the member is not here does the locator ask the cross-process directory,
//! bounded by the configured lookup timeout.
//!
//! A directory that fails or times out never produces [`SessionLocation::Absent`].
//! Absence is reserved for an explicit "offline everywhere" answer, since an
//! absent member is pruned from their group.

use crate::error::DirectoryError;
use crate::session_manager::SessionManager;
use async_trait::async_trait;
use log::{debug, warn};
use shared::{PlayerId, ProcessId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;

/// Authoritative answer from the cross-process directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryEntry {
    Online(ProcessId),
    Offline,
}

#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn lookup(&self, player: PlayerId) -> Result<DirectoryEntry, DirectoryError>;
}

/// Where a member's session is, as seen by a single lookup.
///
/// Never cached: membership and connectivity can change between two
/// synchronization operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLocation {
    Local,
    Remote(ProcessId),
    /// The directory could not answer; the member may well be online
    Unreachable,
    /// Authoritatively offline on every process
    Absent,
}

pub struct SessionLocator {
    sessions: Arc<RwLock<SessionManager>>,
    directory: Arc<dyn SessionDirectory>,
    lookup_timeout: Duration,
}

impl SessionLocator {
    pub fn new(
        sessions: Arc<RwLock<SessionManager>>,
        directory: Arc<dyn SessionDirectory>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            directory,
            lookup_timeout,
        }
    }

    pub async fn is_local(&self, member: &PlayerId) -> bool {
        self.sessions.read().await.contains(member)
    }

    pub async fn resolve(&self, member: PlayerId) -> SessionLocation {
        if self.is_local(&member).await {
            return SessionLocation::Local;
        }

        match timeout(self.lookup_timeout, self.directory.lookup(member)).await {
            Ok(Ok(DirectoryEntry::Online(process))) => SessionLocation::Remote(process),
            Ok(Ok(DirectoryEntry::Offline)) => SessionLocation::Absent,
            Ok(Err(e)) => {
                warn!("Directory lookup for {} failed: {}", member, e);
                SessionLocation::Unreachable
            }
            Err(_) => {
                warn!(
                    "Directory lookup for {} timed out after {:?}",
                    member, self.lookup_timeout
                );
                SessionLocation::Unreachable
            }
        }
    }

    /// Liveness re-check before a member is treated as gone for good.
    ///
    /// Performs a fresh resolution; only another `Absent` confirms.
    pub async fn confirm_absent(&self, member: PlayerId) -> bool {
        let location = self.resolve(member).await;
        debug!("Liveness re-check for {}: {:?}", member, location);
        location == SessionLocation::Absent
    }
}
