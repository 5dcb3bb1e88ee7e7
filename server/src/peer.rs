//! UDP link to the other processes of the cluster
//!
//! One [`PeerLink`] is both the inter-process channel used by the remote
//! notifier and the cross-process session directory used by the locator.
//! It shares the node's socket; the node's receive task hands session
//! replies back through [`PeerLink::complete`].

use crate::error::{ChannelError, DirectoryError};
use crate::locator::{DirectoryEntry, SessionDirectory};
use crate::notifier::InterProcessChannel;
use async_trait::async_trait;
use log::{trace, warn};
use shared::{Packet, PlayerId, ProcessId};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

type ReplySender = mpsc::UnboundedSender<(ProcessId, bool)>;

pub struct PeerLink {
    socket: Arc<UdpSocket>,
    peers: HashMap<ProcessId, SocketAddr>,
    pending: Mutex<HashMap<u64, ReplySender>>,
    next_request: AtomicU64,
    reply_timeout: Duration,
}

impl PeerLink {
    pub fn new(
        socket: Arc<UdpSocket>,
        peers: HashMap<ProcessId, SocketAddr>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            socket,
            peers,
            pending: Mutex::new(HashMap::new()),
            // Random start keeps ids from a restarted node apart from stale replies
            next_request: AtomicU64::new(rand::random()),
            reply_timeout,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn process_for_addr(&self, addr: SocketAddr) -> Option<ProcessId> {
        self.peers
            .iter()
            .find(|(_, peer_addr)| **peer_addr == addr)
            .map(|(process, _)| *process)
    }

    /// Routes a session reply to the lookup waiting on it.
    ///
    /// Replies from unknown addresses or for finished lookups are dropped.
    pub async fn complete(&self, request_id: u64, from: SocketAddr, online: bool) {
        let Some(process) = self.process_for_addr(from) else {
            warn!("Ignoring session reply from unknown peer {}", from);
            return;
        };

        let mut pending = self.pending.lock().await;
        let abandoned = match pending.get(&request_id) {
            Some(tx) => tx.send((process, online)).is_err(),
            None => {
                trace!("Late session reply {} from {}", request_id, process);
                false
            }
        };

        // The caller gave up on this lookup before the reply arrived
        if abandoned {
            pending.remove(&request_id);
        }
    }

    async fn collect_replies(
        &self,
        rx: &mut mpsc::UnboundedReceiver<(ProcessId, bool)>,
    ) -> Result<DirectoryEntry, DirectoryError> {
        let mut offline = HashSet::new();

        while let Some((process, online)) = rx.recv().await {
            if online {
                return Ok(DirectoryEntry::Online(process));
            }
            offline.insert(process);
            if offline.len() == self.peers.len() {
                return Ok(DirectoryEntry::Offline);
            }
        }

        Err(DirectoryError::Transport("reply channel closed".to_string()))
    }
}

#[async_trait]
impl SessionDirectory for PeerLink {
    /// Asks every peer at once. Offline only when all of them said so.
    async fn lookup(&self, player: PlayerId) -> Result<DirectoryEntry, DirectoryError> {
        if self.peers.is_empty() {
            return Ok(DirectoryEntry::Offline);
        }

        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let bytes = Packet::SessionQuery { request_id, player }
            .encode()
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.pending.lock().await.insert(request_id, tx);

        for (process, addr) in &self.peers {
            if let Err(e) = self.socket.send_to(&bytes, *addr).await {
                warn!("Session query to {} failed: {}", process, e);
            }
        }

        let outcome = timeout(self.reply_timeout, self.collect_replies(&mut rx)).await;
        self.pending.lock().await.remove(&request_id);

        match outcome {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout),
        }
    }
}

#[async_trait]
impl InterProcessChannel for PeerLink {
    async fn send(&self, process: ProcessId, packet: Packet) -> Result<(), ChannelError> {
        let addr = self
            .peers
            .get(&process)
            .copied()
            .ok_or(ChannelError::UnknownProcess(process))?;

        let bytes = packet.encode()?;
        self.socket.send_to(&bytes, addr).await?;
        Ok(())
    }
}
