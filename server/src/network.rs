//! Node network layer handling UDP traffic and session bookkeeping

use crate::config::SyncConfig;
use crate::event_bus::LocalEventBus;
use crate::groups::GroupRegistry;
use crate::locator::SessionLocator;
use crate::notifier::RemoteNotifier;
use crate::peer::PeerLink;
use crate::progression::{PersistenceAdapter, ProgressionStore};
use crate::session_manager::{JoinOutcome, SessionManager};
use crate::sync_engine::CollectionSyncEngine;
use log::{debug, error, info, warn};
use shared::{
    CollectionUpdateNotification, Packet, PlayerId, ProcessId, ResourceType, MAX_PACKET_SIZE,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, RwLock};

pub type NodeResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Messages sent from network tasks to the main node loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    SessionTimeout { player: PlayerId },
    Shutdown,
}

/// Everything a node needs besides its socket
pub struct NodeOptions {
    pub process: ProcessId,
    pub peers: HashMap<ProcessId, SocketAddr>,
    pub max_sessions: usize,
    pub config: SyncConfig,
    pub persistence: Arc<dyn PersistenceAdapter>,
    pub groups: Arc<dyn GroupRegistry>,
}

/// One server process: hosts sessions, records production and talks to peers
pub struct NodeServer {
    process: ProcessId,
    socket: Arc<UdpSocket>,
    sessions: Arc<RwLock<SessionManager>>,
    peers: Arc<PeerLink>,
    engine: Arc<CollectionSyncEngine>,
    config: SyncConfig,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl NodeServer {
    pub async fn bind(addr: &str, options: NodeOptions) -> NodeResult<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        let config = options.config;
        let sessions = Arc::new(RwLock::new(SessionManager::new(options.max_sessions)));
        let peers = Arc::new(PeerLink::new(
            Arc::clone(&socket),
            options.peers,
            config.lookup_timeout,
        ));
        info!(
            "Node {} listening on {} with {} peers",
            options.process,
            socket.local_addr()?,
            peers.peer_count()
        );

        let locator = Arc::new(SessionLocator::new(
            Arc::clone(&sessions),
            peers.clone(),
            config.lookup_timeout,
        ));
        let notifier = Arc::new(RemoteNotifier::new(peers.clone(), config.delivery_timeout));
        let engine = Arc::new(CollectionSyncEngine::new(
            Arc::new(ProgressionStore::new()),
            options.persistence,
            Arc::new(LocalEventBus::new()),
            options.groups,
            locator,
            notifier,
        ));

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(NodeServer {
            process: options.process,
            socket,
            sessions,
            peers,
            engine,
            config,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn process(&self) -> ProcessId {
        self.process
    }

    pub fn engine(&self) -> Arc<CollectionSyncEngine> {
        Arc::clone(&self.engine)
    }

    pub fn sessions(&self) -> Arc<RwLock<SessionManager>> {
        Arc::clone(&self.sessions)
    }

    /// Sender that can stop a running node with [`ServerMessage::Shutdown`]
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let peers = Arc::clone(&self.peers);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Packet::decode(&buffer[..len]) {
                        // Replies go straight to the waiting lookup
                        Ok(Packet::SessionReply {
                            request_id, online, ..
                        }) => {
                            peers.complete(request_id, addr, online).await;
                        }
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(_) => warn!("Failed to deserialize packet from {}", addr),
                    },
                    Err(e) => {
                        // ICMP errors from a peer that went away surface here
                        debug!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that monitors session timeouts
    fn spawn_timeout_checker(&self) {
        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();
        let sweep_interval = self.config.sweep_interval;
        let session_timeout = self.config.session_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut sessions_guard = sessions.write().await;
                    sessions_guard.check_timeouts(session_timeout)
                };

                for player in timed_out {
                    if server_tx.send(ServerMessage::SessionTimeout { player }).is_err() {
                        return;
                    }
                }
            }
        });
    }

    /// Spawns task that forwards local bus updates to each session's front-end
    fn spawn_session_forwarder(&self) {
        let socket = Arc::clone(&self.socket);
        let sessions = Arc::clone(&self.sessions);
        let mut events = self.engine.bus().subscribe();

        tokio::spawn(async move {
            loop {
                let notification = match events.recv().await {
                    Ok(notification) => notification,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Session forwarder skipped {} updates", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let Some(subject) = notification.subject else {
                    continue;
                };

                let addr = {
                    let sessions_guard = sessions.read().await;
                    sessions_guard.addr_of(&subject)
                };

                if let Some(addr) = addr {
                    if let Err(e) = Self::send_packet_impl(
                        &socket,
                        &Packet::CollectionUpdate { notification },
                        addr,
                    )
                    .await
                    {
                        warn!("Failed to forward update to {}: {}", subject, e);
                    }
                }
            }
        });
    }

    async fn send_packet_impl(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) -> NodeResult<()> {
        let data = packet.encode()?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Processes incoming packets from front-ends and peers
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Join { player } => self.handle_join(player, addr).await,

            Packet::Leave { player } => {
                let removed = self.sessions.write().await.remove_session(&player);
                if removed {
                    self.release_player(player).await;
                }
            }

            Packet::Heartbeat { player } => {
                if !self.sessions.write().await.touch(&player) {
                    debug!("Heartbeat for unknown session {} from {}", player, addr);
                }
            }

            Packet::Produce {
                player,
                resource,
                amount,
            } => self.handle_produce(player, resource, amount, addr).await,

            Packet::CollectionUpdate { notification } => {
                self.handle_remote_update(notification, addr).await
            }

            Packet::SessionQuery { request_id, player } => {
                let online = self.sessions.read().await.contains(&player);
                let reply = Packet::SessionReply {
                    request_id,
                    player,
                    online,
                };
                if let Err(e) = Self::send_packet_impl(&self.socket, &reply, addr).await {
                    warn!("Failed to answer session query from {}: {}", addr, e);
                }
            }

            Packet::SessionReply { .. } => {
                warn!("Unexpected session reply routed to main loop from {}", addr);
            }
        }
    }

    async fn handle_join(&mut self, player: PlayerId, addr: SocketAddr) {
        let outcome = self.sessions.write().await.add_session(player, addr);

        match outcome {
            JoinOutcome::Full => {
                warn!("Rejecting {} from {}: node full", player, addr);
            }
            JoinOutcome::Joined | JoinOutcome::Rejoined => {
                if let Err(e) = self.engine.load_player(player).await {
                    error!("Could not load progression for {}: {}", player, e);
                    self.sessions.write().await.remove_session(&player);
                }
            }
        }
    }

    async fn handle_produce(
        &mut self,
        player: PlayerId,
        resource: ResourceType,
        amount: u64,
        addr: SocketAddr,
    ) {
        if !self.sessions.write().await.touch(&player) {
            warn!("Production for {} from {} without a session", player, addr);
            return;
        }

        match self.engine.begin_production(player, resource, amount).await {
            // Failures are logged by the write itself
            Ok(write) => {
                tokio::spawn(write.commit());
            }
            Err(e) => warn!("Production of {} {} by {} failed: {}", amount, resource, player, e),
        }
    }

    async fn handle_remote_update(&mut self, notification: CollectionUpdateNotification, addr: SocketAddr) {
        if self.peers.process_for_addr(addr).is_none() {
            warn!("Ignoring collection update from unknown peer {}", addr);
            return;
        }

        match notification.subject {
            Some(subject) if !self.sessions.read().await.contains(&subject) => {
                debug!("Dropping update for {}: no longer on this node", subject);
            }
            _ => self.engine.bus().publish(notification),
        }
    }

    async fn release_player(&self, player: PlayerId) {
        if let Err(e) = self.engine.unload_player(player).await {
            error!("Failed to flush progression for {}: {}", player, e);
        }
    }

    /// Releases a timed-out player unless they rejoined since the sweep
    async fn handle_session_timeout(&self, player: PlayerId) {
        if self.sessions.read().await.contains(&player) {
            debug!("Session {} came back before its timeout was handled", player);
            return;
        }

        info!("Session {} timed out", player);
        self.release_player(player).await;
    }

    /// Flushes every resident player and waits for outstanding fan-out
    async fn shutdown(&mut self) {
        info!(
            "Flushing {} resident progression counters",
            self.engine.progression().len().await
        );
        let players = self.sessions.read().await.players();
        for player in players {
            self.sessions.write().await.remove_session(&player);
            self.release_player(player).await;
        }
        self.engine.settle().await;
    }

    /// Main node loop
    pub async fn run(&mut self) -> NodeResult<()> {
        self.spawn_network_receiver();
        self.spawn_timeout_checker();
        self.spawn_session_forwarder();

        info!("Node {} started successfully", self.process);

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr).await;
                }
                ServerMessage::SessionTimeout { player } => {
                    self.handle_session_timeout(player).await;
                }
                ServerMessage::Shutdown => break,
            }
        }

        info!("Node {} shutting down", self.process);
        self.shutdown().await;
        Ok(())
    }
}
