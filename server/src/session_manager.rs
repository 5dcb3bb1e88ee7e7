//! Sessions resident on this process
//!
//! This module tracks which players currently have an active session on the
//! local node, including:
//! - Session lifecycle (join, leave, timeout)
//! - Activity tracking so silent front-ends are eventually dropped
//! - Capacity enforcement for the node
//!
//! Whether a player is in here is the first, cheap step of resolving where a
//! coop member's session lives.

use log::info;
use shared::PlayerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A player session hosted by this node
#[derive(Debug)]
pub struct Session {
    pub player: PlayerId,
    /// Front-end address that opened the session
    pub addr: SocketAddr,
    /// Last time any packet arrived for this session
    pub last_seen: Instant,
}

impl Session {
    pub fn new(player: PlayerId, addr: SocketAddr) -> Self {
        Self {
            player,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Outcome of a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Rejoined,
    Full,
}

/// Manages every session hosted on this node.
///
/// Capacity is enforced on new sessions only; a player rejoining keeps their
/// slot and simply has their address and activity refreshed.
pub struct SessionManager {
    sessions: HashMap<PlayerId, Session>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sessions,
        }
    }

    pub fn add_session(&mut self, player: PlayerId, addr: SocketAddr) -> JoinOutcome {
        if let Some(session) = self.sessions.get_mut(&player) {
            session.addr = addr;
            session.touch();
            return JoinOutcome::Rejoined;
        }

        if self.sessions.len() >= self.max_sessions {
            return JoinOutcome::Full;
        }

        info!("Player {} joined from {}", player, addr);
        self.sessions.insert(player, Session::new(player, addr));
        JoinOutcome::Joined
    }

    /// Returns false if the player had no session here
    pub fn remove_session(&mut self, player: &PlayerId) -> bool {
        if let Some(session) = self.sessions.remove(player) {
            info!("Player {} left", session.player);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, player: &PlayerId) -> bool {
        self.sessions.contains_key(player)
    }

    /// Refreshes a session's activity; false if the player is unknown
    pub fn touch(&mut self, player: &PlayerId) -> bool {
        match self.sessions.get_mut(player) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Front-end address of the player's session, if hosted here
    pub fn addr_of(&self, player: &PlayerId) -> Option<SocketAddr> {
        self.sessions.get(player).map(|session| session.addr)
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<PlayerId> {
        self.sessions
            .iter()
            .find(|(_, session)| session.addr == addr)
            .map(|(player, _)| *player)
    }

    /// Removes sessions idle for longer than `timeout` and returns them
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<PlayerId> {
        let timed_out: Vec<PlayerId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_timed_out(timeout))
            .map(|(player, _)| *player)
            .collect();

        for player in &timed_out {
            self.remove_session(player);
        }

        timed_out
    }

    pub fn players(&self) -> Vec<PlayerId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
