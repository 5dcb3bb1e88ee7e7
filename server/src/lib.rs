//! # Collection Sync Node
//!
//! This library implements one server process of a multiplayer cluster, focused
//! on collection progression and cooperative group (coop) synchronization. When
//! a player produces a countable resource, the node updates their progression,
//! tells every teammate wherever their session lives, and prunes teammates that
//! are gone for good.
//!
//! ## Core Responsibilities
//!
//! ### Progression
//! Counters of players hosted here are resident in memory. A production event
//! updates the counter and publishes the matching local event in one step,
//! then writes the counter behind the scenes. A failed write is reported but
//! never undoes the gameplay-visible change.
//!
//! ### Coop Fan-out
//! Teammates on this node are notified immediately through the local event
//! bus. Teammates elsewhere are located through the cross-process directory and
//! notified over UDP, once, without retries.
//!
//! ### Membership Pruning
//! A teammate is removed from their group only after the directory says,
//! twice, that they are offline on every process. A directory that cannot
//! answer never causes a removal.
//!
//! ## Module Organization
//!
//! ### Sync Engine (`sync_engine`)
//! Orchestrates a production event end to end and tracks the asynchronous
//! continuations it spawns.
//!
//! ### Session Manager and Locator (`session_manager`, `locator`)
//! Sessions hosted here, and resolution of any member to local, remote,
//! unreachable or absent.
//!
//! ### Peer Link and Notifier (`peer`, `notifier`)
//! The UDP channel to other processes, doubling as the session directory, and
//! the best-effort notifier on top of it.
//!
//! ### Storage (`progression`, `groups`)
//! Resident counters, durable counter storage and group membership.
//!
//! ### Network (`network`)
//! The node's event loop: front-end packets, peer packets, session timeouts.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::SyncConfig;
//! use server::groups::MemoryGroupRegistry;
//! use server::network::{NodeOptions, NodeServer};
//! use server::progression::MemoryPersistence;
//! use shared::ProcessId;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let options = NodeOptions {
//!         process: ProcessId(1),
//!         peers: HashMap::new(),
//!         max_sessions: 64,
//!         config: SyncConfig::default(),
//!         persistence: Arc::new(MemoryPersistence::new()),
//!         groups: Arc::new(MemoryGroupRegistry::new()),
//!     };
//!
//!     let mut node = NodeServer::bind("127.0.0.1:7000", options).await?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event_bus;
pub mod groups;
pub mod locator;
pub mod network;
pub mod notifier;
pub mod peer;
pub mod progression;
pub mod session_manager;
pub mod sync_engine;
