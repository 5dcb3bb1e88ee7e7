//! Workspace facade for the collection sync node.
//!
//! The node itself lives in the `server` crate and the wire/data types it
//! shares with front-ends and peer processes live in `shared`.

pub use server;
pub use shared;
