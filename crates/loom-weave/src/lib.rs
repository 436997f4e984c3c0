//! Loom Weave - layered commitments and balance aggregation
//!
//! A [`Weave`] wraps inputs in gate entities, commits to their ids with a
//! Merkle tree, and signs each root. [`Weave::generate_layer`] nests one
//! gate per input into a fresh child weave.
//!
//! An [`Aggregator`] keeps a running sum of balance reports and commits a
//! signed snapshot of its state after every import.
//!
//! Both publish commits on a broadcast channel so async consumers can
//! persist them; a commit with no subscribers is still recorded locally.

pub mod aggregator;
pub mod error;
pub mod weave;

pub use aggregator::{Aggregator, AggregatorCommit, BalanceReport};
pub use error::{Result, WeaveError};
pub use weave::{verify_commit, Layer, Thread, Weave, WeaveCommit};

use serde::{Deserialize, Serialize};

/// Capacity of each commit broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Tag carried as `"type": "commit"` on every commit event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitTag {
    #[default]
    Commit,
}
