//! Running balance aggregation with signed snapshot commits

use std::sync::Arc;

use loom_core::{Digest, Entity, Key, MerkleTree, PublicKey, SchnorrSignature};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::error::{Result, WeaveError};
use crate::{CommitTag, EVENT_CHANNEL_CAPACITY};

/// One balance report, or a running sum of them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub total: u64,
    pub confirmed: u64,
    pub unconfirmed: u64,
}

impl BalanceReport {
    pub fn new(total: u64, confirmed: u64, unconfirmed: u64) -> Self {
        Self {
            total,
            confirmed,
            unconfirmed,
        }
    }

    /// Componentwise sum; overflow in any field is an error
    pub fn checked_add(&self, other: &BalanceReport) -> Result<BalanceReport> {
        Ok(BalanceReport {
            total: add_field(self.total, other.total, "total")?,
            confirmed: add_field(self.confirmed, other.confirmed, "confirmed")?,
            unconfirmed: add_field(self.unconfirmed, other.unconfirmed, "unconfirmed")?,
        })
    }
}

fn add_field(a: u64, b: u64, field: &'static str) -> Result<u64> {
    a.checked_add(b)
        .ok_or(WeaveError::BalanceOverflow { field })
}

/// Signed commit of one aggregator snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorCommit {
    #[serde(rename = "type")]
    pub tag: CommitTag,
    /// Entity id of the snapshot that was signed
    pub actor: Digest,
    /// Root of the snapshot tree after appending `actor`
    pub root: Digest,
    pub signature: SchnorrSignature,
    pub signer: PublicKey,
    pub sum: BalanceReport,
    pub leaf_count: usize,
}

impl AggregatorCommit {
    /// Commit id; identical to the root
    pub fn id(&self) -> Digest {
        self.root
    }
}

/// Accumulates balance reports into a running sum and a tree of snapshots
#[derive(Debug)]
pub struct Aggregator {
    key: Arc<Key>,
    reports: Vec<BalanceReport>,
    sum: BalanceReport,
    tree: MerkleTree,
    snapshots: Vec<Entity>,
    commits: Vec<AggregatorCommit>,
    events: broadcast::Sender<AggregatorCommit>,
}

impl Aggregator {
    pub fn new(key: Arc<Key>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            key,
            reports: Vec::new(),
            sum: BalanceReport::default(),
            tree: MerkleTree::default(),
            snapshots: Vec::new(),
            commits: Vec::new(),
            events,
        }
    }

    pub fn reports(&self) -> &[BalanceReport] {
        &self.reports
    }

    /// Running sum as of the last commit
    pub fn sum(&self) -> BalanceReport {
        self.sum
    }

    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    /// Signed snapshot entities, oldest first
    pub fn snapshots(&self) -> &[Entity] {
        &self.snapshots
    }

    pub fn commits(&self) -> &[AggregatorCommit] {
        &self.commits
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AggregatorCommit> {
        self.events.subscribe()
    }

    /// Append reports and commit.
    ///
    /// A batch that overflows the sum or cannot be committed (for example
    /// with a public-only key) leaves the aggregator unchanged.
    #[instrument(skip_all, fields(reports = reports.len()))]
    pub fn import_balances(&mut self, reports: &[BalanceReport]) -> Result<AggregatorCommit> {
        sum_reports(self.reports.iter().chain(reports))?;

        let committed = self.reports.len();
        self.reports.extend_from_slice(reports);
        match self.commit() {
            Ok(commit) => Ok(commit),
            Err(e) => {
                self.reports.truncate(committed);
                Err(e)
            }
        }
    }

    /// Commit the current state.
    ///
    /// Order: sum, snapshot as an entity, sign it, append its id, read the
    /// root after the append, publish.
    pub fn commit(&mut self) -> Result<AggregatorCommit> {
        let sum = sum_reports(&self.reports)?;

        let snapshot = Entity::new(&json!({
            "type": "aggregator",
            "sequence": self.commits.len(),
            "reports": self.reports.len(),
            "sum": sum,
        }))?;
        let actor = snapshot.id();

        let signed = snapshot.sign(&self.key)?;
        let signature = *signed
            .signature()
            .ok_or(loom_core::CoreError::MissingPrivateKey)?;

        self.tree.add_leaf(actor.as_bytes());
        let root = self
            .tree
            .root_digest()
            .ok_or_else(|| loom_core::CoreError::MerkleTree("root missing after append".into()))?;

        self.sum = sum;
        self.snapshots.push(signed);
        let commit = AggregatorCommit {
            tag: CommitTag::Commit,
            actor,
            root,
            signature,
            signer: *self.key.public_key(),
            sum,
            leaf_count: self.tree.leaf_count(),
        };
        self.commits.push(commit.clone());
        let _ = self.events.send(commit.clone());

        debug!(
            root = %root.short(),
            leaves = commit.leaf_count,
            total = sum.total,
            "Aggregator committed"
        );
        Ok(commit)
    }
}

fn sum_reports<'a>(reports: impl IntoIterator<Item = &'a BalanceReport>) -> Result<BalanceReport> {
    reports
        .into_iter()
        .try_fold(BalanceReport::default(), |acc, report| acc.checked_add(report))
}
