//! Layered commitment builder
//!
//! Inputs are wrapped in gate entities whose ids become Merkle leaves.
//! Threads give each actor a one-time key derived from the weave key, so
//! thread fields depend only on the actor state and the weave key.

use std::collections::HashMap;
use std::sync::Arc;

use loom_core::{entity_id, Digest, Entity, Key, MerkleTree, PublicKey, SchnorrSignature};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::error::{Result, WeaveError};
use crate::{CommitTag, EVENT_CHANNEL_CAPACITY};

/// Per-actor thread handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    /// Entity id of the actor state
    pub actor: Digest,
    /// `Digest("labels/" + actor)`
    pub label: Digest,
    /// Public key of the actor's ephemeral key
    pub pubkey: PublicKey,
    /// Id of the ephemeral key in the thread map
    pub key_id: Digest,
}

/// Signed snapshot of a weave root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaveCommit {
    #[serde(rename = "type")]
    pub tag: CommitTag,
    /// Root hex; empty for a weave without gates
    pub root: String,
    pub signature: SchnorrSignature,
    pub signer: PublicKey,
    pub leaf_count: usize,
}

/// Result of [`Weave::generate_layer`]
#[derive(Debug)]
pub struct Layer {
    pub layer: Weave,
    pub gate_ids: Vec<Digest>,
    pub commit: WeaveCommit,
}

/// Merkle tree of gate ids plus the thread map, signed by one key
#[derive(Debug)]
pub struct Weave {
    key: Arc<Key>,
    inputs: Vec<Value>,
    tree: MerkleTree,
    threads: HashMap<Digest, Arc<Key>>,
    commits: Vec<WeaveCommit>,
    events: broadcast::Sender<WeaveCommit>,
}

impl Weave {
    pub fn new(key: Arc<Key>) -> Self {
        Self::with_inputs(key, Vec::new())
    }

    /// Weave configured with layer inputs
    pub fn with_inputs(key: Arc<Key>, inputs: Vec<Value>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            key,
            inputs,
            tree: MerkleTree::default(),
            threads: HashMap::new(),
            commits: Vec::new(),
            events,
        }
    }

    pub fn key(&self) -> &Arc<Key> {
        &self.key
    }

    pub fn inputs(&self) -> &[Value] {
        &self.inputs
    }

    pub fn add_input(&mut self, input: Value) {
        self.inputs.push(input);
    }

    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    /// Ephemeral key registered under `key_id`
    pub fn thread_key(&self, key_id: &Digest) -> Option<&Arc<Key>> {
        self.threads.get(key_id)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Every commit made so far, oldest first
    pub fn commits(&self) -> &[WeaveCommit] {
        &self.commits
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WeaveCommit> {
        self.events.subscribe()
    }

    /// Register a thread for the actor described by `state`
    pub fn create_thread<T: Serialize + ?Sized>(&mut self, state: &T) -> Result<Thread> {
        let actor = entity_id(state)?;
        let label = Digest::hash(format!("labels/{}", actor));
        let ephemeral = self.key.derive_ephemeral(actor.as_bytes())?;

        let thread = Thread {
            actor,
            label,
            pubkey: *ephemeral.public_key(),
            key_id: ephemeral.id(),
        };
        self.threads.insert(thread.key_id, Arc::new(ephemeral));

        debug!(actor = %actor.short(), key_id = %thread.key_id.short(), "Created thread");
        Ok(thread)
    }

    /// Wrap `input` as gate `index` and append its id as a leaf
    pub fn add_gate(&mut self, index: usize, input: &Value) -> Result<Digest> {
        let gate = Entity::new(&json!({
            "type": "gate",
            "index": index,
            "input": input,
        }))?;
        let id = gate.id();
        self.tree.add_leaf(id.as_bytes());
        Ok(id)
    }

    /// Nest one gate per configured input into a new committed child weave
    #[instrument(skip(self), fields(inputs = self.inputs.len()))]
    pub fn generate_layer(&self) -> Result<Layer> {
        if self.inputs.is_empty() {
            return Err(WeaveError::NoInputs);
        }

        let mut layer = Weave::new(Arc::clone(&self.key));
        let gate_ids = self
            .inputs
            .iter()
            .enumerate()
            .map(|(index, input)| layer.add_gate(index, input))
            .collect::<Result<Vec<_>>>()?;
        let commit = layer.commit()?;

        debug!(gates = gate_ids.len(), root = %commit.root, "Generated layer");
        Ok(Layer {
            layer,
            gate_ids,
            commit,
        })
    }

    /// Sign the current root and publish the commit
    pub fn commit(&mut self) -> Result<WeaveCommit> {
        let root = self.tree.root();
        let signature = self.key.sign_schnorr(&root)?;

        let commit = WeaveCommit {
            tag: CommitTag::Commit,
            root: hex::encode(&root),
            signature,
            signer: *self.key.public_key(),
            leaf_count: self.tree.leaf_count(),
        };
        self.commits.push(commit.clone());
        // No subscribers is fine; the commit is kept in the history
        let _ = self.events.send(commit.clone());

        debug!(root = %commit.root, leaves = commit.leaf_count, "Weave committed");
        Ok(commit)
    }
}

/// Check a weave commit signature against its signer
pub fn verify_commit(commit: &WeaveCommit) -> Result<bool> {
    let root = hex::decode(&commit.root).map_err(loom_core::CoreError::from)?;
    Ok(loom_core::verify_schnorr_x_only(
        &commit.signer.x_only(),
        &root,
        commit.signature.as_bytes(),
    )?)
}
