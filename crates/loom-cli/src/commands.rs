//! Command implementations behind the `loom` binary

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use loom_core::{
    digest, reverse, AddressKind, DerivedAddress, Key, KeyDescriptor, KeyMode, Network, PublicKey,
};
use loom_federation::{AddressOptions, Federation, FederationAddress, TimeoutLeaf};
use loom_weave::{Aggregator, AggregatorCommit, BalanceReport, Weave};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::LoomConfig;

/// Signature scheme for `key sign` / `key verify`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scheme {
    /// BIP340 Schnorr, 64 bytes
    Schnorr,
    /// ECDSA, DER encoded
    Ecdsa,
}

/// Contents of a file passed to `aggregate`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ReportFile {
    /// One import per inner list
    Batches(Vec<Vec<BalanceReport>>),
    /// A single import
    Single(Vec<BalanceReport>),
}

impl ReportFile {
    pub fn into_batches(self) -> Vec<Vec<BalanceReport>> {
        match self {
            ReportFile::Batches(batches) => batches,
            ReportFile::Single(reports) => vec![reports],
        }
    }
}

pub fn digest_text(text: &str, reversed: bool) -> String {
    if reversed {
        reverse(text)
    } else {
        digest(text)
    }
}

/// Local key from the config file.
///
/// Fails when the config names no key material, since a fresh random key
/// could never verify or extend anything signed in an earlier run.
pub fn load_key(config: &LoomConfig) -> Result<Key> {
    let key = Key::from_descriptor(&config.key_descriptor()).context("building key from config")?;
    if key.mode() == KeyMode::Random {
        bail!("no key material configured (run `loom config init` or set key.seed, key.xprv, key.xpub, key.private or key.public)");
    }
    info!(mode = ?key.mode(), public_key = %key.public_key(), "Loaded key");
    Ok(key)
}

fn addresses(key: &Key) -> Result<Value> {
    Ok(json!({
        "legacy": key.address(AddressKind::Legacy)?,
        "segwit-v0": key.address(AddressKind::SegwitV0)?,
        "segwit-v1": key.address(AddressKind::SegwitV1)?,
    }))
}

/// Default config holding a freshly generated private key
pub fn init_config(network: Network) -> Result<LoomConfig> {
    let key = Key::random(network)?;
    let private_key = key.private_key_hex()?;
    let mut config = LoomConfig {
        network,
        ..LoomConfig::default()
    };
    config.key = KeyDescriptor::private(private_key.as_str());
    info!(public_key = %key.public_key(), "Generated config key");
    Ok(config)
}

/// Fresh random key with its addresses
pub fn new_key(network: Network) -> Result<Value> {
    let key = Key::random(network)?;
    let private_key = key.private_key_hex()?;
    Ok(json!({
        "network": network,
        "public_key": key.public_key(),
        "private_key": private_key.as_str(),
        "addresses": addresses(&key)?,
    }))
}

/// Public description of the configured key
pub fn key_info(config: &LoomConfig) -> Result<Value> {
    let key = load_key(config)?;
    Ok(json!({
        "mode": key.mode(),
        "network": key.network(),
        "public_key": key.public_key(),
        "id": key.id(),
        "xpub": key.xpub().ok(),
        "addresses": addresses(&key)?,
    }))
}

pub fn key_address(
    config: &LoomConfig,
    index: u32,
    change: u32,
    kind: AddressKind,
) -> Result<DerivedAddress> {
    let key = load_key(config)?;
    key.derive_address(index, change, kind)
        .with_context(|| format!("deriving {} address {}/{}", kind, change, index))
}

/// Hex signature over `message`
pub fn key_sign(config: &LoomConfig, message: &str, scheme: Scheme) -> Result<String> {
    let key = load_key(config)?;
    let signature = match scheme {
        Scheme::Schnorr => key.sign_schnorr(message)?.to_hex(),
        Scheme::Ecdsa => hex::encode(key.sign(message)?),
    };
    Ok(signature)
}

pub fn key_verify(
    config: &LoomConfig,
    message: &str,
    signature_hex: &str,
    scheme: Scheme,
) -> Result<bool> {
    let key = load_key(config)?;
    let signature = hex::decode(signature_hex.trim()).context("signature is not hex")?;
    Ok(match scheme {
        Scheme::Schnorr => key.verify_schnorr(message, &signature),
        Scheme::Ecdsa => key.verify(message, &signature),
    })
}

/// Federation from the configured member list
pub fn load_federation(config: &LoomConfig) -> Result<Federation> {
    if config.federation.members.is_empty() {
        bail!("no federation members configured");
    }
    let federation = Federation::from_descriptors(config.network, &config.federation.members)
        .context("building federation from config")?;
    info!(members = federation.len(), "Loaded federation");
    Ok(federation)
}

pub fn federation_address(
    config: &LoomConfig,
    threshold: Option<usize>,
    timeout_blocks: Option<u32>,
    timeout_key: Option<&str>,
) -> Result<FederationAddress> {
    let federation = load_federation(config)?;

    let timeout = match (timeout_blocks, timeout_key) {
        (Some(blocks), Some(key)) => Some(TimeoutLeaf {
            blocks,
            key: PublicKey::from_hex(key).context("timeout key")?,
        }),
        (None, None) => None,
        _ => bail!("--timeout-blocks and --timeout-key must be given together"),
    };

    let options = AddressOptions {
        threshold: threshold.or(config.federation.threshold),
        timeout,
        contract_script: None,
    };
    Ok(federation.address(&options)?)
}

/// Multi-sign `message` with every local member and check the threshold
pub fn federation_multisig(config: &LoomConfig, message: &str, threshold: Option<usize>) -> Result<Value> {
    let federation = load_federation(config)?;
    let threshold = threshold
        .or(config.federation.threshold)
        .unwrap_or_else(|| federation.default_threshold());

    let multisig = federation.create_multi_signature(message)?;
    let report = federation.tally_multi_signature(&multisig, threshold)?;
    if !report.is_satisfied() {
        warn!(
            valid = report.valid_count(),
            threshold, "Multi-signature below threshold"
        );
    }
    Ok(json!({
        "multisig": multisig,
        "report": report,
        "satisfied": report.is_satisfied(),
    }))
}

/// Import configured inputs, then each batch, collecting every commit event
pub async fn aggregate(config: &LoomConfig, batches: Vec<Vec<BalanceReport>>) -> Result<Vec<AggregatorCommit>> {
    let key = Arc::new(load_key(config)?);
    let mut aggregator = Aggregator::new(key);
    let mut events = aggregator.subscribe();

    let collector = tokio::spawn(async move {
        let mut commits = Vec::new();
        loop {
            match events.recv().await {
                Ok(commit) => commits.push(commit),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Commit listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        commits
    });

    if !config.aggregator.inputs.is_empty() {
        aggregator.import_balances(&config.aggregator.inputs)?;
    }
    for batch in &batches {
        aggregator
            .import_balances(batch)
            .context("importing balance reports")?;
    }
    info!(sum = ?aggregator.sum(), "Aggregation complete");

    // Dropping the aggregator closes the channel and ends the listener
    drop(aggregator);
    Ok(collector.await?)
}

/// Build a layer over the configured weave inputs
pub fn weave_layer(config: &LoomConfig) -> Result<Value> {
    if config.weave.inputs.is_empty() {
        bail!("no weave inputs configured");
    }
    let key = Arc::new(load_key(config)?);
    let weave = Weave::with_inputs(key, config.weave.inputs.clone());
    let layer = weave.generate_layer()?;
    Ok(json!({
        "gate_ids": layer.gate_ids,
        "commit": layer.commit,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoomConfig {
        let mut config = LoomConfig::default();
        config.key = KeyDescriptor::private("42".repeat(32));
        config.federation.members = (1..=3u8)
            .map(|n| KeyDescriptor::private(hex::encode([n; 32])))
            .collect();
        config
    }

    #[test]
    fn test_digest_text() {
        assert_eq!(
            digest_text("abc", false),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            digest_text("abc", true),
            "ad1500f261ff10b49c7a1796a36103b02322ae5dde404141eacf018fbf1678ba"
        );
    }

    #[test]
    fn test_sign_then_verify() {
        let config = config();
        for scheme in [Scheme::Schnorr, Scheme::Ecdsa] {
            let signature = key_sign(&config, "hello", scheme).unwrap();
            assert!(key_verify(&config, "hello", &signature, scheme).unwrap());
            assert!(!key_verify(&config, "bye", &signature, scheme).unwrap());
        }
    }

    #[test]
    fn test_commands_refuse_config_without_key() {
        let mut config = config();
        config.key = KeyDescriptor::default();
        config.weave.inputs = vec![json!("a")];

        let err = key_sign(&config, "hello", Scheme::Schnorr).unwrap_err();
        assert!(format!("{:#}", err).contains("no key material"));
        assert!(key_verify(&config, "hello", &"00".repeat(64), Scheme::Schnorr).is_err());
        assert!(key_info(&config).is_err());
        assert!(weave_layer(&config).is_err());
    }

    #[tokio::test]
    async fn test_aggregate_refuses_config_without_key() {
        let mut config = config();
        config.key = KeyDescriptor::default();
        assert!(aggregate(&config, vec![vec![BalanceReport::new(1, 1, 0)]])
            .await
            .is_err());
    }

    #[test]
    fn test_init_config_key_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        init_config(Network::Testnet).unwrap().save(&path).unwrap();

        let signature = key_sign(&LoomConfig::load(&path).unwrap(), "hello", Scheme::Schnorr).unwrap();
        let reloaded = LoomConfig::load(&path).unwrap();
        assert_eq!(reloaded.network, Network::Testnet);
        assert!(key_verify(&reloaded, "hello", &signature, Scheme::Schnorr).unwrap());
    }

    #[test]
    fn test_key_address_needs_master() {
        let err = key_address(&config(), 0, 0, AddressKind::Legacy).unwrap_err();
        assert!(format!("{:#}", err).contains("master key"));
    }

    #[test]
    fn test_federation_commands() {
        let config = config();
        assert!(federation_address(&config, None, Some(144), None).is_err());

        let address = federation_address(&config, Some(3), None, None).unwrap();
        assert_eq!(address.threshold, 3);

        let result = federation_multisig(&config, "vote", None).unwrap();
        assert_eq!(result["satisfied"], true);
        assert_eq!(result["report"]["valid"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_report_file_shapes() {
        let single: ReportFile =
            serde_json::from_str(r#"[{"total": 1, "confirmed": 1, "unconfirmed": 0}]"#).unwrap();
        assert_eq!(single.into_batches().len(), 1);

        let batches: ReportFile = serde_json::from_str(
            r#"[[{"total": 1, "confirmed": 1, "unconfirmed": 0}], [{"total": 2, "confirmed": 0, "unconfirmed": 2}]]"#,
        )
        .unwrap();
        assert_eq!(batches.into_batches().len(), 2);
    }

    #[tokio::test]
    async fn test_aggregate_collects_every_commit() {
        let mut config = config();
        config.aggregator.inputs = vec![BalanceReport::new(1, 1, 0)];
        let commits = aggregate(
            &config,
            vec![vec![BalanceReport::new(2, 1, 1)], vec![BalanceReport::new(3, 3, 0)]],
        )
        .await
        .unwrap();

        assert_eq!(commits.len(), 3);
        assert_eq!(commits[2].sum, BalanceReport::new(6, 5, 1));
        assert_eq!(commits[2].leaf_count, 3);
    }

    #[test]
    fn test_weave_layer_requires_inputs() {
        assert!(weave_layer(&config()).is_err());

        let mut config = config();
        config.weave.inputs = vec![json!("a"), json!("b")];
        let layer = weave_layer(&config).unwrap();
        assert_eq!(layer["gate_ids"].as_array().unwrap().len(), 2);
        assert_eq!(layer["commit"]["type"], "commit");
    }
}
