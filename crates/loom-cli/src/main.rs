//! Loom CLI - keys, federations and commitments from the command line
//!
//! Reads a JSON config (see `loom config init`) and prints results as JSON
//! on stdout. Logs go to stderr; set `RUST_LOG` to change verbosity.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loom_cli::commands::{self, ReportFile, Scheme};
use loom_cli::LoomConfig;
use loom_core::{AddressKind, Network};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "loom")]
#[command(about = "Cryptographic identity and commitment toolkit", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to $LOOM_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured network
    #[arg(short, long, global = true)]
    network: Option<Network>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hex SHA-256 digest of text
    Digest {
        text: String,

        /// Print the byte-reversed digest
        #[arg(long)]
        reverse: bool,
    },

    /// Key management commands
    #[command(subcommand)]
    Key(KeyCommands),

    /// Federation commands
    #[command(subcommand)]
    Federation(FederationCommands),

    /// Import balance reports from a JSON file and print each commit
    Aggregate {
        /// JSON list of reports, or a list of report batches
        file: PathBuf,
    },

    /// Weave commands
    #[command(subcommand)]
    Weave(WeaveCommands),

    /// Config file commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Generate a random key
    New,

    /// Show the configured key's public material
    Info,

    /// Derive an address from the configured master key
    Address {
        #[arg(short, long, default_value_t = 0)]
        index: u32,

        #[arg(long, default_value_t = 0)]
        change: u32,

        /// legacy, segwit-v0 or segwit-v1
        #[arg(short, long, default_value = "segwit-v1")]
        kind: AddressKind,
    },

    /// Sign a message with the configured key
    Sign {
        message: String,

        #[arg(long, value_enum, default_value_t = Scheme::Schnorr)]
        scheme: Scheme,
    },

    /// Verify a hex signature with the configured key
    Verify {
        message: String,
        signature: String,

        #[arg(long, value_enum, default_value_t = Scheme::Schnorr)]
        scheme: Scheme,
    },
}

#[derive(Subcommand)]
enum FederationCommands {
    /// Taproot address committing to the member set
    Address {
        /// Required signers (defaults to config, then a majority)
        #[arg(short, long)]
        threshold: Option<usize>,

        /// Relative timeout in blocks for the recovery leaf
        #[arg(long, requires = "timeout_key")]
        timeout_blocks: Option<u32>,

        /// Compressed public key hex allowed to spend after the timeout
        #[arg(long, requires = "timeout_blocks")]
        timeout_key: Option<String>,
    },

    /// Multi-sign a message with every local member
    Multisig {
        message: String,

        #[arg(short, long)]
        threshold: Option<usize>,
    },
}

#[derive(Subcommand)]
enum WeaveCommands {
    /// Build a layer over the configured inputs
    Layer,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default config file with a newly generated key
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the resolved config path
    Path,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loom=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = LoomConfig::resolve_path(cli.config.as_deref());
    let mut config = LoomConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    if let Some(network) = cli.network {
        config.network = network;
    }

    match cli.command {
        Commands::Digest { text, reverse } => {
            println!("{}", commands::digest_text(&text, reverse));
        }

        Commands::Key(cmd) => match cmd {
            KeyCommands::New => print_json(&commands::new_key(config.network)?)?,
            KeyCommands::Info => print_json(&commands::key_info(&config)?)?,
            KeyCommands::Address {
                index,
                change,
                kind,
            } => print_json(&commands::key_address(&config, index, change, kind)?)?,
            KeyCommands::Sign { message, scheme } => {
                println!("{}", commands::key_sign(&config, &message, scheme)?);
            }
            KeyCommands::Verify {
                message,
                signature,
                scheme,
            } => {
                let valid = commands::key_verify(&config, &message, &signature, scheme)?;
                println!("{}", if valid { "valid" } else { "invalid" });
                if !valid {
                    std::process::exit(1);
                }
            }
        },

        Commands::Federation(cmd) => match cmd {
            FederationCommands::Address {
                threshold,
                timeout_blocks,
                timeout_key,
            } => print_json(&commands::federation_address(
                &config,
                threshold,
                timeout_blocks,
                timeout_key.as_deref(),
            )?)?,
            FederationCommands::Multisig { message, threshold } => {
                print_json(&commands::federation_multisig(&config, &message, threshold)?)?
            }
        },

        Commands::Aggregate { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let reports: ReportFile = serde_json::from_str(&content)
                .with_context(|| format!("parsing balance reports in {}", file.display()))?;
            for commit in commands::aggregate(&config, reports.into_batches()).await? {
                println!("{}", serde_json::to_string(&commit)?);
            }
        }

        Commands::Weave(WeaveCommands::Layer) => print_json(&commands::weave_layer(&config)?)?,

        Commands::Config(cmd) => match cmd {
            ConfigCommands::Init { force } => {
                if config_path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists (use --force to overwrite)",
                        config_path.display()
                    );
                }
                commands::init_config(config.network)?.save(&config_path)?;
                info!("Wrote config with a new key to {}", config_path.display());
            }
            ConfigCommands::Path => println!("{}", config_path.display()),
        },
    }

    Ok(())
}
