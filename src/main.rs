//! CryptoNote node core
//!
//! Opens the blockchain in a data directory and keeps it open until
//! Ctrl+C, logging chain events. Networking and RPC attach elsewhere.

use clap::Parser;
use cn_core::blockchain::BlockchainMessage;
use cn_core::consensus::Checkpoints;
use cn_core::pool::{MemoryPool, TransactionPool};
use cn_core::{Blockchain, CurrencyBuilder};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cn-node", version, about = "CryptoNote node core")]
struct Args {
    /// Directory holding the block store and index caches
    #[arg(default_value = "cn-data")]
    data_dir: PathBuf,

    /// JSON file of `[{"height": n, "hash": "hex"}]` checkpoints
    #[arg(long, value_name = "FILE")]
    checkpoints: Option<PathBuf>,

    /// Use the testnet genesis block and file names
    #[arg(long)]
    testnet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let currency = CurrencyBuilder::new().testnet(args.testnet).build()?;
    let checkpoints = match &args.checkpoints {
        Some(path) => Checkpoints::from_json(&std::fs::read_to_string(path)?)?,
        None => Checkpoints::new(),
    };

    let pool: Arc<Mutex<dyn TransactionPool>> =
        Arc::new(Mutex::new(MemoryPool::with_max_tx_size(currency.params().max_tx_size)));
    let blockchain = Arc::new(Blockchain::init(currency, pool, checkpoints, &args.data_dir, true)?);

    info!(
        genesis = %blockchain.currency().genesis_block_hash(),
        height = blockchain.get_current_blockchain_height(),
        tail = %blockchain.get_tail_id(),
        testnet = args.testnet,
        "Node core started"
    );

    let mut queue = blockchain.add_message_queue();
    let events = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            match message {
                BlockchainMessage::NewBlock(hash) => info!(block = %hash, "New block"),
                BlockchainMessage::NewAlternativeBlock(hash) => info!(block = %hash, "New alternative block"),
                BlockchainMessage::ChainSwitch { hashes } => {
                    info!(root = ?hashes.first(), blocks = hashes.len().saturating_sub(1), "Chain switched")
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, storing blockchain cache");
    events.abort();
    if let Err(e) = blockchain.deinit() {
        warn!(error = %e, "Failed to store blockchain cache");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_args_defaults_and_flags() {
        let args = Args::try_parse_from(["cn-node"]).unwrap();
        assert_eq!(args.data_dir, PathBuf::from("cn-data"));
        assert!(args.checkpoints.is_none());
        assert!(!args.testnet);

        let args = Args::try_parse_from(["cn-node", "--testnet", "--checkpoints", "cp.json", "/var/cn"]).unwrap();
        assert_eq!(args.data_dir, PathBuf::from("/var/cn"));
        assert_eq!(args.checkpoints, Some(PathBuf::from("cp.json")));
        assert!(args.testnet);

        assert!(Args::try_parse_from(["cn-node", "--bogus"]).is_err());
    }
}
