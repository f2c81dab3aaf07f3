//! Shared helpers for the integration tests: a chain in a temporary
//! directory, block mining at difficulty 1 and signed spends of coinbase
//! outputs.

#![allow(dead_code)]

use cn_core::consensus::{BlockHeader, Checkpoints, RewardContext};
use cn_core::constants::{BLOCK_MAJOR_VERSION_1, BLOCK_MINOR_VERSION_0, CURRENT_TRANSACTION_VERSION};
use cn_core::crypto::{check_hash, generate_key_image, generate_ring_signature, Hash, KeyPair};
use cn_core::pool::{MemoryPool, TransactionPool};
use cn_core::validation::{
    KeyInput, KeyOutput, Transaction, TransactionInput, TransactionOutput, TransactionOutputTarget,
    TransactionPrefix,
};
use cn_core::{Block, Blockchain, Currency, CurrencyBuilder};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn currency() -> Currency {
    CurrencyBuilder::new().build().unwrap()
}

pub struct Node {
    pub dir: TempDir,
    pub pool: Arc<Mutex<MemoryPool>>,
    pub chain: Blockchain,
}

impl Node {
    pub fn new() -> Self {
        Self::with_checkpoints(Checkpoints::new())
    }

    pub fn with_checkpoints(checkpoints: Checkpoints) -> Self {
        let dir = TempDir::new().unwrap();
        let (pool, chain) = open(dir.path(), checkpoints, false);
        Self { dir, pool, chain }
    }

    /// Close the chain and open it again from the same directory
    pub fn reopen(self, store_cache: bool) -> Self {
        self.reopen_with(store_cache, Checkpoints::new())
    }

    pub fn reopen_with(self, store_cache: bool, checkpoints: Checkpoints) -> Self {
        let Node { dir, chain, .. } = self;
        if store_cache {
            chain.deinit().unwrap();
        }
        drop(chain);
        let (pool, chain) = open(dir.path(), checkpoints, true);
        Self { dir, pool, chain }
    }

    pub fn cache_files(&self) -> [std::path::PathBuf; 2] {
        let currency = self.chain.currency();
        [
            self.dir.path().join(currency.blocks_cache_file_name()),
            self.dir.path().join(currency.blockchain_indices_file_name()),
        ]
    }

    pub fn read_caches(&self) -> Vec<Vec<u8>> {
        self.cache_files().iter().map(|p| std::fs::read(p).unwrap()).collect()
    }

    pub fn genesis(&self) -> Tip {
        genesis_tip(self.chain.currency())
    }

    /// Mine on top of the main-chain tail and add the block
    pub fn mine_on_tail(&self, tip: &Tip, transactions: &[Transaction]) -> Mined {
        assert_eq!(tip.hash, self.chain.get_tail_id());
        let mined = mine(self.chain.currency(), tip, transactions);
        let (accepted, context) = self.chain.add_new_block(&mined.block);
        assert!(accepted, "block at height {} rejected: {:?}", mined.tip.height, context);
        assert!(context.added_to_main_chain);
        mined
    }

    /// Mine `count` empty blocks on top of `tip`
    pub fn mine_empty(&self, tip: &Tip, count: usize) -> Vec<Mined> {
        let mut blocks: Vec<Mined> = Vec::with_capacity(count);
        for _ in 0..count {
            let parent = blocks.last().map_or(tip, |m| &m.tip).clone();
            blocks.push(self.mine_on_tail(&parent, &[]));
        }
        blocks
    }

    pub fn add_to_pool(&self, tx: &Transaction, kept_by_block: bool) -> bool {
        self.pool.lock().unwrap().add(tx.clone(), kept_by_block)
    }

    /// Global index of output 0 of `tx`
    pub fn global_index(&self, tx: &Transaction) -> u32 {
        self.chain.get_transaction_output_global_indexes(&tx.hash()).unwrap()[0]
    }
}

fn open(path: &Path, checkpoints: Checkpoints, load_existing: bool) -> (Arc<Mutex<MemoryPool>>, Blockchain) {
    let pool = Arc::new(Mutex::new(MemoryPool::new()));
    let shared: Arc<Mutex<dyn TransactionPool>> = pool.clone();
    let chain = Blockchain::init(currency(), shared, checkpoints, path, load_existing).unwrap();
    (pool, chain)
}

/// What a test needs to know about a block to build on it
#[derive(Debug, Clone)]
pub struct Tip {
    pub hash: Hash,
    pub height: u32,
    pub timestamp: u64,
    pub generated_coins: u64,
}

pub fn genesis_tip(currency: &Currency) -> Tip {
    let genesis = currency.genesis_block();
    Tip {
        hash: currency.genesis_block_hash(),
        height: 0,
        timestamp: genesis.timestamp(),
        generated_coins: genesis.base_transaction.output_amount(),
    }
}

pub struct Mined {
    pub block: Block,
    pub tip: Tip,
    /// Owner of the single coinbase output
    pub miner: KeyPair,
}

impl Mined {
    pub fn coinbase(&self) -> &Transaction {
        &self.block.base_transaction
    }

    pub fn reward(&self) -> u64 {
        self.block.base_transaction.output_amount()
    }
}

/// Build a v1 block on `parent` paying a fresh key. Timestamps advance by
/// the difficulty target so difficulty stays at 1.
pub fn mine(currency: &Currency, parent: &Tip, transactions: &[Transaction]) -> Mined {
    mine_with(currency, parent, transactions, parent.timestamp + currency.difficulty_target(), 1)
}

/// Build a block with an explicit timestamp, searching nonces until the
/// proof of work meets `difficulty`
pub fn mine_with(
    currency: &Currency,
    parent: &Tip,
    transactions: &[Transaction],
    timestamp: u64,
    difficulty: u64,
) -> Mined {
    let height = parent.height + 1;
    let fee: u64 = transactions.iter().map(|tx| tx.fee()).sum();
    let context = RewardContext {
        major_version: BLOCK_MAJOR_VERSION_1,
        median_size: 0,
        current_block_size: 0,
        already_generated_coins: parent.generated_coins,
        fee,
    };
    let miner = KeyPair::generate();
    let coinbase = currency
        .construct_miner_tx(height, &context, &miner.public_key, &[], 1)
        .unwrap();
    let reward = coinbase.output_amount();

    let header = BlockHeader {
        major_version: BLOCK_MAJOR_VERSION_1,
        minor_version: BLOCK_MINOR_VERSION_0,
        nonce: 0,
        timestamp,
        previous_block_hash: parent.hash,
    };
    let mut block = Block::new(header, coinbase, transactions.iter().map(|tx| tx.hash()).collect());
    while !check_hash(&block.proof_of_work_hash(), difficulty) {
        block.header.nonce += 1;
    }

    let tip = Tip {
        hash: block.hash(),
        height,
        timestamp,
        generated_coins: parent.generated_coins + reward - fee,
    };
    Mined { block, tip, miner }
}

/// One output being spent with a ring of size one
pub struct Spend<'a> {
    pub amount: u64,
    pub global_index: u32,
    pub owner: &'a KeyPair,
}

/// Spend `spends` into a single fresh output, leaving `fee`
pub fn spend(spends: &[Spend<'_>], fee: u64, extra: Vec<u8>) -> Transaction {
    let total: u64 = spends.iter().map(|s| s.amount).sum();
    let output = TransactionOutput {
        amount: total - fee,
        target: TransactionOutputTarget::Key(KeyOutput {
            key: KeyPair::generate().public_key,
        }),
    };
    sign_spend(spends, vec![output], 0, extra)
}

/// Spend `spends` into `outputs`, signing each input with a ring of one
pub fn sign_spend(
    spends: &[Spend<'_>],
    outputs: Vec<TransactionOutput>,
    unlock_time: u64,
    extra: Vec<u8>,
) -> Transaction {
    let inputs = spends
        .iter()
        .map(|s| {
            TransactionInput::Key(KeyInput {
                amount: s.amount,
                output_indexes: vec![s.global_index],
                key_image: generate_key_image(&s.owner.public_key, &s.owner.secret_key),
            })
        })
        .collect();
    let prefix = TransactionPrefix {
        version: CURRENT_TRANSACTION_VERSION,
        unlock_time,
        inputs,
        outputs,
        extra,
    };

    let mut tx = Transaction::new(prefix, vec![]);
    let prefix_hash = tx.prefix_hash();
    tx.signatures = spends
        .iter()
        .map(|s| {
            let image = generate_key_image(&s.owner.public_key, &s.owner.secret_key);
            generate_ring_signature(&prefix_hash, &image, &[s.owner.public_key], &s.owner.secret_key, 0).unwrap()
        })
        .collect();
    tx
}

/// Spend the coinbase output of `mined`
pub fn spend_coinbase(node: &Node, mined: &Mined, fee: u64) -> Transaction {
    spend(
        &[Spend {
            amount: mined.reward(),
            global_index: node.global_index(mined.coinbase()),
            owner: &mined.miner,
        }],
        fee,
        vec![],
    )
}
