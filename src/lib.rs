//! Block validation and chain state machine for a Proof-of-Capacity full node.
//!
//! This crate provides:
//! - Fixed-size chain hashing and Merkle tree construction (`codec`)
//! - A closed set of recognized output script shapes plus witness
//!   verification (`script`)
//! - UTXO-model transactions with context-free and contextual checks
//!   (`transaction`)
//! - PoC block headers and retargeting (`header`)
//! - Full blocks composing headers, transactions, and fault testimony
//!   (`block`)
//! - The halving subsidy schedule and miner/pool/senate reward split
//!   (`subsidy`)
//! - The in-memory block-node arena, orphan pool, and best-chain/reorg state
//!   machine (`chain`)
//! - The `sled`-backed persistent store and its key schema (`store`)
//! - Consensus parameters and the genesis document (`config`)
//!
//! # Example
//!
//! ```no_run
//! use poc_chain_core::chain::Blockchain;
//! use poc_chain_core::config::ChainParams;
//! use poc_chain_core::store::Store;
//!
//! # fn build(genesis: poc_chain_core::block::Block) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open(std::path::Path::new("./chaindata"))?;
//! let chain = Blockchain::new(ChainParams::default(), store, genesis);
//! println!("tip height: {}", chain.best_height());
//! # Ok(())
//! # }
//! ```

pub mod amount;
pub mod block;
pub mod chain;
pub mod codec;
pub mod config;
pub mod error;
pub mod header;
pub mod script;
pub mod store;
pub mod subsidy;
pub mod transaction;

pub use amount::Amount;
pub use block::{Block, ProposalArea};
pub use chain::{Blockchain, BlockStatus};
pub use codec::Hash;
pub use config::ChainParams;
pub use error::{BlockError, ChainError, HeaderError, Result, StoreError, TxError};
pub use header::BlockHeader;
pub use store::Store;
pub use transaction::{MsgTx, OutPoint, TxIn, TxOut};
