//! Crate-wide error taxonomy.
//!
//! Each subsystem boundary gets its own `thiserror` enum; every variant name
//! matches an error kind named in the consensus design. All are fatal only to
//! the block/tx they arise on — nothing here panics outside of tests.

use thiserror::Error;

/// Errors raised by context-free and contextual transaction checks (4.D).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("transaction has no inputs")]
    NoTxInputs,
    #[error("transaction has no outputs")]
    NoTxOutputs,
    #[error("transaction serialized size too large")]
    TxTooBig,
    #[error("output value out of range")]
    BadTxOutValue,
    #[error("duplicate input outpoint within transaction")]
    DuplicateTxInputs,
    #[error("malformed transaction input")]
    BadTxInput,
    #[error("referenced previous transaction is missing")]
    MissingTx,
    #[error("spend of immature coinbase/pool output")]
    ImmatureSpend,
    #[error("double spend of an already-spent output")]
    DoubleSpend,
    #[error("duplicate transaction hash with unspent prior outputs")]
    OverwriteTx,
    #[error("relative sequence lock not satisfied")]
    SequenceNotSatisfied,
    #[error("transaction not yet final (locktime)")]
    UnFinalizedTx,
    #[error("coinbase transaction carries a non-empty witness")]
    CoinbaseTxInWitness,
    #[error("binding input does not belong to the miner public key")]
    BindingPubKey,
}

/// Errors raised by header checks (4.E).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("unexpected chain id")]
    ChainID,
    #[error("block version below minimum")]
    InvalidBlockVersion,
    #[error("invalid timestamp")]
    InvalidTime,
    #[error("timestamp too far in the future")]
    TimeTooNew,
    #[error("timestamp not after median of last 11 blocks")]
    TimeTooOld,
    #[error("timestamp lacks second precision")]
    TimestampFormat,
    #[error("target does not match the retargeting function")]
    UnexpectedDifficulty,
    #[error("proof quality below target")]
    LowQuality,
    #[error("header signature verification failed")]
    BlockSIG,
    #[error("ban list contains the header's own public key")]
    BanSelfPk,
    #[error("ban list contains duplicate public keys")]
    BanList,
    #[error("miner public key is on the effective ban list")]
    BannedPk,
    #[error("block height does not follow its parent")]
    BadBlockHeight,
    #[error("failed to derive effective ban list")]
    CheckBannedPk,
    #[error("proof bit-length decreased for this miner")]
    InvalidBitLength,
}

/// Errors raised by block-level checks (4.F).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error("serialized block payload too large")]
    BlockTooBig,
    #[error("too many transactions in block")]
    TooManyTransactions,
    #[error("duplicate transaction hash within block")]
    DuplicateTx,
    #[error("transaction merkle root mismatch")]
    InvalidMerkleRoot,
    #[error("proposal merkle root mismatch")]
    InvalidProposalRoot,
    #[error("too many signature operations in block")]
    TooManySigOps,
    #[error("first transaction is not coinbase")]
    FirstTxNotCoinbase,
    #[error("block contains more than one coinbase transaction")]
    MultipleCoinbases,
    #[error("coinbase payload too short to hold height")]
    IncompleteCoinbasePayload,
    #[error("coinbase height does not match header height")]
    BadCoinbaseHeight,
    #[error("coinbase output value exceeds allowed subsidy plus fees")]
    BadCoinbaseValue,
    #[error("accumulated fees underflow or overflow")]
    BadFees,
    #[error("attempted to reconnect the genesis block")]
    ConnectGenesis,
}

/// Errors raised by the persistent store (4.I).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("backing store error: {0}")]
    Backend(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed stored value for key prefix {0}")]
    Corrupt(&'static str),
    #[error("sub-batch for block {0} was not staged before commit")]
    BatchNotStaged(String),
    #[error("commit aborted: {0}")]
    CommitAborted(String),
}

/// Top-level chain-worker error, wrapping every subsystem's error kind.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("block already known")]
    DuplicateBlock,
    #[error("parent block unknown, orphaned")]
    Orphan,
}

pub type Result<T> = std::result::Result<T, ChainError>;
