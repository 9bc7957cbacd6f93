use crate::types::{Address, TxId};
use bitcoin::BlockHash;

/// Errors that abort a run. Parse errors on individual blocks are not part
/// of this type: a block-file parse failure just truncates that file's
/// batch (see [`crate::block_source`]) and is logged, not propagated.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "dangling spend in block {block}, tx {txid} input #{input_index}: \
         no unspent output at ({prev_txid}, {prev_index})"
    )]
    DanglingSpend {
        block: BlockHash,
        txid: TxId,
        input_index: u32,
        prev_txid: TxId,
        prev_index: u16,
    },

    #[error(
        "balance underflow for address {address:?} in block {block}, tx {txid}: \
         balance {balance} < spend {spend}"
    )]
    BalanceUnderflow {
        block: BlockHash,
        txid: TxId,
        address: Address,
        balance: u64,
        spend: u64,
    },

    #[error("reader thread panicked")]
    ReaderPanicked,
}

pub type Result<T> = std::result::Result<T, Error>;
