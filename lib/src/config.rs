use std::path::PathBuf;

#[cfg(feature = "clap")]
use clap::{Parser, Subcommand};

/// Top-level CLI surface: `export-balance` and `export-rdf`. Kept behind
/// the `cli` feature so the library stays embeddable without pulling in an
/// argument parser.
#[cfg_attr(feature = "clap", derive(Parser))]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "clap", command(name = "utxo-snapshot", version))]
pub struct Cli {
    #[cfg_attr(feature = "clap", command(subcommand))]
    pub command: Command,
}

#[cfg_attr(feature = "clap", derive(Subcommand))]
#[derive(Debug, Clone)]
pub enum Command {
    /// Replay the block store and export a UTXO + balance snapshot
    ExportBalance(BalanceConfig),
    /// Replay the block store and export one RDF/N-Quads dump per block file
    ExportRdf(RdfConfig),
}

/// Parameters for `export-balance`.
#[cfg_attr(feature = "clap", derive(Parser))]
#[derive(Debug, Clone)]
pub struct BalanceConfig {
    /// Target block height; the run stops once this many blocks have been applied
    #[cfg_attr(feature = "clap", arg(long))]
    pub block: u32,

    /// Snapshot cadence, in committed block files
    #[cfg_attr(feature = "clap", arg(long))]
    pub snapshot: u32,

    /// Block-store root (containing `blocks/blk*.dat`)
    #[cfg_attr(feature = "clap", arg(long))]
    pub datadir: PathBuf,

    /// Network magic tag (bitcoin, testnet, regtest, signet)
    #[cfg_attr(feature = "clap", arg(long))]
    pub magic: bitcoin::Network,

    /// Output directory for the `<file_idx>.<block_count>/{unspent,balance}.gz` pairs
    #[cfg_attr(feature = "clap", arg(long))]
    pub outdir: PathBuf,
}

impl BalanceConfig {
    pub fn new(block: u32, snapshot: u32, datadir: PathBuf, magic: bitcoin::Network, outdir: PathBuf) -> Self {
        BalanceConfig {
            block,
            snapshot,
            datadir,
            magic,
            outdir,
        }
    }
}

/// Parameters for `export-rdf`.
#[cfg_attr(feature = "clap", derive(Parser))]
#[derive(Debug, Clone)]
pub struct RdfConfig {
    /// Block-store root (containing `blocks/blk*.dat`)
    #[cfg_attr(feature = "clap", arg(long))]
    pub datadir: PathBuf,

    /// Network magic tag (bitcoin, testnet, regtest, signet)
    #[cfg_attr(feature = "clap", arg(long))]
    pub magic: bitcoin::Network,

    /// Output directory for the per-file `<file_idx>.rdf.gz` dumps
    #[cfg_attr(feature = "clap", arg(long))]
    pub outdir: PathBuf,
}

impl RdfConfig {
    pub fn new(datadir: PathBuf, magic: bitcoin::Network, outdir: PathBuf) -> Self {
        RdfConfig { datadir, magic, outdir }
    }
}
