//! Replays a Bitcoin Core block store (`blocks/blk*.dat`) into UTXO and
//! balance snapshots, or into a per-file RDF/N-Quads dump. See
//! [`export_balance`] and [`export_rdf`].
#![forbid(unsafe_code)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(unused_imports)]
#![deny(unused_must_use)]

mod assembler;
mod block_source;
mod config;
mod engine;
mod error;
mod orchestrator;
mod period;
mod rdf;
mod snapshot;
mod types;

// re-exporting deps so downstream crates don't need to pin their own versions
pub use bitcoin;
pub use log;

pub use config::{BalanceConfig, Cli, Command, RdfConfig};
pub use engine::{BalanceMap, Engine, UnspentMap};
pub use error::{Error, Result};
pub use orchestrator::{export_balance, export_rdf};
pub use period::{PeriodCounter, Periodic};
pub use types::{Address, OutPoint, Output, TxId, COINBASE_VOUT};
