//! The UTXO/balance engine.
//!
//! Single-writer, applies one main-chain-ordered block at a time to a flat,
//! `fxhash`-keyed map of per-tx outputs, debiting them as later blocks spend
//! them. A missing prevout means the main chain was fed out of order or the
//! block store is inconsistent, so it's surfaced as a typed, propagated
//! [`Error::DanglingSpend`] rather than tolerated.

use std::convert::TryFrom;

use bitcoin::{Block, BlockHash, Network};
use fxhash::FxHashMap;
use log::debug;

use crate::error::{Error, Result};
use crate::types::{Address, Output, TxId, COINBASE_VOUT};

/// `TxId -> (output index -> Output)`. The inner map is never left empty:
/// removing the last index takes the outer entry with it.
pub type UnspentMap = FxHashMap<TxId, FxHashMap<u16, Output>>;

/// `Address -> total unspent satoshis`. Never holds a zero entry.
pub type BalanceMap = FxHashMap<Address, u64>;

/// Owns the two maps and applies blocks to them in main-chain order.
pub struct Engine {
    unspent: UnspentMap,
    balance: BalanceMap,
    network: Network,
    applied_blocks: u32,
}

impl Engine {
    pub fn new(network: Network) -> Self {
        Engine {
            unspent: UnspentMap::default(),
            balance: BalanceMap::default(),
            network,
            applied_blocks: 0,
        }
    }

    /// Resumes from a previously written snapshot.
    pub fn from_snapshot(network: Network, unspent: UnspentMap, balance: BalanceMap, applied_blocks: u32) -> Self {
        Engine {
            unspent,
            balance,
            network,
            applied_blocks,
        }
    }

    pub fn applied_blocks(&self) -> u32 {
        self.applied_blocks
    }

    pub fn unspent(&self) -> &UnspentMap {
        &self.unspent
    }

    pub fn balance(&self) -> &BalanceMap {
        &self.balance
    }

    pub fn into_maps(self) -> (UnspentMap, BalanceMap) {
        (self.unspent, self.balance)
    }

    /// Applies every transaction of `block`, in declared order. Inputs are
    /// spent before a transaction's own outputs are created, which is what
    /// makes a same-block self-spend work: an earlier transaction's output
    /// is already present in `unspent` by the time a later transaction in
    /// the same block spends it.
    pub fn apply_block(&mut self, block_hash: BlockHash, block: &Block) -> Result<()> {
        for tx in block.txdata.iter() {
            let txid = TxId::from_bitcoin(&tx.txid());

            for (input_index, input) in tx.input.iter().enumerate() {
                if input.previous_output.vout == COINBASE_VOUT {
                    continue;
                }
                let prev_txid = TxId::from_bitcoin(&input.previous_output.txid);
                let prev_index = u16::try_from(input.previous_output.vout).ok();

                let output = prev_index.and_then(|idx| {
                    let inner = self.unspent.get_mut(&prev_txid)?;
                    let output = inner.remove(&idx)?;
                    if inner.is_empty() {
                        self.unspent.remove(&prev_txid);
                    }
                    Some(output)
                });

                let output = output.ok_or_else(|| Error::DanglingSpend {
                    block: block_hash,
                    txid,
                    input_index: input_index as u32,
                    prev_txid,
                    prev_index: prev_index.unwrap_or(u16::MAX),
                })?;

                let balance = self.balance.get_mut(&output.address).copied().unwrap_or(0);
                if balance < output.value_sat {
                    return Err(Error::BalanceUnderflow {
                        block: block_hash,
                        txid,
                        address: output.address,
                        balance,
                        spend: output.value_sat,
                    });
                }
                let remaining = balance - output.value_sat;
                if remaining == 0 {
                    self.balance.remove(&output.address);
                } else {
                    self.balance.insert(output.address, remaining);
                }
            }

            let mut inner = FxHashMap::default();
            for (i, txout) in tx.output.iter().enumerate() {
                let index = match u16::try_from(i) {
                    Ok(idx) => idx,
                    Err(_) => {
                        log::warn!("tx {} has an output index {} wider than u16, skipped", txid, i);
                        continue;
                    }
                };
                if txout.value == 0 {
                    continue;
                }
                let address = Address::from_script(&txout.script_pubkey, self.network);
                if address.is_undecodable() {
                    continue;
                }
                *self.balance.entry(address.clone()).or_insert(0) += txout.value;
                inner.insert(
                    index,
                    Output {
                        address,
                        value_sat: txout.value,
                    },
                );
            }

            // overwrite on duplicate txid: matches canonical node semantics
            // at the historical heights affected by the pre-BIP30
            // duplicate-txid anomaly.
            if !inner.is_empty() {
                self.unspent.insert(txid, inner);
            } else {
                self.unspent.remove(&txid);
            }
        }

        self.applied_blocks += 1;
        debug!(
            "applied block {} (#{}), unspent txs: {}, balances: {}",
            block_hash,
            self.applied_blocks,
            self.unspent.len(),
            self.balance.len()
        );
        Ok(())
    }
}
