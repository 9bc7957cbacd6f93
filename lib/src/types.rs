//! Core data model: transaction ids, outpoints, addresses and outputs.
//!
//! These are deliberately thin wrappers over `bitcoin` types rather than
//! re-exports of them: the engine and snapshot codec only ever need a
//! hashable, `Copy`-or-cheap-clone key and a rendered address string, not
//! the full `bitcoin::Transaction`/`bitcoin::Address` API surface.

use std::convert::TryFrom;
use std::fmt;

use bitcoin::hashes::Hash;

/// A transaction id, stored as the raw 32 little-endian bytes `bitcoin`
/// already keeps internally (`Txid::as_byte_array`). `fxhash` hashes these
/// directly rather than re-hashing an already-hash-like key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    pub fn from_bitcoin(txid: &bitcoin::Txid) -> Self {
        TxId(*txid.as_byte_array())
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in self.0.iter().rev() {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A spend target: the creating transaction plus its output index.
///
/// The index is a `u16`, not `bitcoin::OutPoint`'s `u32`: standard
/// transactions never exceed 65,535 outputs, so anything wider is rejected
/// (logged and skipped) rather than silently truncated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OutPoint(pub TxId, pub u16);

impl OutPoint {
    /// Converts a `bitcoin::OutPoint`, returning `None` if `vout` does not
    /// fit in a `u16` (the coinbase sentinel `0xFFFF_FFFF` is handled
    /// separately by the caller and never reaches this function).
    pub fn from_bitcoin(out: &bitcoin::OutPoint) -> Option<Self> {
        let index = u16::try_from(out.vout).ok()?;
        Some(OutPoint(TxId::from_bitcoin(&out.txid), index))
    }
}

/// The reserved `vout` value that marks a coinbase input. `bitcoin`'s own
/// `TxIn::previous_output.vout` carries this value for coinbase inputs; we
/// check it directly rather than relying on a version-specific
/// `is_coinbase` helper.
pub const COINBASE_VOUT: u32 = 0xFFFF_FFFF;

/// An opaque, fixed-representation address key.
///
/// Zero-length is the sentinel for "output script did not decode to a
/// standard address" (non-standard scripts, OP_RETURN, bare multisig,
/// etc.). Such outputs still occupy a UTXO slot (they can be spent) but
/// never appear in the balance map.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Address(Box<str>);

impl Address {
    /// Derives an address from an output script, using `network` to pick
    /// the right version/hrp bytes. Returns the undecodable sentinel for
    /// anything `bitcoin::Address::from_script` rejects.
    pub fn from_script(script: &bitcoin::Script, network: bitcoin::Network) -> Self {
        match bitcoin::Address::from_script(script, network) {
            Ok(addr) => Address(addr.to_string().into_boxed_str()),
            Err(_) => Address(String::new().into_boxed_str()),
        }
    }

    /// Builds an `Address` from an already-rendered string, e.g. when
    /// reloading a snapshot that stored the address as text. Does not
    /// re-validate against a network.
    pub fn from_raw(s: &str) -> Self {
        Address(s.into())
    }

    pub fn is_undecodable(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undecodable() {
            write!(f, "<undecodable>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One transaction output as tracked by the UTXO map: just enough to
/// produce a snapshot line, never the full `bitcoin::TxOut`.
#[derive(Clone, Debug)]
pub struct Output {
    pub address: Address,
    pub value_sat: u64,
}
