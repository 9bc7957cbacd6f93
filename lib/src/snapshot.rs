//! The snapshot codec for `unspent.gz` / `balance.gz`.
//!
//! Both are plain text, line-oriented, gzip-compressed via `flate2`.

use std::collections::hash_map::Entry;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use fxhash::FxHashMap;
use log::warn;

use crate::engine::{BalanceMap, UnspentMap};
use crate::error::{Error, Result};
use crate::types::{Address, Output, TxId};

fn io_err(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.to_owned(),
        source,
    }
}

/// Writes `<dir>/unspent.gz` and `<dir>/balance.gz`, creating `dir` if
/// needed. The caller is expected to hold the maps quiescent (no
/// concurrent mutation) for the duration of this call.
///
/// Also writes `<dir>/tip`, a one-line hex block hash: internal
/// bookkeeping, not part of the published snapshot pair, that lets a
/// resumed run reseed the chain assembler's `current_tip` without
/// re-reading every skipped block file from genesis.
pub fn write_snapshot(dir: &Path, unspent: &UnspentMap, balance: &BalanceMap, tip: BlockHash) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    write_unspent(&dir.join("unspent.gz"), unspent)?;
    write_balance(&dir.join("balance.gz"), balance)?;
    let tip_path = dir.join("tip");
    std::fs::write(&tip_path, tip.to_string()).map_err(|e| io_err(&tip_path, e))?;
    Ok(())
}

/// Reads a previously written snapshot directory back into fresh maps
/// plus the chain tip it was written at.
pub fn read_snapshot(dir: &Path) -> Result<(UnspentMap, BalanceMap, BlockHash)> {
    let unspent = read_unspent(&dir.join("unspent.gz"))?;
    let balance = read_balance(&dir.join("balance.gz"))?;
    let tip_path = dir.join("tip");
    let tip_text = std::fs::read_to_string(&tip_path).map_err(|e| io_err(&tip_path, e))?;
    let tip = tip_text
        .trim()
        .parse::<BlockHash>()
        .unwrap_or_else(|_| BlockHash::all_zeros());
    Ok((unspent, balance, tip))
}

fn write_unspent(path: &Path, unspent: &UnspentMap) -> Result<()> {
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::fast());
    for (txid, outputs) in unspent.iter() {
        let mut line = txid.to_hex();
        for (index, output) in outputs.iter() {
            line.push(',');
            line.push_str(&index.to_string());
            line.push(' ');
            line.push_str(output.address.as_str());
            line.push(' ');
            line.push_str(&output.value_sat.to_string());
        }
        line.push('\n');
        encoder.write_all(line.as_bytes()).map_err(|e| io_err(path, e))?;
    }
    encoder.finish().map_err(|e| io_err(path, e))?;
    Ok(())
}

fn write_balance(path: &Path, balance: &BalanceMap) -> Result<()> {
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::fast());

    // sort by satoshis desc, ties broken by serialized line length asc:
    // load-bearing for byte-for-byte reproducibility near dust thresholds,
    // where equal balances are common.
    let mut lines: Vec<(String, u64)> = balance
        .iter()
        .map(|(addr, value)| (format!("{} {}\n", addr.as_str(), value), *value))
        .collect();
    lines.sort_by(|(la, va), (lb, vb)| vb.cmp(va).then_with(|| la.len().cmp(&lb.len())));

    for (line, _) in lines {
        encoder.write_all(line.as_bytes()).map_err(|e| io_err(path, e))?;
    }
    encoder.finish().map_err(|e| io_err(path, e))?;
    Ok(())
}

fn read_unspent(path: &Path) -> Result<UnspentMap> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let reader = BufReader::new(GzDecoder::new(file));
    let mut unspent = UnspentMap::default();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| io_err(path, e))?;
        match parse_unspent_line(&line) {
            Some((txid, outputs)) => {
                unspent.insert(txid, outputs);
            }
            None => warn!("malformed unspent.gz line {}: {:?}", lineno, line),
        }
    }
    Ok(unspent)
}

fn parse_unspent_line(line: &str) -> Option<(TxId, FxHashMap<u16, Output>)> {
    let mut fields = line.split(',');
    let txid = parse_txid_hex(fields.next()?)?;
    let mut outputs = FxHashMap::default();
    for field in fields {
        let mut tokens = field.split(' ');
        let index: u16 = tokens.next()?.parse().ok()?;
        let address = tokens.next()?;
        let value: u64 = tokens.next()?.parse().ok()?;
        if tokens.next().is_some() {
            return None;
        }
        outputs.insert(
            index,
            Output {
                address: Address::from_raw(address),
                value_sat: value,
            },
        );
    }
    if outputs.is_empty() {
        return None;
    }
    Some((txid, outputs))
}

fn parse_txid_hex(hex: &str) -> Option<TxId> {
    if hex.len() != 64 {
        return None;
    }
    let mut bytes = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let s = std::str::from_utf8(chunk).ok()?;
        bytes[i] = u8::from_str_radix(s, 16).ok()?;
    }
    bytes.reverse();
    Some(TxId(bytes))
}

fn read_balance(path: &Path) -> Result<BalanceMap> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let reader = BufReader::new(GzDecoder::new(file));
    let mut balance = BalanceMap::default();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| io_err(path, e))?;
        match parse_balance_line(&line) {
            Some((address, value)) => match balance.entry(address) {
                Entry::Occupied(_) => warn!("malformed balance.gz line {}: duplicate address", lineno),
                Entry::Vacant(v) => {
                    v.insert(value);
                }
            },
            None => warn!("malformed balance.gz line {}: {:?}", lineno, line),
        }
    }
    Ok(balance)
}

fn parse_balance_line(line: &str) -> Option<(Address, u64)> {
    let (address, value) = line.rsplit_once(' ')?;
    if address.is_empty() {
        return None;
    }
    let value: u64 = value.parse().ok()?;
    if value == 0 {
        return None;
    }
    Some((Address::from_raw(address), value))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();

        let mut unspent = UnspentMap::default();
        let mut inner = FxHashMap::default();
        inner.insert(
            0u16,
            Output {
                address: Address::from_raw("addr1"),
                value_sat: 100,
            },
        );
        inner.insert(
            1u16,
            Output {
                address: Address::from_raw("addr2"),
                value_sat: 200,
            },
        );
        unspent.insert(TxId([7u8; 32]), inner);

        let mut balance = BalanceMap::default();
        balance.insert(Address::from_raw("addr1"), 100);
        balance.insert(Address::from_raw("addr2"), 200);

        let tip = BlockHash::from_slice(&[3u8; 32]).unwrap();
        write_snapshot(dir.path(), &unspent, &balance, tip).unwrap();
        let (unspent2, balance2, tip2) = read_snapshot(dir.path()).unwrap();
        assert_eq!(tip2, tip);

        assert_eq!(unspent2.len(), 1);
        let inner2 = unspent2.get(&TxId([7u8; 32])).unwrap();
        assert_eq!(inner2.len(), 2);
        assert_eq!(inner2[&0].value_sat, 100);
        assert_eq!(balance2.len(), 2);
        assert_eq!(balance2[&Address::from_raw("addr1")], 100);
    }

    #[test]
    fn test_balance_sort_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut balance = BalanceMap::default();
        balance.insert(Address::from_raw("short"), 100);
        balance.insert(Address::from_raw("longer_address"), 100);
        balance.insert(Address::from_raw("biggest"), 500);
        write_balance(&dir.path().join("balance.gz"), &balance).unwrap();

        let file = File::open(dir.path().join("balance.gz")).unwrap();
        let reader = BufReader::new(GzDecoder::new(file));
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines[0], "biggest 500");
        assert_eq!(lines[1], "short 100");
        assert_eq!(lines[2], "longer_address 100");
    }

    #[test]
    fn test_malformed_lines_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unspent.gz");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = GzEncoder::new(file, Compression::fast());
            encoder.write_all(b"not,a,valid,line\n").unwrap();
            encoder
                .write_all(format!("{},0 addrX 42\n", TxId([1u8; 32]).to_hex()).as_bytes())
                .unwrap();
            encoder.finish().unwrap();
        }
        let loaded = read_unspent(&path).unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
