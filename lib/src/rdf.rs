//! Optional RDF/N-Quads dump: one `.rdf.gz` per input block file.
//!
//! One line per block/transaction/input/output fact, rather than grouping
//! multiple inputs or outputs referencing the same prev-tx or address onto
//! a single coalesced statement.
//!
//! Unlike the balance/UTXO path, this dump needs no chain assembly: each
//! input file is processed independently and does not depend on
//! main-chain order.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use bitcoin::hashes::Hash;
use bitcoin::{Block, Network};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;

use crate::block_source::FsBlock;
use crate::error::{Error, Result};
use crate::types::{Address, COINBASE_VOUT};

fn io_err(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.to_owned(),
        source,
    }
}

/// Reads and decodes every block of `path` (one `blk?????.dat` file) and
/// writes `<outdir>/<file_idx>.rdf.gz`.
pub fn export_file(path: &Path, file_idx: u32, network: Network, outdir: &Path) -> Result<()> {
    std::fs::create_dir_all(outdir).map_err(|e| io_err(outdir, e))?;
    let out_path = outdir.join(format!("{}.rdf.gz", file_idx));
    let out_file = File::create(&out_path).map_err(|e| io_err(&out_path, e))?;
    let mut encoder = GzEncoder::new(out_file, Compression::fast());

    let mut seen = std::collections::HashSet::new();
    let blocks = crate::block_source::read_file(path, file_idx, network, &mut seen)?;
    for fs_block in &blocks {
        let block = fs_block.parse()?;
        write_block(&mut encoder, fs_block, &block, network).map_err(|e| io_err(&out_path, e))?;
    }
    encoder.finish().map_err(|e| io_err(&out_path, e))?;
    info!("wrote {:?} ({} blocks)", out_path, blocks.len());
    Ok(())
}

fn write_block<W: Write>(w: &mut W, fs_block: &FsBlock, block: &Block, network: Network) -> std::io::Result<()> {
    writeln!(w, "<{}> <p> <{}> .", fs_block.hash, fs_block.prev)?;
    writeln!(
        w,
        "<{}> <ts> \"{}\"^^<xs:dateTime> .",
        fs_block.hash,
        format_rfc3339(block.header.time)
    )?;

    for tx in block.txdata.iter() {
        let txid = tx.txid();
        writeln!(w, "<{}> <tx> <{}> .", fs_block.hash, txid)?;

        for (vin_index, input) in tx.input.iter().enumerate() {
            if input.previous_output.vout == COINBASE_VOUT {
                writeln!(
                    w,
                    "<{}> <i> <{}> (n={}) .",
                    txid, fs_block.hash, vin_index
                )?;
            } else {
                writeln!(
                    w,
                    "<{}> <i> <{}> (n={}) .",
                    txid,
                    input.previous_output.txid,
                    vin_index
                )?;
            }
        }

        for (vout_index, output) in tx.output.iter().enumerate() {
            let address = Address::from_script(&output.script_pubkey, network);
            if address.is_undecodable() {
                continue;
            }
            let btc = output.value as f64 / 1e8;
            writeln!(
                w,
                "<{}> <o> <{}> (v={}, n={}) .",
                txid,
                address,
                btc,
                vout_index
            )?;
        }
    }
    Ok(())
}

/// Formats a Unix timestamp as an RFC3339 UTC string with second
/// resolution (`YYYY-MM-DDTHH:MM:SSZ`), hand-rolled civil-calendar
/// arithmetic (Howard Hinnant's `days_from_civil`) rather than an
/// unjustified new dependency for one call site.
fn format_rfc3339(unix_time: u32) -> String {
    let days = unix_time as i64 / 86_400;
    let secs_of_day = unix_time as i64 % 86_400;
    let (year, month, day) = civil_from_days(days);
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year, month, day, hour, minute, second
    )
}

/// <http://howardhinnant.github.io/date_algorithms.html#civil_from_days>
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64; // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365; // [0, 399]
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11]
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32; // [1, 31]
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32; // [1, 12]
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_format_rfc3339_epoch() {
        assert_eq!(format_rfc3339(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_format_rfc3339_genesis_block_time() {
        // bitcoin mainnet genesis block timestamp
        assert_eq!(format_rfc3339(1_231_006_505), "2009-01-03T18:15:05Z");
    }
}
