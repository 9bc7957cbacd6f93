//! Wires file discovery, the reader pool, the chain assembler and the
//! engine (and the RDF path) into the two public entry points,
//! [`export_balance`] and [`export_rdf`].
//!
//! A pool of `std::thread::available_parallelism()` reader threads pulls
//! file indices off a shared cursor and pushes read batches over a
//! bounded `sync_channel` to a single consumer, which reassembles and
//! applies blocks on the calling thread.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::assembler::ChainAssembler;
use crate::block_source::{self, FsBlock};
use crate::config::{BalanceConfig, RdfConfig};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::period::PeriodCounter;
use crate::rdf;
use crate::snapshot;

/// Replays the block store named by `config.datadir` and writes UTXO +
/// balance snapshots to `config.outdir`.
///
/// Resumes from the furthest `{file_idx}.{block_count}` directory not
/// past `config.block`, if any, then reads the remaining `blk*.dat` files
/// with a pool of reader threads, reassembles them into main-chain order
/// and applies them to the engine one at a time, writing a snapshot every
/// `config.snapshot` newly fully-applied files and once more at the end
/// of the run.
pub fn export_balance(config: &BalanceConfig) -> Result<()> {
    let network = config.magic;

    let resume = block_source::find_resume_dir(&config.outdir, config.block)?;
    let (mut engine, start_file_idx, mut tip) = match resume {
        Some((file_idx, block_count, dir)) => {
            info!(
                "resuming from {:?}: file_idx {}, {} blocks applied",
                dir, file_idx, block_count
            );
            let (unspent, balance, tip) = snapshot::read_snapshot(&dir)?;
            (
                Engine::from_snapshot(network, unspent, balance, block_count),
                file_idx + 1,
                tip,
            )
        }
        None => (Engine::new(network), 0, BlockHash::all_zeros()),
    };

    if engine.applied_blocks() >= config.block {
        info!(
            "already at {} applied blocks, requested height {} reached",
            engine.applied_blocks(),
            config.block
        );
        return Ok(());
    }

    let blocks_dir = config.datadir.join("blocks");
    let files: Vec<(u32, PathBuf)> = block_source::discover_block_files(&blocks_dir)?
        .into_iter()
        .filter(|(idx, _)| *idx >= start_file_idx)
        .collect();

    if files.is_empty() {
        warn!("no block files at or after index {}, nothing to do", start_file_idx);
        return Ok(());
    }

    let parallelism = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    info!("reading {} block files with {} worker threads", files.len(), parallelism);

    let (batch_tx, batch_rx) = sync_channel::<(u32, Result<Vec<FsBlock>>)>(parallelism);
    let files = Arc::new(files);
    let next_index = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(HashSet::new()));

    let mut workers = Vec::with_capacity(parallelism);
    for _ in 0..parallelism {
        let files = Arc::clone(&files);
        let next_index = Arc::clone(&next_index);
        let seen = Arc::clone(&seen);
        let batch_tx = batch_tx.clone();
        workers.push(thread::spawn(move || loop {
            let i = next_index.fetch_add(1, Ordering::SeqCst);
            let (file_idx, path) = match files.get(i) {
                Some(entry) => entry,
                None => break,
            };
            let result = {
                let mut seen = seen.lock().expect("seen-block set poisoned");
                block_source::read_file(path, *file_idx, network, &mut seen)
            };
            let is_err = result.is_err();
            if batch_tx.send((*file_idx, result)).is_err() || is_err {
                break;
            }
        }));
    }
    drop(batch_tx);

    let mut assembler = ChainAssembler::new(tip);
    let mut bench = PeriodCounter::new(Duration::from_secs(10));

    let mut completed: HashSet<u32> = HashSet::new();
    let mut next_contiguous = start_file_idx;
    let mut last_committed_file_idx = start_file_idx.saturating_sub(1);
    let mut files_since_snapshot: u32 = 0;

    let mut run_result: Result<()> = Ok(());
    'recv: for (file_idx, result) in batch_rx.iter() {
        let batch = match result {
            Ok(batch) => batch,
            Err(e) => {
                run_result = Err(e);
                break 'recv;
            }
        };

        completed.insert(file_idx);
        let mut newly_committed = 0u32;
        while completed.remove(&next_contiguous) {
            last_committed_file_idx = next_contiguous;
            next_contiguous += 1;
            newly_committed += 1;
        }
        files_since_snapshot += newly_committed;

        assembler.push_batch(batch);
        for fs_block in assembler.drain_ready() {
            let block = match fs_block.parse() {
                Ok(block) => block,
                Err(e) => {
                    run_result = Err(e);
                    break 'recv;
                }
            };
            let tx_count = block.txdata.len() as u64;
            if let Err(e) = engine.apply_block(fs_block.hash, &block) {
                run_result = Err(e);
                break 'recv;
            }
            tip = fs_block.hash;
            bench.count_block(tx_count);
            if let Some(stats) = bench.period_elapsed() {
                info!("tip {} | {}", tip, stats);
            }
            if engine.applied_blocks() >= config.block {
                break 'recv;
            }
        }

        if config.snapshot > 0 && files_since_snapshot >= config.snapshot {
            match applied_watermark(last_committed_file_idx, &assembler) {
                Some(safe_file_idx) => {
                    files_since_snapshot = 0;
                    if let Err(e) = write_balance_snapshot(config, &engine, safe_file_idx, tip) {
                        run_result = Err(e);
                        break 'recv;
                    }
                }
                None => {
                    debug!(
                        "deferring snapshot: a block from file {} is still waiting on its predecessor",
                        assembler.min_pending_file_idx().unwrap_or(0)
                    );
                }
            }
        }
    }

    drop(batch_rx);
    for worker in workers {
        if worker.join().is_err() {
            run_result = run_result.and(Err(Error::ReaderPanicked));
        }
    }
    run_result?;

    let final_file_idx = applied_watermark(last_committed_file_idx, &assembler);

    let dangling = assembler.into_dangling();
    if !dangling.is_empty() {
        warn!(
            "{} block(s) never found their predecessor and were dropped at end of run",
            dangling.len()
        );
    }

    match final_file_idx {
        Some(file_idx) => write_balance_snapshot(config, &engine, file_idx, tip)?,
        None => warn!("no block file was fully applied; skipping final snapshot write"),
    }
    info!(
        "done: {} blocks applied, tip {}",
        engine.applied_blocks(),
        tip
    );
    Ok(())
}

/// The largest file index up to which every block has actually been
/// applied to the engine, not merely read off disk. A block read from
/// file `k` can still be sitting in the assembler's pending buffer
/// waiting on a predecessor that lives in a later file, so the
/// contiguous-read watermark alone is not a safe resume boundary:
/// skipping file `k` on a later resume would permanently lose that block.
/// Returns `None` if no file is safe to record yet.
fn applied_watermark(last_committed_file_idx: u32, assembler: &ChainAssembler) -> Option<u32> {
    match assembler.min_pending_file_idx() {
        Some(0) => None,
        Some(min_pending_file_idx) => Some(last_committed_file_idx.min(min_pending_file_idx - 1)),
        None => Some(last_committed_file_idx),
    }
}

fn write_balance_snapshot(config: &BalanceConfig, engine: &Engine, file_idx: u32, tip: BlockHash) -> Result<()> {
    let dir = config
        .outdir
        .join(format!("{}.{}", file_idx, engine.applied_blocks()));
    snapshot::write_snapshot(&dir, engine.unspent(), engine.balance(), tip)?;
    info!("wrote snapshot {:?}", dir);
    Ok(())
}

/// Exports one `<file_idx>.rdf.gz` per input block file under
/// `config.datadir`, independently and in parallel; no chain assembly is
/// needed since each file's RDF dump is self-contained.
pub fn export_rdf(config: &RdfConfig) -> Result<()> {
    let network = config.magic;
    let blocks_dir = config.datadir.join("blocks");
    let files = block_source::discover_block_files(&blocks_dir)?;

    if files.is_empty() {
        warn!("no block files found under {:?}", blocks_dir);
        return Ok(());
    }

    info!("exporting rdf for {} block files", files.len());
    files
        .par_iter()
        .try_for_each(|(file_idx, path)| rdf::export_file(path, *file_idx, network, &config.outdir))?;
    info!("done");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::BalanceConfig;
    use bitcoin::consensus::Encodable;
    use bitcoin::Network;
    use std::fs::File;
    use std::io::Write;
    use test_log::test;

    fn write_blk_file(path: &std::path::Path, network: Network, blocks: &[bitcoin::Block]) {
        let mut file = File::create(path).unwrap();
        for block in blocks {
            let magic = network.magic().to_bytes();
            file.write_all(&magic).unwrap();
            let mut encoded = Vec::new();
            block.consensus_encode(&mut encoded).unwrap();
            file.write_all(&(encoded.len() as u32).to_le_bytes()).unwrap();
            file.write_all(&encoded).unwrap();
        }
    }

    #[test]
    fn test_export_balance_from_scratch_single_file() {
        let datadir = tempfile::tempdir().unwrap();
        let outdir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(datadir.path().join("blocks")).unwrap();

        let genesis = bitcoin::blockdata::constants::genesis_block(Network::Regtest);
        write_blk_file(&datadir.path().join("blocks").join("blk00000.dat"), Network::Regtest, &[genesis.clone()]);

        let config = BalanceConfig::new(1, 10, datadir.path().to_owned(), Network::Regtest, outdir.path().to_owned());
        export_balance(&config).unwrap();

        let entries: Vec<_> = std::fs::read_dir(outdir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert!(entries.iter().any(|n| n.to_str() == Some("0.1")));
    }

    fn fake_pending_block(hash: [u8; 32], prev: [u8; 32], file_idx: u32) -> FsBlock {
        let file = std::sync::Arc::new(std::sync::Mutex::new(tempfile::tempfile().unwrap()));
        FsBlock {
            file,
            file_idx,
            start: 0,
            end: 0,
            hash: BlockHash::from_slice(&hash).unwrap(),
            prev: BlockHash::from_slice(&prev).unwrap(),
        }
    }

    #[test]
    fn test_applied_watermark_holds_back_for_pending_block_in_earlier_file() {
        let genesis = BlockHash::all_zeros();

        // nothing pending: the read watermark is already a safe watermark.
        let assembler = ChainAssembler::new(genesis);
        assert_eq!(applied_watermark(7, &assembler), Some(7));

        // a block read from file 3 is still waiting on its predecessor, so
        // file 3 (and anything after it) cannot be recorded as applied yet,
        // even though files up to 7 have been fully read.
        let mut assembler = ChainAssembler::new(genesis);
        assembler.push_batch(vec![fake_pending_block([1u8; 32], [2u8; 32], 3)]);
        assert_eq!(applied_watermark(7, &assembler), Some(2));

        // nothing at all is safe when the earliest pending block came from
        // file 0.
        let mut assembler = ChainAssembler::new(genesis);
        assembler.push_batch(vec![fake_pending_block([1u8; 32], [2u8; 32], 0)]);
        assert_eq!(applied_watermark(7, &assembler), None);
    }

    #[test]
    fn test_export_balance_nothing_to_do_when_already_past_height() {
        let datadir = tempfile::tempdir().unwrap();
        let outdir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(datadir.path().join("blocks")).unwrap();
        std::fs::create_dir_all(outdir.path().join("0.5")).unwrap();

        let unspent = crate::engine::UnspentMap::default();
        let balance = crate::engine::BalanceMap::default();
        snapshot::write_snapshot(&outdir.path().join("0.5"), &unspent, &balance, BlockHash::all_zeros()).unwrap();

        let config = BalanceConfig::new(5, 10, datadir.path().to_owned(), Network::Regtest, outdir.path().to_owned());
        assert!(export_balance(&config).is_ok());
    }
}
