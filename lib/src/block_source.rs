//! Block-file reading and file discovery.
//!
//! A `blk?????.dat` file is a concatenation of `<magic:4><length:4 LE><block
//! bytes>` framings. [`detect`] scans a whole file once using a rolling
//! 4-byte window to find magic without backtracking; the resulting
//! [`FsBlock`] handles keep only the byte range of each block, not the
//! block itself, so the chain assembler's pending buffer stays small even
//! with tens of thousands of blocks queued.

use std::collections::HashSet;
use std::convert::TryInto;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bitcoin::consensus::Decodable;
use bitcoin::hashes::Hash;
use bitcoin::{Block, BlockHash, Network};
use log::{error, info};

use crate::error::{Error, Result};

/// One block's location inside a `blk?????.dat` file, plus the hash
/// linkage the chain assembler needs. The block itself is re-read from
/// disk lazily via [`FsBlock::parse`] rather than carried in memory, so
/// the assembler's pending map never holds more than a handful of
/// small structs per in-flight block.
pub struct FsBlock {
    pub file: Arc<Mutex<File>>,
    pub file_idx: u32,
    pub start: u64,
    pub end: u64,
    pub hash: BlockHash,
    pub prev: BlockHash,
}

impl FsBlock {
    /// Re-reads and decodes the full block from its backing file.
    pub fn parse(&self) -> Result<Block> {
        let mut file = self.file.lock().expect("fs block file mutex poisoned");
        file.seek(SeekFrom::Start(self.start))
            .map_err(|source| Error::Io {
                path: PathBuf::from(format!("blk{:05}.dat", self.file_idx)),
                source,
            })?;
        let mut bytes = vec![0u8; (self.end - self.start) as usize];
        file.read_exact(&mut bytes).map_err(|source| Error::Io {
            path: PathBuf::from(format!("blk{:05}.dat", self.file_idx)),
            source,
        })?;
        drop(file);
        Block::consensus_decode(&mut bytes.as_slice()).map_err(|e| {
            error!("block at {:?}:{}..{} failed to decode: {}", self.file_idx, self.start, self.end, e);
            Error::Io {
                path: PathBuf::from(format!("blk{:05}.dat", self.file_idx)),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
            }
        })
    }
}

struct DetectedBlock {
    start: u64,
    end: u64,
    hash: BlockHash,
    prev: BlockHash,
}

/// Scans `reader` for `<magic><len><block>` framings, stopping at the
/// first block that fails to parse (a truncated tail is common and
/// benign).
fn detect<R: Read + Seek>(reader: &mut R, magic: u32) -> Vec<DetectedBlock> {
    let mut rolling = RollingU32::default();
    let mut detected = Vec::with_capacity(128);

    loop {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte) {
            Ok(()) => {
                rolling.push(byte[0]);
                if magic != rolling.as_u32() {
                    continue;
                }
            }
            Err(_) => break, // EOF
        }
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).is_err() {
            break;
        }
        let size = u32::from_le_bytes(len_buf) as u64;
        let start = match reader.stream_position() {
            Ok(pos) => pos,
            Err(_) => break,
        };
        let mut block_bytes = vec![0u8; size as usize];
        if reader.read_exact(&mut block_bytes).is_err() {
            break;
        }
        match Block::consensus_decode(&mut block_bytes.as_slice()) {
            Ok(block) => {
                let end = start + size;
                let hash = block.header.block_hash();
                detected.push(DetectedBlock {
                    start,
                    end,
                    hash,
                    prev: block.header.prev_blockhash,
                });
            }
            Err(e) => {
                error!("block parse error, truncating file here: {}", e);
                break;
            }
        }
    }
    detected
}

/// Reads and detects every block in `path`, returning [`FsBlock`] handles.
/// Already-seen block hashes (possible across overlapping files during a
/// resume) are filtered out.
pub fn read_file(
    path: &Path,
    file_idx: u32,
    network: Network,
    seen: &mut HashSet<BlockHash>,
) -> Result<Vec<FsBlock>> {
    let file = File::open(path).map_err(|source| Error::Io {
        path: path.to_owned(),
        source,
    })?;
    let mut reader = BufReader::new(&file);
    let magic = u32::from_le_bytes(network.magic().to_bytes());
    let detected = detect(&mut reader, magic);
    drop(reader);

    let file = File::open(path).map_err(|source| Error::Io {
        path: path.to_owned(),
        source,
    })?;
    let file = Arc::new(Mutex::new(file));

    let blocks = detected
        .into_iter()
        .filter(|d| seen.insert(d.hash))
        .map(|d| FsBlock {
            file: Arc::clone(&file),
            file_idx,
            start: d.start,
            end: d.end,
            hash: d.hash,
            prev: d.prev,
        })
        .collect();
    Ok(blocks)
}

/// Implements a rolling u32: every `push`ed byte shifts the previous value
/// down by one byte, so a magic tag can be found in a single forward pass
/// without ever seeking backwards.
#[derive(Default, Copy, Clone)]
struct RollingU32(u32);
impl RollingU32 {
    fn push(&mut self, byte: u8) {
        self.0 >>= 8;
        self.0 |= (byte as u32) << 24;
    }
    fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Enumerates `<blocks_dir>/blk(\d+).dat`, returning `(file_idx, path)`
/// pairs sorted ascending by `file_idx` (component B).
pub fn discover_block_files(blocks_dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut pattern = blocks_dir.to_owned();
    pattern.push("blk*.dat");
    let pattern_str = pattern.to_string_lossy().into_owned();
    info!("listing block files at {}", pattern_str);

    let mut files = Vec::new();
    for entry in glob::glob(&pattern_str).map_err(|e| Error::Io {
        path: pattern.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
    })? {
        let path = entry.map_err(|e| Error::Io {
            path: pattern.clone(),
            source: e.into_error(),
        })?;
        if let Some(idx) = parse_file_index(&path) {
            files.push((idx, path));
        }
    }
    files.sort_by_key(|(idx, _)| *idx);
    info!("found {} block files", files.len());
    Ok(files)
}

fn parse_file_index(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?; // "blk00042"
    let digits = stem.strip_prefix("blk")?;
    digits.parse().ok()
}

/// Locates the resumable snapshot directory: the `{file_idx}.{block_count}`
/// subdirectory of `outdir` with the largest `block_count` not exceeding
/// `requested_height`.
pub fn find_resume_dir(outdir: &Path, requested_height: u32) -> Result<Option<(u32, u32, PathBuf)>> {
    let entries = match std::fs::read_dir(outdir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::Io {
                path: outdir.to_owned(),
                source,
            })
        }
    };

    let mut best: Option<(u32, u32, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|source| Error::Io {
            path: outdir.to_owned(),
            source,
        })?;
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(n) => n,
            None => continue,
        };
        let (file_idx, block_count) = match parse_resume_name(name) {
            Some(v) => v,
            None => continue,
        };
        if block_count > requested_height {
            continue;
        }
        if best.as_ref().map(|(_, b, _)| block_count > *b).unwrap_or(true) {
            best = Some((file_idx, block_count, entry.path()));
        }
    }
    Ok(best)
}

fn parse_resume_name(name: &str) -> Option<(u32, u32)> {
    let (file_idx, block_count) = name.split_once('.')?;
    Some((file_idx.parse().ok()?, block_count.parse().ok()?))
}

/// The reserved coinbase-input sentinel, re-exported here for callers that
/// only need file/discovery utilities. See [`crate::types::COINBASE_VOUT`].
pub use crate::types::COINBASE_VOUT;

#[cfg(test)]
mod test {
    use super::*;
    use bitcoin::consensus::Encodable;
    use std::io::Cursor;

    #[test]
    fn test_rolling() {
        let mut rolling = RollingU32::default();
        rolling.push(0x0B);
        assert_eq!(rolling.as_u32(), u32::from_be_bytes([0x0B, 0x00, 0x00, 0x00]));
        rolling.push(0x11);
        assert_eq!(rolling.as_u32(), u32::from_be_bytes([0x11, 0x0b, 0x00, 0x00]));
        rolling.push(0x09);
        assert_eq!(rolling.as_u32(), u32::from_be_bytes([0x09, 0x11, 0x0B, 0x00]));
        rolling.push(0x07);
        assert_eq!(rolling.as_u32(), u32::from_be_bytes([0x07, 0x09, 0x11, 0x0B]));
        assert_eq!(
            rolling.as_u32(),
            u32::from_le_bytes(bitcoin::Network::Testnet.magic().to_bytes())
        );
    }

    #[test]
    fn test_detect_stops_on_truncated_tail() {
        let magic = Network::Regtest.magic();
        let genesis = bitcoin::blockdata::constants::genesis_block(Network::Regtest);
        let mut buf = Vec::new();
        buf.extend_from_slice(&magic.to_bytes());
        let mut encoded = Vec::new();
        genesis.consensus_encode(&mut encoded).unwrap();
        buf.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        buf.extend_from_slice(&encoded);
        // truncated second framing: magic + length but no block bytes
        buf.extend_from_slice(&magic.to_bytes());
        buf.extend_from_slice(&999u32.to_le_bytes());

        let mut cursor = Cursor::new(buf);
        let detected = detect(&mut cursor, u32::from_le_bytes(magic.to_bytes()));
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].hash, genesis.block_hash());
        assert_eq!(detected[0].prev, genesis.header.prev_blockhash);
    }

    #[test]
    fn test_parse_file_index() {
        assert_eq!(parse_file_index(Path::new("/x/blk00042.dat")), Some(42));
        assert_eq!(parse_file_index(Path::new("/x/notablock.dat")), None);
    }

    #[test]
    fn test_parse_resume_name() {
        assert_eq!(parse_resume_name("3.150"), Some((3, 150)));
        assert_eq!(parse_resume_name("garbage"), None);
    }
}
