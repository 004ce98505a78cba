//! On-tape TLV framing.
//!
//! Version files and packs are concatenations of TLVs. Each TLV starts with
//! a fixed 32-byte big-endian header:
//!
//! ```text
//! magic[8]   89 54 4C 56 0D 0A 1A 0A
//! dlen       u64  body length
//! dhash      u64  xxhash64 of the body
//! version    u8   0
//! tag        [2]  ASCII pair identifying the record type
//! hashtype   u8   8 (xxhash64)
//! pad        [2]
//! hhash      u16  xxhash64 of the first 30 header bytes, truncated
//! ```
//!
//! The body is a MessagePack value envelope (see [`value`]) wrapping one of
//! the record types in [`records`]. Decoding is strictly forward-streaming;
//! callers note the stream position before and after each read so the
//! absolute byte offset of every record is known.

mod records;
mod value;

pub use records::{
    read_block, read_meta_file, read_pack_list, read_version, write_block, write_meta_file,
    write_pack_list, write_version, Block, MetaFile, MetaReference, PackEntry, PackReference,
    Range, StoredPack, VersionId,
};

use crate::error::{RestoreError, Result};
use std::hash::Hasher;
use std::io::{Read, Write};
use tracing::warn;
use twox_hash::XxHash64;

pub const TLV_HEADER_LEN: usize = 32;

const TLV_MAGIC: [u8; 8] = [0x89, b'T', b'L', b'V', 0x0D, 0x0A, 0x1A, 0x0A];
const TLV_VERSION: u8 = 0;
const HASH_TYPE_XXHASH64: u8 = 8;

/// Record types carried in version and pack files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Block,
    PackList,
    Version,
    DeleteVersion,
    MetaFile,
}

impl Tag {
    pub fn bytes(self) -> [u8; 2] {
        match self {
            Tag::Block => *b"bk",
            Tag::PackList => *b"ol",
            Tag::Version => *b"vm",
            Tag::DeleteVersion => *b"vd",
            Tag::MetaFile => *b"mf",
        }
    }

    fn from_bytes(bytes: [u8; 2]) -> Option<Self> {
        match &bytes {
            b"bk" => Some(Tag::Block),
            b"ol" => Some(Tag::PackList),
            b"vm" => Some(Tag::Version),
            b"vd" => Some(Tag::DeleteVersion),
            b"mf" => Some(Tag::MetaFile),
            _ => None,
        }
    }
}

/// A decoded TLV header. The body has not been consumed yet.
#[derive(Debug, Clone, Copy)]
pub struct Tlv {
    pub tag: Tag,
    pub data_len: u64,
    data_hash: u64,
}

pub(crate) fn xxh64(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

/// Read the next TLV header.
///
/// Returns `None` at end of stream. A short header, bad magic, integrity
/// failure or unknown tag also ends the stream; all but plain EOF log a
/// warning first. They never abort the run.
pub fn read_tlv<R: Read>(reader: &mut R) -> Option<Tlv> {
    let mut header = [0u8; TLV_HEADER_LEN];
    let mut filled = 0;
    while filled < TLV_HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) => {
                if filled > 0 {
                    warn!("short TLV header: {} of {} bytes", filled, TLV_HEADER_LEN);
                }
                return None;
            }
            Ok(n) => filled += n,
            Err(e) => {
                warn!("TLV header read failed: {}", e);
                return None;
            }
        }
    }

    if header[0..8] != TLV_MAGIC {
        warn!("bad TLV magic: {:02x?}", &header[0..8]);
        return None;
    }

    let data_len = u64::from_be_bytes(header[8..16].try_into().unwrap());
    let data_hash = u64::from_be_bytes(header[16..24].try_into().unwrap());
    let version = header[24];
    let tag_bytes: [u8; 2] = header[25..27].try_into().unwrap();
    let hash_type = header[27];
    let header_hash = u16::from_be_bytes(header[30..32].try_into().unwrap());

    if version != TLV_VERSION {
        warn!("unsupported TLV version {}", version);
        return None;
    }
    if hash_type != HASH_TYPE_XXHASH64 {
        warn!("unsupported TLV hash type {}", hash_type);
        return None;
    }
    if header_hash != (xxh64(&header[0..30]) as u16) {
        warn!("TLV header hash mismatch");
        return None;
    }

    match Tag::from_bytes(tag_bytes) {
        Some(tag) => Some(Tlv {
            tag,
            data_len,
            data_hash,
        }),
        None => {
            warn!(
                "unknown TLV tag {:?}",
                String::from_utf8_lossy(&tag_bytes)
            );
            None
        }
    }
}

/// Consume and verify the body belonging to `tlv`.
pub(crate) fn read_body<R: Read>(reader: &mut R, tlv: &Tlv) -> Result<Vec<u8>> {
    let mut body = vec![0u8; tlv.data_len as usize];
    reader
        .read_exact(&mut body)
        .map_err(|e| RestoreError::codec(format!("short TLV body read: {}", e)))?;
    if xxh64(&body) != tlv.data_hash {
        return Err(RestoreError::codec("TLV body hash mismatch"));
    }
    Ok(body)
}

/// Write one complete TLV (header plus body).
pub fn write_tlv<W: Write>(writer: &mut W, tag: Tag, body: &[u8]) -> Result<()> {
    let mut header = [0u8; TLV_HEADER_LEN];
    header[0..8].copy_from_slice(&TLV_MAGIC);
    header[8..16].copy_from_slice(&(body.len() as u64).to_be_bytes());
    header[16..24].copy_from_slice(&xxh64(body).to_be_bytes());
    header[24] = TLV_VERSION;
    header[25..27].copy_from_slice(&tag.bytes());
    header[27] = HASH_TYPE_XXHASH64;
    let header_hash = xxh64(&header[0..30]) as u16;
    header[30..32].copy_from_slice(&header_hash.to_be_bytes());

    writer.write_all(&header)?;
    writer.write_all(body)?;
    Ok(())
}
