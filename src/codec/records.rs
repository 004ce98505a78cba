//! Record bodies carried inside TLVs.
//!
//! Field keys are single characters fixed by the on-tape format; empty,
//! zero and false fields are omitted on encode and defaulted on decode.

use super::value;
use super::{Tag, Tlv};
use crate::error::{RestoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// A byte range as `(start, len)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    #[serde(rename = "s", default, skip_serializing_if = "is_zero")]
    pub start: i64,

    #[serde(rename = "l", default, skip_serializing_if = "is_zero")]
    pub len: i64,
}

impl Range {
    pub fn new(start: i64, len: i64) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> i64 {
        self.start + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.start == 0 && self.len == 0
    }

    /// True when `self` begins exactly where `prev` ends.
    pub fn follows(&self, prev: &Range) -> bool {
        self.start == prev.end()
    }
}

/// Physical and logical location of one contiguous slice of one object
/// version: which pack holds it, where the bytes sit within the original
/// object (`source_range`) and within the pack file (`pack_range`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackEntry {
    #[serde(rename = "p")]
    pub pack: String,

    #[serde(rename = "o", default, skip_serializing_if = "Range::is_empty")]
    pub source_range: Range,

    #[serde(rename = "t", default, skip_serializing_if = "Range::is_empty")]
    pub pack_range: Range,

    /// Per-sub-block lengths, used only to skip blocks without reading them.
    /// The streaming reader always reads sequentially and ignores these.
    #[serde(rename = "E", default, skip_serializing_if = "Vec::is_empty")]
    pub block_lens: Vec<i32>,

    #[serde(rename = "N", default, skip_serializing_if = "Vec::is_empty")]
    pub source_lens: Vec<i32>,
}

impl PackEntry {
    pub fn new(pack: impl Into<String>, logical_start: i64, logical_end: i64) -> Self {
        Self {
            pack: pack.into(),
            source_range: Range::new(logical_start, logical_end - logical_start),
            pack_range: Range::default(),
            block_lens: Vec::new(),
            source_lens: Vec::new(),
        }
    }

    pub fn set_physical_location(&mut self, pack: impl Into<String>, start: i64, end: i64) {
        self.pack = pack.into();
        self.pack_range = Range::new(start, end - start);
    }

    pub fn physical_start(&self) -> i64 {
        self.pack_range.start
    }

    pub fn physical_end(&self) -> i64 {
        self.pack_range.end()
    }

    pub fn logical_start(&self) -> i64 {
        self.source_range.start
    }

    /// Merge a physically and logically adjacent entry from the same pack
    /// into this one. Returns false (and leaves `self` alone) otherwise.
    pub fn try_merge(&mut self, next: &PackEntry) -> bool {
        if next.pack != self.pack
            || !next.pack_range.follows(&self.pack_range)
            || !next.source_range.follows(&self.source_range)
        {
            return false;
        }
        self.source_range.len += next.source_range.len;
        self.pack_range.len += next.pack_range.len;
        true
    }
}

/// Composite identity of one object version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionId {
    #[serde(rename = "b")]
    pub bucket: String,

    #[serde(rename = "o")]
    pub object: String,

    #[serde(rename = "v")]
    pub version: String,
}

impl VersionId {
    pub fn new(
        bucket: impl Into<String>,
        object: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
            version: version.into(),
        }
    }

    pub fn bucket_key(&self) -> String {
        format!("{}/{}", self.bucket, self.object)
    }

    /// The single-string form used by records stored inside packs:
    /// `<version-ulid>:<bucket>/<object>`.
    pub fn composite(&self) -> String {
        format!("{}:{}/{}", self.version, self.bucket, self.object)
    }
}

/// Pointer from a version record to a pack-list stored inside a pack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackReference {
    #[serde(rename = "k")]
    pub pack: String,

    #[serde(rename = "r", default, skip_serializing_if = "Range::is_empty")]
    pub range: Range,
}

/// Body of a VERSION or DELETEVERSION record.
///
/// The payload is in exactly one place: inline in `data`, behind the
/// `packs` list, or behind `reference` (a pack-list to be found inside a
/// pack) — unless the record is a delete marker or a deletion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaReference {
    #[serde(rename = "i")]
    pub id: VersionId,

    #[serde(rename = "t", default, skip_serializing_if = "is_zero")]
    pub time: i64,

    #[serde(rename = "u", default, skip_serializing_if = "is_zero")]
    pub modified: i64,

    #[serde(rename = "l", default, skip_serializing_if = "is_zero")]
    pub len: i64,

    #[serde(rename = "e", default, skip_serializing_if = "String::is_empty")]
    pub etag: String,

    /// The version itself was deleted; its rows must be dropped.
    #[serde(rename = "X", default, skip_serializing_if = "is_false")]
    pub deleted: bool,

    /// S3 delete marker: a version with no data.
    #[serde(rename = "d", default, skip_serializing_if = "is_false")]
    pub delete_marker: bool,

    #[serde(rename = "N", default, skip_serializing_if = "is_false")]
    pub null_version: bool,

    #[serde(rename = "D", default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub data: Option<Vec<u8>>,

    #[serde(rename = "p", default, skip_serializing_if = "Vec::is_empty")]
    pub packs: Vec<PackEntry>,

    #[serde(rename = "R", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<PackReference>,

    #[serde(rename = "s", default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,

    #[serde(rename = "m", default, skip_serializing_if = "HashMap::is_empty")]
    pub user_metadata: HashMap<String, String>,
}

impl MetaReference {
    pub fn bucket_key(&self) -> String {
        self.id.bucket_key()
    }

    pub fn version(&self) -> &str {
        &self.id.version
    }
}

/// Body of a PACKLIST record stored inside a pack: the full list of pack
/// entries making up one version's data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredPack {
    #[serde(rename = "I", default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(rename = "U", default, skip_serializing_if = "String::is_empty")]
    pub upload: String,

    #[serde(rename = "P", default, skip_serializing_if = "Vec::is_empty")]
    pub packs: Vec<PackEntry>,
}

/// Body of a METAFILE record: marks the start of a full metadata dump.
/// Version files older than `oldest` are superseded and skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaFile {
    #[serde(rename = "o", default, skip_serializing_if = "String::is_empty")]
    pub oldest: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockRecord {
    #[serde(rename = "i")]
    id: VersionId,
}

/// One decoded BLOCK: the owning version identity plus the payload bytes.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: VersionId,
    pub data: Vec<u8>,
}

pub fn read_block<R: Read>(reader: &mut R, tlv: &Tlv) -> Result<Block> {
    let body = super::read_body(reader, tlv)?;
    let (record, data): (BlockRecord, Vec<u8>) = value::decode_record(&body)?;
    if data.is_empty() {
        return Err(RestoreError::codec("block record carries no payload"));
    }
    Ok(Block {
        id: record.id,
        data,
    })
}

pub fn read_pack_list<R: Read>(reader: &mut R, tlv: &Tlv) -> Result<Vec<PackEntry>> {
    let body = super::read_body(reader, tlv)?;
    let (stored, _): (StoredPack, _) = value::decode_record(&body)?;
    Ok(stored.packs)
}

pub fn read_version<R: Read>(reader: &mut R, tlv: &Tlv) -> Result<MetaReference> {
    let body = super::read_body(reader, tlv)?;
    let (record, _): (MetaReference, _) = value::decode_record(&body)?;
    Ok(record)
}

pub fn read_meta_file<R: Read>(reader: &mut R, tlv: &Tlv) -> Result<MetaFile> {
    let body = super::read_body(reader, tlv)?;
    let (record, _): (MetaFile, _) = value::decode_record(&body)?;
    Ok(record)
}

pub fn write_block<W: Write>(writer: &mut W, id: &VersionId, data: &[u8]) -> Result<()> {
    let record = BlockRecord { id: id.clone() };
    let body = value::encode_record(&record, Some(data))?;
    super::write_tlv(writer, Tag::Block, &body)
}

pub fn write_pack_list<W: Write>(writer: &mut W, stored: &StoredPack) -> Result<()> {
    let body = value::encode_record(stored, None)?;
    super::write_tlv(writer, Tag::PackList, &body)
}

pub fn write_version<W: Write>(writer: &mut W, record: &MetaReference) -> Result<()> {
    let tag = if record.deleted {
        Tag::DeleteVersion
    } else {
        Tag::Version
    };
    let body = value::encode_record(record, None)?;
    super::write_tlv(writer, tag, &body)
}

pub fn write_meta_file<W: Write>(writer: &mut W, meta: &MetaFile) -> Result<()> {
    let body = value::encode_record(meta, None)?;
    super::write_tlv(writer, Tag::MetaFile, &body)
}
