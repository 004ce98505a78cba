//! Row-level helpers for the three index relations.
//!
//! Block lists, pack entries and pack maps live in JSON columns; rows are
//! keyed by identifier strings. Every function here expects the caller to
//! hold the store's writer lock and hands it a raw connection.

use crate::codec::PackEntry;
use crate::error::{RestoreError, Result};
use crate::utils;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of a block row. Only `Ready` and `Cached` are assigned during
/// a healthy run; the rest are part of the persisted vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Ready = 0,
    Cached = 1,
    Deleted = 2,
    Orphaned = 3,
    Completed = 4,
}

impl BlockState {
    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(BlockState::Ready),
            1 => Ok(BlockState::Cached),
            2 => Ok(BlockState::Deleted),
            3 => Ok(BlockState::Orphaned),
            4 => Ok(BlockState::Completed),
            other => Err(RestoreError::index(format!("invalid block state {}", other))),
        }
    }
}

/// One pack-map slot: which block occupies a physical offset of a pack and
/// which version that block belongs to. Either side may still be unknown —
/// a stored pack-list reference registers a version with no block, an
/// orphan block registers a block with no version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackMapEntry {
    #[serde(rename = "bid", default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,

    #[serde(rename = "vid", default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

/// Physical start offset within the pack → occupant.
pub type PackMap = BTreeMap<i64, PackMapEntry>;

#[derive(Debug, Clone)]
pub struct VersionRow {
    pub bucket_key: String,
    pub in_record: bool,
    pub delete_marker: bool,
    pub is_pack_list: bool,
    pub completed: bool,
    pub block_list: Vec<String>,
}

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS versions (
             versionid    TEXT NOT NULL PRIMARY KEY,
             bucketkey    TEXT NOT NULL,
             inrecord     INTEGER NOT NULL DEFAULT 0,
             completed    INTEGER NOT NULL DEFAULT 0,
             deletemarker INTEGER NOT NULL DEFAULT 0,
             ispacklist   INTEGER NOT NULL DEFAULT 0,
             blocklist    BLOB
         );
         CREATE INDEX IF NOT EXISTS versions_bucketkey ON versions(bucketkey);
         CREATE TABLE IF NOT EXISTS blocks (
             blockid   TEXT NOT NULL PRIMARY KEY,
             state     INTEGER NOT NULL DEFAULT 0,
             blockinfo BLOB
         );
         CREATE TABLE IF NOT EXISTS packs (
             packid    TEXT NOT NULL PRIMARY KEY,
             tapeid    TEXT,
             blocklist BLOB
         );",
    )?;
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| RestoreError::index(format!("encode column: {}", e)))
}

fn from_json<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| RestoreError::index(format!("decode column: {}", e)))
}

// VERSIONS

pub fn insert_version(
    conn: &Connection,
    version_id: &str,
    bucket_key: &str,
    in_record: bool,
    delete_marker: bool,
    is_pack_list: bool,
    block_list: &[String],
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO versions
             (versionid, bucketkey, inrecord, deletemarker, ispacklist, blocklist)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            version_id,
            bucket_key,
            in_record,
            delete_marker,
            is_pack_list,
            to_json(&block_list)?,
        ],
    )?;
    Ok(())
}

pub fn get_version(conn: &Connection, version_id: &str) -> Result<Option<VersionRow>> {
    let row = conn
        .query_row(
            "SELECT bucketkey, inrecord, deletemarker, ispacklist, completed, blocklist
             FROM versions WHERE versionid = ?1",
            params![version_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((bucket_key, in_record, delete_marker, is_pack_list, completed, blob)) => {
            Ok(Some(VersionRow {
                bucket_key,
                in_record,
                delete_marker,
                is_pack_list,
                completed,
                block_list: from_json(&blob)?,
            }))
        }
        None => Ok(None),
    }
}

pub fn delete_version_row(conn: &Connection, version_id: &str) -> Result<()> {
    conn.execute("DELETE FROM versions WHERE versionid = ?1", params![version_id])?;
    Ok(())
}

pub fn update_version_block_list(
    conn: &Connection,
    version_id: &str,
    block_list: &[String],
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE versions SET blocklist = ?1 WHERE versionid = ?2",
        params![to_json(&block_list)?, version_id],
    )?;
    if changed == 0 {
        return Err(RestoreError::index(format!(
            "block list update for missing version {}",
            version_id
        )));
    }
    Ok(())
}

pub fn append_version_block(conn: &Connection, version_id: &str, block_id: &str) -> Result<()> {
    let row = get_version(conn, version_id)?.ok_or_else(|| {
        RestoreError::index(format!("block append for missing version {}", version_id))
    })?;
    let mut block_list = row.block_list;
    block_list.push(block_id.to_string());
    update_version_block_list(conn, version_id, &block_list)
}

/// Versions whose payload is stored inline in the version record.
pub fn versions_in_record(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT versionid FROM versions WHERE inrecord = 1")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Not-yet-emitted versions of one bucket key, oldest first by the
/// timestamp embedded in the version identifier.
pub fn versions_not_completed(conn: &Connection, bucket_key: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT versionid FROM versions WHERE bucketkey = ?1 AND completed = 0")?;
    let mut ids = stmt
        .query_map(params![bucket_key], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    utils::sort_ids_by_time(&mut ids);
    Ok(ids)
}

pub fn version_exists(conn: &Connection, version_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM versions WHERE versionid = ?1",
            params![version_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

// BLOCKS

/// Mint a block row in `Ready` state and return its fresh identifier.
pub fn insert_block(conn: &Connection, entry: &PackEntry) -> Result<String> {
    let block_id = utils::mint_id();
    conn.execute(
        "INSERT INTO blocks (blockid, state, blockinfo) VALUES (?1, ?2, ?3)",
        params![block_id, BlockState::Ready as i64, to_json(entry)?],
    )?;
    Ok(block_id)
}

pub fn block_record(conn: &Connection, block_id: &str) -> Result<(BlockState, PackEntry)> {
    block_record_opt(conn, block_id)?
        .ok_or_else(|| RestoreError::index(format!("missing block row {}", block_id)))
}

pub fn block_record_opt(
    conn: &Connection,
    block_id: &str,
) -> Result<Option<(BlockState, PackEntry)>> {
    let row = conn
        .query_row(
            "SELECT state, blockinfo FROM blocks WHERE blockid = ?1",
            params![block_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
        )
        .optional()?;
    match row {
        Some((state, blob)) => Ok(Some((BlockState::from_i64(state)?, from_json(&blob)?))),
        None => Ok(None),
    }
}

pub fn update_block_state(conn: &Connection, block_id: &str, state: BlockState) -> Result<()> {
    let changed = conn.execute(
        "UPDATE blocks SET state = ?1 WHERE blockid = ?2",
        params![state as i64, block_id],
    )?;
    if changed == 0 {
        return Err(RestoreError::index(format!(
            "state update for missing block {}",
            block_id
        )));
    }
    Ok(())
}

pub fn update_block_entry(conn: &Connection, block_id: &str, entry: &PackEntry) -> Result<()> {
    let changed = conn.execute(
        "UPDATE blocks SET blockinfo = ?1 WHERE blockid = ?2",
        params![to_json(entry)?, block_id],
    )?;
    if changed == 0 {
        return Err(RestoreError::index(format!(
            "entry update for missing block {}",
            block_id
        )));
    }
    Ok(())
}

pub fn delete_block_row(conn: &Connection, block_id: &str) -> Result<()> {
    conn.execute("DELETE FROM blocks WHERE blockid = ?1", params![block_id])?;
    Ok(())
}

// PACKS

pub fn pack_map(conn: &Connection, pack_id: &str) -> Result<PackMap> {
    let blob = conn
        .query_row(
            "SELECT blocklist FROM packs WHERE packid = ?1",
            params![pack_id],
            |row| row.get::<_, Option<Vec<u8>>>(0),
        )
        .optional()?;
    match blob.flatten() {
        Some(data) if !data.is_empty() => from_json(&data),
        _ => Ok(PackMap::new()),
    }
}

fn pack_row(conn: &Connection, pack_id: &str) -> Result<Option<(Option<String>, PackMap)>> {
    let row = conn
        .query_row(
            "SELECT tapeid, blocklist FROM packs WHERE packid = ?1",
            params![pack_id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<Vec<u8>>>(1)?,
                ))
            },
        )
        .optional()?;
    match row {
        Some((tape_id, blob)) => {
            let map = match blob {
                Some(data) if !data.is_empty() => from_json(&data)?,
                _ => PackMap::new(),
            };
            Ok(Some((tape_id, map)))
        }
        None => Ok(None),
    }
}

/// Set the occupant of one physical offset of a pack, creating the pack row
/// when this is the first thing known about the pack.
pub fn upsert_pack_entry(
    conn: &Connection,
    pack_id: &str,
    physical_start: i64,
    version_id: Option<&str>,
    block_id: Option<&str>,
) -> Result<()> {
    let (tape_id, mut map) = pack_row(conn, pack_id)?.unwrap_or((None, PackMap::new()));
    map.insert(
        physical_start,
        PackMapEntry {
            block_id: block_id.map(str::to_string),
            version_id: version_id.map(str::to_string),
        },
    );
    conn.execute(
        "INSERT OR REPLACE INTO packs (packid, tapeid, blocklist) VALUES (?1, ?2, ?3)",
        params![pack_id, tape_id, to_json(&map)?],
    )?;
    Ok(())
}

/// Record that a pack file was seen on a tape, preserving any pack map
/// already learned from version records.
pub fn set_pack_tape(conn: &Connection, pack_id: &str, tape_id: &str) -> Result<()> {
    let (_, map) = pack_row(conn, pack_id)?.unwrap_or((None, PackMap::new()));
    conn.execute(
        "INSERT OR REPLACE INTO packs (packid, tapeid, blocklist) VALUES (?1, ?2, ?3)",
        params![pack_id, tape_id, to_json(&map)?],
    )?;
    Ok(())
}

/// All pack rows as `(pack_id, tape_id)`.
pub fn all_packs(conn: &Connection) -> Result<Vec<(String, Option<String>)>> {
    let mut stmt = conn.prepare("SELECT packid, tapeid FROM packs")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
