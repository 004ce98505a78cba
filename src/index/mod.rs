//! Relational index of versions, packs and blocks.
//!
//! Tapes are streamed in parallel and the order in which BLOCK, PACKLIST
//! and version records appear is not known in advance, so the index is three
//! cross-indexed relations whose rows are created whenever any party first
//! learns about a pack, a block or a version; later observers reconcile by
//! keyed lookup. A block's identity is local (minted on insertion); its
//! physical identity is `(pack_id, physical_start)`, the join key used by
//! the pack streamer.
//!
//! The store is single-writer: every mutating operation holds the
//! connection lock for its whole extent. The one exception is
//! [`IndexStore::write_block`], which releases the lock across the staging
//! write and reacquires it to publish the state change.

mod tables;

pub use tables::{BlockState, PackMap, PackMapEntry};

use crate::cache::StagingCache;
use crate::codec::{Block, MetaReference, PackEntry, Range};
use crate::error::{RestoreError, Result};
use crate::s3::ObjectStore;
use crate::utils;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub struct IndexStore {
    conn: Mutex<Connection>,
    cache: StagingCache,
    emitter: Arc<dyn ObjectStore>,
}

fn split_bucket_key(bucket_key: &str) -> Result<(&str, &str)> {
    bucket_key
        .split_once('/')
        .ok_or_else(|| RestoreError::index(format!("malformed bucket key {:?}", bucket_key)))
}

impl IndexStore {
    /// Open (or create) the single-file store. `clean` drops any previous
    /// database; without it the persisted rows survive into this run so an
    /// interrupted restore can skip already-emitted versions.
    pub fn open(
        db_path: impl AsRef<Path>,
        cache: StagingCache,
        emitter: Arc<dyn ObjectStore>,
        clean: bool,
    ) -> Result<Self> {
        let db_path = db_path.as_ref();
        if clean && db_path.exists() {
            fs::remove_file(db_path)?;
            for suffix in ["-wal", "-shm"] {
                let sidecar = PathBuf::from(format!("{}{}", db_path.display(), suffix));
                if sidecar.exists() {
                    fs::remove_file(sidecar)?;
                }
            }
        }
        let conn = Connection::open(db_path)?;
        tables::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache,
            emitter,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Record one version from a VERSION record. Which of the sub-cases
    /// applies depends on where the record says the payload lives.
    pub fn add_version(&self, record: &MetaReference) -> Result<()> {
        let conn = self.lock();
        let version_id = record.version();
        let bucket_key = record.bucket_key();

        if record.delete_marker {
            tables::insert_version(&conn, version_id, &bucket_key, false, true, false, &[])?;
            return Ok(());
        }

        if record.deleted {
            return self.delete_version_locked(&conn, version_id);
        }

        if let Some(data) = &record.data {
            // payload is inline: stage it immediately, no tape read needed
            let block_id = tables::insert_block(&conn, &PackEntry::default())?;
            self.cache.write_block(&record.id.bucket, &block_id, data)?;
            tables::update_block_state(&conn, &block_id, BlockState::Cached)?;
            tables::insert_version(
                &conn,
                version_id,
                &bucket_key,
                true,
                false,
                false,
                &[block_id],
            )?;
            return Ok(());
        }

        if !record.packs.is_empty() {
            let mut block_list = Vec::with_capacity(record.packs.len());
            for entry in &record.packs {
                let block_id = tables::insert_block(&conn, entry)?;
                tables::upsert_pack_entry(
                    &conn,
                    &entry.pack,
                    entry.physical_start(),
                    Some(version_id),
                    Some(&block_id),
                )?;
                block_list.push(block_id);
            }
            tables::insert_version(
                &conn,
                version_id,
                &bucket_key,
                false,
                false,
                false,
                &block_list,
            )?;
            return Ok(());
        }

        if let Some(reference) = &record.reference {
            // the block list itself is stored inside a pack; register the
            // owner at the pack-list's offset so the streamer can join back
            tables::upsert_pack_entry(
                &conn,
                &reference.pack,
                reference.range.start,
                Some(version_id),
                None,
            )?;
            tables::insert_version(&conn, version_id, &bucket_key, false, false, true, &[])?;
            return Ok(());
        }

        Err(RestoreError::index(format!(
            "version {} carries no data, packs, or pack-list reference",
            version_id
        )))
    }

    /// Drop a version and its blocks, including any staged payloads.
    pub fn delete_version(&self, version_id: &str) -> Result<()> {
        let conn = self.lock();
        self.delete_version_locked(&conn, version_id)
    }

    fn delete_version_locked(&self, conn: &Connection, version_id: &str) -> Result<()> {
        let row = tables::get_version(conn, version_id)?.ok_or_else(|| {
            RestoreError::index(format!("delete of unknown version {}", version_id))
        })?;
        let (bucket, _) = split_bucket_key(&row.bucket_key)?;
        for block_id in &row.block_list {
            if self.cache.contains(bucket, block_id) {
                self.cache.remove_block(bucket, block_id)?;
            }
            tables::delete_block_row(conn, block_id)?;
        }
        tables::delete_version_row(conn, version_id)?;
        debug!("deleted version {}", version_id);
        Ok(())
    }

    /// The pack streamer decoded a BLOCK occupying
    /// `[block_start, block_end)` of `pack_id`.
    pub fn write_block(
        &self,
        pack_id: &str,
        block_start: i64,
        block_end: i64,
        block: &Block,
    ) -> Result<()> {
        let conn = self.lock();
        let map = tables::pack_map(&conn, pack_id)?;

        let slot = match map.get(&block_start) {
            None => {
                // orphan: the pack-list naming this block has not been read
                // yet. Cache it speculatively; if its version never arrives
                // it is a harmless stranded cache file at run end.
                let mut entry = PackEntry::default();
                entry.set_physical_location(pack_id, block_start, block_end);
                let block_id = tables::insert_block(&conn, &entry)?;
                self.cache
                    .write_block(&block.id.bucket, &block_id, &block.data)?;
                tables::update_block_state(&conn, &block_id, BlockState::Cached)?;
                tables::upsert_pack_entry(&conn, pack_id, block_start, None, Some(&block_id))?;
                debug!(
                    "orphan block at {}:{} cached as {}",
                    pack_id, block_start, block_id
                );
                return Ok(());
            }
            Some(slot) => slot.clone(),
        };

        let block_id = slot.block_id.ok_or_else(|| {
            RestoreError::index(format!(
                "BLOCK at {}:{} collides with a stored pack-list slot",
                pack_id, block_start
            ))
        })?;

        let (state, entry) = match tables::block_record_opt(&conn, &block_id)? {
            // the row is gone when the owning version was deleted; the map
            // slot is just stale
            None => {
                debug!("block {} has no row (version deleted), skipping", block_id);
                return Ok(());
            }
            Some(record) => record,
        };
        if state != BlockState::Ready {
            // already cached speculatively, or a replayed record
            debug!("block {} not ready (state {:?}), skipping", block_id, state);
            return Ok(());
        }

        // release the writer across the staging write
        drop(conn);
        self.cache
            .write_block(&block.id.bucket, &block_id, &block.data)?;
        let conn = self.lock();

        tables::update_block_state(&conn, &block_id, BlockState::Cached)?;

        if entry.physical_end() > block_end && entry.pack == pack_id {
            // the recorded entry spans several BLOCK TLVs of this pack:
            // shrink it to this TLV and mint a follow-up block for the rest
            let version_id = slot.version_id.clone().ok_or_else(|| {
                RestoreError::index(format!(
                    "spanning block {} has no owning version",
                    block_id
                ))
            })?;

            let mut shrunk = entry.clone();
            shrunk.pack_range.len = block_end - shrunk.pack_range.start;
            tables::update_block_entry(&conn, &block_id, &shrunk)?;

            let mut remainder = entry.clone();
            remainder.pack_range = Range::new(block_end, entry.physical_end() - block_end);
            // not a true logical offset; just past the original so the
            // remainder sorts after it at emission
            remainder.source_range = Range::new(
                entry.source_range.start + 1,
                (entry.source_range.len - (block_end - block_start)).max(0),
            );
            let new_block_id = tables::insert_block(&conn, &remainder)?;
            tables::upsert_pack_entry(
                &conn,
                pack_id,
                block_end,
                Some(&version_id),
                Some(&new_block_id),
            )?;
            tables::append_version_block(&conn, &version_id, &new_block_id)?;
            debug!(
                "split spanning block {} at {}; remainder {}",
                block_id, block_end, new_block_id
            );
        }

        if let Some(version_id) = &slot.version_id {
            self.process_version_locked(&conn, version_id)?;
        }
        Ok(())
    }

    /// The pack streamer decoded a PACKLIST at `offset` of `pack_id`: the
    /// full, ordered block list of the version that registered this offset.
    pub fn process_pack_list(
        &self,
        pack_id: &str,
        offset: i64,
        entries: &[PackEntry],
    ) -> Result<()> {
        let conn = self.lock();
        let map = tables::pack_map(&conn, pack_id)?;
        let owner = map.get(&offset).ok_or_else(|| {
            RestoreError::index(format!(
                "no pack map entry for pack list at {}:{}",
                pack_id, offset
            ))
        })?;
        let version_id = owner.version_id.clone().ok_or_else(|| {
            RestoreError::index(format!(
                "pack list at {}:{} has no registered owner",
                pack_id, offset
            ))
        })?;

        let mut block_list = Vec::new();
        for entry in entries {
            block_list.extend(self.adopt_span(&conn, &version_id, entry)?);
        }
        tables::update_version_block_list(&conn, &version_id, &block_list)?;
        self.process_version_locked(&conn, &version_id)
    }

    /// Resolve one pack-list entry against whatever the pack map already
    /// knows about its physical span. Blocks observed before the list
    /// arrived (orphans) are adopted; uncovered remainder becomes a fresh
    /// `Ready` block. Returns the span's block ids in source order.
    fn adopt_span(
        &self,
        conn: &Connection,
        version_id: &str,
        entry: &PackEntry,
    ) -> Result<Vec<String>> {
        let span_start = entry.physical_start();
        let span_end = entry.physical_end();
        let map = tables::pack_map(conn, &entry.pack)?;
        let existing: BTreeMap<i64, PackMapEntry> = map
            .range(span_start..span_end)
            .map(|(k, v)| (*k, v.clone()))
            .collect();

        if existing.is_empty() {
            let block_id = tables::insert_block(conn, entry)?;
            tables::upsert_pack_entry(
                conn,
                &entry.pack,
                span_start,
                Some(version_id),
                Some(&block_id),
            )?;
            return Ok(vec![block_id]);
        }

        // packs are streamed sequentially, so anything already known inside
        // the span is a contiguous prefix of it
        let mut block_list = Vec::new();
        let mut cursor = span_start;
        let mut order = 0i64;
        for (offset, slot) in existing {
            if offset != cursor {
                return Err(RestoreError::index(format!(
                    "pack map entry at {}:{} overlaps pack-list span starting at {}",
                    entry.pack, offset, span_start
                )));
            }
            let block_id = slot.block_id.ok_or_else(|| {
                RestoreError::index(format!(
                    "pack-list span at {}:{} collides with a stored pack-list",
                    entry.pack, offset
                ))
            })?;
            let (_, mut adopted) = tables::block_record(conn, &block_id)?;
            adopted.pack = entry.pack.clone();
            adopted.source_range =
                Range::new(entry.source_range.start + order, adopted.pack_range.len);
            tables::update_block_entry(conn, &block_id, &adopted)?;
            tables::upsert_pack_entry(
                conn,
                &entry.pack,
                offset,
                Some(version_id),
                Some(&block_id),
            )?;
            cursor = adopted.physical_end();
            order += 1;
            block_list.push(block_id);
        }

        if cursor < span_end {
            let mut rest = entry.clone();
            rest.pack_range = Range::new(cursor, span_end - cursor);
            rest.source_range = Range::new(entry.source_range.start + order, span_end - cursor);
            let block_id = tables::insert_block(conn, &rest)?;
            tables::upsert_pack_entry(
                conn,
                &entry.pack,
                cursor,
                Some(version_id),
                Some(&block_id),
            )?;
            block_list.push(block_id);
        }
        Ok(block_list)
    }

    /// Emit every version of this version's bucket key that has become
    /// emittable, oldest first, starting with `version_id` itself.
    pub fn process_version(&self, version_id: &str) -> Result<()> {
        let conn = self.lock();
        self.process_version_locked(&conn, version_id)
    }

    fn process_version_locked(&self, conn: &Connection, version_id: &str) -> Result<()> {
        let mut current = version_id.to_string();
        loop {
            let row = tables::get_version(conn, &current)?.ok_or_else(|| {
                RestoreError::index(format!("process of unknown version {}", current))
            })?;

            if !row.delete_marker {
                if row.block_list.is_empty() {
                    // nothing staged yet (or a pack-list still to come)
                    return Ok(());
                }
                for block_id in &row.block_list {
                    let (state, _) = tables::block_record(conn, block_id)?;
                    if state != BlockState::Cached {
                        debug!(
                            "version {} still waiting on block {}",
                            current, block_id
                        );
                        return Ok(());
                    }
                }
            }

            // only the oldest not-completed version of a key may go out
            let pending = tables::versions_not_completed(conn, &row.bucket_key)?;
            if pending.first().map(String::as_str) != Some(current.as_str()) {
                debug!("version {} complete but not oldest for {}", current, row.bucket_key);
                return Ok(());
            }

            let (bucket, key) = split_bucket_key(&row.bucket_key)?;
            if row.delete_marker {
                self.emitter.delete_marker(bucket, key)?;
            } else {
                // order the blocks by their position in the original object
                let mut blocks = Vec::with_capacity(row.block_list.len());
                for block_id in &row.block_list {
                    let (_, entry) = tables::block_record(conn, block_id)?;
                    blocks.push((block_id.clone(), entry));
                }
                blocks.sort_by_key(|(_, entry)| entry.source_range.start);

                let files: Vec<PathBuf> = blocks
                    .iter()
                    .map(|(block_id, _)| self.cache.block_path(bucket, block_id))
                    .collect();
                if files.len() == 1 {
                    self.emitter.put(bucket, key, &files[0])?;
                } else {
                    self.emitter.put_multipart(bucket, key, &files)?;
                }

                for (block_id, _) in &blocks {
                    self.cache.remove_block(bucket, block_id)?;
                    tables::delete_block_row(conn, block_id)?;
                }
            }

            tables::delete_version_row(conn, &current)?;
            info!("emitted {} version {}", row.bucket_key, current);

            // the next-oldest version of the same key may have been waiting
            // behind this one
            match pending.get(1) {
                Some(next) => current = next.clone(),
                None => return Ok(()),
            }
        }
    }

    /// Does a version record exist for this identifier?
    pub fn version_exists(&self, version_id: &str) -> Result<bool> {
        let conn = self.lock();
        tables::version_exists(&conn, version_id)
    }

    /// Versions whose payload came inline with the version record; they
    /// never require a tape read.
    pub fn versions_in_record(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        tables::versions_in_record(&conn)
    }

    /// Record that a pack file was seen on a tape.
    pub fn add_tape_to_pack(&self, pack_id: &str, tape_id: &str) -> Result<()> {
        let conn = self.lock();
        tables::set_pack_tape(&conn, pack_id, tape_id)
    }

    /// Tapes ordered oldest-first by their oldest pack, and each tape's
    /// packs ordered oldest-first. A pack that was never seen on any tape
    /// cannot be read and fails the run.
    pub fn tape_pack_order(&self) -> Result<(Vec<String>, BTreeMap<String, Vec<String>>)> {
        let conn = self.lock();
        let mut by_tape: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (pack_id, tape_id) in tables::all_packs(&conn)? {
            match tape_id {
                Some(tape_id) => by_tape.entry(tape_id).or_default().push(pack_id),
                None => {
                    return Err(RestoreError::index(format!(
                        "pack {} was never seen on any tape",
                        pack_id
                    )))
                }
            }
        }
        for packs in by_tape.values_mut() {
            utils::sort_ids_by_time(packs);
        }
        let mut tapes: Vec<String> = by_tape.keys().cloned().collect();
        tapes.sort_by_key(|tape| {
            by_tape[tape]
                .first()
                .and_then(|pack| utils::id_timestamp_ms(pack).ok())
                .unwrap_or(u64::MAX)
        });
        Ok((tapes, by_tape))
    }

    /// Staged files left behind by orphan blocks whose version never
    /// arrived. Logged at run end; harmless.
    pub fn log_stranded_blocks(&self) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT blockid FROM blocks WHERE state = ?1")?;
        let stranded = stmt
            .query_map([BlockState::Cached as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if !stranded.is_empty() {
            warn!(
                "{} cached blocks were never claimed by a version",
                stranded.len()
            );
        }
        Ok(())
    }

    pub fn cache(&self) -> &StagingCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VersionId;
    use crate::s3::{DirEmitter, Emission};
    use std::fs;
    use tempfile::TempDir;
    use ulid::Ulid;

    fn test_store(dir: &TempDir) -> (Arc<IndexStore>, Arc<DirEmitter>) {
        let cache = StagingCache::open(dir.path().join("cache"), false).unwrap();
        let emitter = Arc::new(DirEmitter::new(dir.path().join("out")));
        let store = IndexStore::open(
            dir.path().join("db"),
            cache,
            emitter.clone() as Arc<dyn ObjectStore>,
            false,
        )
        .unwrap();
        (Arc::new(store), emitter)
    }

    fn vid(ts: u64, n: u128) -> String {
        Ulid::from_parts(ts, n).to_string()
    }

    fn pack_version(version: &str, pack: &str, phys_start: i64, len: i64) -> MetaReference {
        let mut entry = PackEntry::new(pack, 0, len);
        entry.set_physical_location(pack, phys_start, phys_start + len);
        MetaReference {
            id: VersionId::new("b", "k", version),
            packs: vec![entry],
            ..Default::default()
        }
    }

    #[test]
    fn test_inline_version_emits_immediately() {
        let dir = TempDir::new().unwrap();
        let (store, emitter) = test_store(&dir);

        let version = vid(1, 1);
        let record = MetaReference {
            id: VersionId::new("b", "k", &version),
            data: Some(b"hello".to_vec()),
            ..Default::default()
        };
        store.add_version(&record).unwrap();

        for v in store.versions_in_record().unwrap() {
            store.process_version(&v).unwrap();
        }
        assert_eq!(
            emitter.emissions(),
            vec![Emission::Put {
                bucket: "b".to_string(),
                key: "k".to_string()
            }]
        );
        let body = fs::read(emitter.root().join("b").join("k")).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_block_before_version_is_adopted() {
        let dir = TempDir::new().unwrap();
        let (store, emitter) = test_store(&dir);

        let version = vid(1, 1);
        let pack = vid(1, 2);
        let block = Block {
            id: VersionId::new("b", "k", &version),
            data: b"payload".to_vec(),
        };

        // the pack streamer sees the block before any version names it
        store.write_block(&pack, 0, 100, &block).unwrap();
        assert!(emitter.emissions().is_empty());

        // the version record arrives and reuses the orphan through the map
        store.add_version(&pack_version(&version, &pack, 0, 100)).unwrap();
        // the orphan slot had no version, so adoption happens via the list
        // path; a direct-pack version re-registers the offset itself
        let block2 = Block {
            id: VersionId::new("b", "k", &version),
            data: b"payload".to_vec(),
        };
        store.write_block(&pack, 0, 100, &block2).unwrap();

        assert_eq!(emitter.emissions().len(), 1);
        let body = fs::read(emitter.root().join("b").join("k")).unwrap();
        assert_eq!(body, b"payload");
    }

    #[test]
    fn test_emission_waits_for_older_version() {
        let dir = TempDir::new().unwrap();
        let (store, emitter) = test_store(&dir);

        let v1 = vid(100, 1);
        let v2 = vid(200, 1);
        let pack = vid(50, 1);

        store.add_version(&pack_version(&v1, &pack, 0, 10)).unwrap();
        store.add_version(&pack_version(&v2, &pack, 10, 10)).unwrap();

        // the newer version's block arrives first; it must hold
        let b2 = Block {
            id: VersionId::new("b", "k", &v2),
            data: vec![2u8; 10],
        };
        store.write_block(&pack, 10, 20, &b2).unwrap();
        assert!(emitter.emissions().is_empty());

        // the older block arrives; both go out, oldest first
        let b1 = Block {
            id: VersionId::new("b", "k", &v1),
            data: vec![1u8; 10],
        };
        store.write_block(&pack, 0, 10, &b1).unwrap();
        assert_eq!(emitter.emissions().len(), 2);
        let body = fs::read(emitter.root().join("b").join("k")).unwrap();
        assert_eq!(body, vec![2u8; 10]);
    }

    #[test]
    fn test_delete_version_drops_blocks() {
        let dir = TempDir::new().unwrap();
        let (store, emitter) = test_store(&dir);

        let version = vid(1, 1);
        let pack = vid(1, 2);
        store.add_version(&pack_version(&version, &pack, 0, 10)).unwrap();
        store.delete_version(&version).unwrap();
        assert!(!store.version_exists(&version).unwrap());

        // a block arriving for the deleted version hits the stale map slot
        // and is skipped without touching the cache or the emitter
        let block = Block {
            id: VersionId::new("b", "k", &version),
            data: vec![9u8; 10],
        };
        store.write_block(&pack, 0, 10, &block).unwrap();
        assert!(emitter.emissions().is_empty());
    }

    #[test]
    fn test_spanning_block_split() {
        let dir = TempDir::new().unwrap();
        let (store, emitter) = test_store(&dir);

        let version = vid(1, 1);
        let pack = vid(1, 2);
        // one merged entry covering two physical TLVs: [0,500) and [500,800)
        store.add_version(&pack_version(&version, &pack, 0, 800)).unwrap();

        let first = Block {
            id: VersionId::new("b", "k", &version),
            data: vec![1u8; 500],
        };
        store.write_block(&pack, 0, 500, &first).unwrap();
        assert!(emitter.emissions().is_empty());

        let second = Block {
            id: VersionId::new("b", "k", &version),
            data: vec![2u8; 300],
        };
        store.write_block(&pack, 500, 800, &second).unwrap();

        assert_eq!(emitter.emissions().len(), 1);
        let body = fs::read(emitter.root().join("b").join("k")).unwrap();
        let mut expected = vec![1u8; 500];
        expected.extend(vec![2u8; 300]);
        assert_eq!(body, expected);
    }

    #[test]
    fn test_pack_list_adopts_orphans() {
        let dir = TempDir::new().unwrap();
        let (store, emitter) = test_store(&dir);

        let version = vid(1, 1);
        let data_pack = vid(1, 2);
        let list_pack = vid(1, 3);

        // version only references a stored pack-list inside list_pack
        let record = MetaReference {
            id: VersionId::new("b", "k", &version),
            reference: Some(crate::codec::PackReference {
                pack: list_pack.clone(),
                range: Range::new(64, 100),
            }),
            ..Default::default()
        };
        store.add_version(&record).unwrap();

        // the data pack is streamed first: both blocks are orphans
        let b1 = Block {
            id: VersionId::new("b", "k", &version),
            data: vec![1u8; 10],
        };
        store.write_block(&data_pack, 0, 10, &b1).unwrap();
        let b2 = Block {
            id: VersionId::new("b", "k", &version),
            data: vec![2u8; 10],
        };
        store.write_block(&data_pack, 10, 20, &b2).unwrap();
        assert!(emitter.emissions().is_empty());

        // the pack-list arrives from the other pack and claims them
        let mut e1 = PackEntry::new(&data_pack, 0, 10);
        e1.set_physical_location(&data_pack, 0, 10);
        let mut e2 = PackEntry::new(&data_pack, 10, 20);
        e2.set_physical_location(&data_pack, 10, 20);
        store.process_pack_list(&list_pack, 64, &[e1, e2]).unwrap();

        assert_eq!(emitter.emissions().len(), 1);
        let body = fs::read(emitter.root().join("b").join("k")).unwrap();
        let mut expected = vec![1u8; 10];
        expected.extend(vec![2u8; 10]);
        assert_eq!(body, expected);
    }

    #[test]
    fn test_tape_pack_order() {
        let dir = TempDir::new().unwrap();
        let (store, _) = test_store(&dir);

        let old_pack = vid(100, 1);
        let new_pack = vid(300, 1);
        let mid_pack = vid(200, 1);
        store.add_tape_to_pack(&old_pack, "TAPE-B").unwrap();
        store.add_tape_to_pack(&new_pack, "TAPE-A").unwrap();
        store.add_tape_to_pack(&mid_pack, "TAPE-B").unwrap();

        let (tapes, packs) = store.tape_pack_order().unwrap();
        assert_eq!(tapes, vec!["TAPE-B".to_string(), "TAPE-A".to_string()]);
        assert_eq!(
            packs["TAPE-B"],
            vec![old_pack.clone(), mid_pack.clone()]
        );
    }

    #[test]
    fn test_pack_without_tape_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (store, _) = test_store(&dir);

        let version = vid(1, 1);
        let pack = vid(1, 2);
        store.add_version(&pack_version(&version, &pack, 0, 10)).unwrap();
        assert!(store.tape_pack_order().is_err());
    }
}
