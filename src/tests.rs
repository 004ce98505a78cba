//! End-to-end restore scenarios.
//!
//! Each test lays out simulated tapes with the low-level tape writers, runs
//! the three engine phases against the directory-backed library, and checks
//! what the recording emitter saw.

use crate::cache::StagingCache;
use crate::codec::{MetaFile, MetaReference, PackEntry, PackReference, Range, StoredPack, VersionId};
use crate::engine::Restorer;
use crate::hardware::TapeLibrarySimulator;
use crate::index::IndexStore;
use crate::s3::{DirEmitter, Emission};
use crate::sim::TapeWriter;
use crate::utils;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use ulid::Ulid;

fn vid(ts: u64, n: u128) -> String {
    Ulid::from_parts(ts, n).to_string()
}

/// Run harvest → index build → pack streaming over the tapes under
/// `<dir>/tapes`, restoring into a recording local emitter.
fn run_restore(dir: &Path, drives: usize) -> crate::Result<Arc<DirEmitter>> {
    let library = Arc::new(TapeLibrarySimulator::new(dir.join("tapes"), drives)?);
    let emitter = Arc::new(DirEmitter::new(dir.join("restored")));
    let cache = StagingCache::open(dir.join("cache"), true)?;
    let index = Arc::new(IndexStore::open(
        dir.join("db"),
        cache,
        emitter.clone() as Arc<dyn crate::s3::ObjectStore>,
        true,
    )?);
    let restorer = Restorer::new(library, index, dir.join("versions"));
    restorer.harvest()?;
    restorer.build_index()?;
    restorer.restore_all()?;
    Ok(emitter)
}

fn restored_body(emitter: &DirEmitter, bucket: &str, key: &str) -> Vec<u8> {
    fs::read(emitter.root().join(bucket).join(key)).unwrap()
}

fn puts_for(emitter: &DirEmitter, bucket: &str, key: &str) -> usize {
    emitter
        .emissions()
        .iter()
        .filter(|emission| match emission {
            Emission::Put { bucket: b, key: k } => b.as_str() == bucket && k.as_str() == key,
            Emission::DeleteMarker { .. } => false,
        })
        .count()
}

/// A staged payload left in the cache after the run means a version went
/// unemitted or an orphan went unclaimed.
fn assert_cache_drained(dir: &Path) {
    let cache = dir.join("cache");
    let mut stack = vec![cache];
    while let Some(next) = stack.pop() {
        for entry in fs::read_dir(&next).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                panic!("staged file left behind: {}", path.display());
            }
        }
    }
}

#[test]
fn test_inline_version_restores_with_one_put() {
    let dir = TempDir::new().unwrap();
    let tape = TapeWriter::new(&dir.path().join("tapes"), "TAPE00").unwrap();
    let mut versions = tape.version_file(&vid(10, 0)).unwrap();
    versions
        .write_version(&MetaReference {
            id: VersionId::new("b", "k", vid(1, 1)),
            data: Some(b"hello".to_vec()),
            ..Default::default()
        })
        .unwrap();
    versions.finish().unwrap();

    let emitter = run_restore(dir.path(), 1).unwrap();
    assert_eq!(
        emitter.emissions(),
        vec![Emission::Put {
            bucket: "b".to_string(),
            key: "k".to_string()
        }]
    );
    assert_eq!(restored_body(&emitter, "b", "k"), b"hello");
    assert_cache_drained(dir.path());
}

#[test]
fn test_single_block_object() {
    let dir = TempDir::new().unwrap();
    let tape = TapeWriter::new(&dir.path().join("tapes"), "TAPE00").unwrap();

    let version = vid(1, 1);
    let pack_id = vid(2, 1);
    let id = VersionId::new("b", "k", &version);
    let data = vec![42u8; 500];

    let mut pack = tape.pack(&pack_id).unwrap();
    let (start, end) = pack.write_block(&id, &data).unwrap();

    let mut entry = PackEntry::new(&pack_id, 0, data.len() as i64);
    entry.set_physical_location(&pack_id, start, end);

    let mut versions = tape.version_file(&vid(10, 0)).unwrap();
    versions
        .write_version(&MetaReference {
            id,
            packs: vec![entry],
            ..Default::default()
        })
        .unwrap();
    versions.finish().unwrap();

    let emitter = run_restore(dir.path(), 1).unwrap();
    assert_eq!(puts_for(&emitter, "b", "k"), 1);
    assert_eq!(restored_body(&emitter, "b", "k"), data);
    assert_cache_drained(dir.path());
}

#[test]
fn test_merged_entry_spanning_four_tlvs_splits_and_restores() {
    let dir = TempDir::new().unwrap();
    let tape = TapeWriter::new(&dir.path().join("tapes"), "TAPE00").unwrap();

    let version = vid(1, 1);
    let pack_id = vid(2, 1);
    let id = VersionId::new("b", "k", &version);

    // 1800 bytes as three 500-byte blocks and one 300-byte tail, all
    // sequential in the pack and described by one merged entry
    let mut data = Vec::new();
    for (i, size) in [500usize, 500, 500, 300].iter().enumerate() {
        data.extend(std::iter::repeat((i + 1) as u8).take(*size));
    }

    let mut pack = tape.pack(&pack_id).unwrap();
    let mut merged: Option<PackEntry> = None;
    let mut logical = 0i64;
    for chunk in [&data[0..500], &data[500..1000], &data[1000..1500], &data[1500..1800]] {
        let (start, end) = pack.write_block(&id, chunk).unwrap();
        let mut entry = PackEntry::new(&pack_id, logical, logical + chunk.len() as i64);
        entry.set_physical_location(&pack_id, start, end);
        logical += chunk.len() as i64;
        merged = match merged.take() {
            None => Some(entry),
            Some(mut previous) => {
                assert!(previous.try_merge(&entry));
                Some(previous)
            }
        };
    }

    let mut versions = tape.version_file(&vid(10, 0)).unwrap();
    versions
        .write_version(&MetaReference {
            id,
            packs: vec![merged.unwrap()],
            ..Default::default()
        })
        .unwrap();
    versions.finish().unwrap();

    let emitter = run_restore(dir.path(), 1).unwrap();
    assert_eq!(puts_for(&emitter, "b", "k"), 1);
    assert_eq!(restored_body(&emitter, "b", "k"), data);
    assert_cache_drained(dir.path());
}

#[test]
fn test_three_versions_emit_in_timestamp_order() {
    let dir = TempDir::new().unwrap();
    let tape = TapeWriter::new(&dir.path().join("tapes"), "TAPE00").unwrap();

    let pack_id = vid(2, 1);
    let mut pack = tape.pack(&pack_id).unwrap();
    let mut versions = tape.version_file(&vid(10, 0)).unwrap();

    // blocks land on tape newest-version-first; emission must still go
    // oldest-first
    let order = [3u64, 1, 2];
    let mut bodies = Vec::new();
    for ts in order {
        let version = vid(ts * 100, 1);
        let id = VersionId::new("b", "k", &version);
        let data = vec![ts as u8; 400];
        let (start, end) = pack.write_block(&id, &data).unwrap();
        let mut entry = PackEntry::new(&pack_id, 0, data.len() as i64);
        entry.set_physical_location(&pack_id, start, end);
        versions
            .write_version(&MetaReference {
                id,
                packs: vec![entry],
                ..Default::default()
            })
            .unwrap();
        bodies.push((ts, data));
    }
    versions.finish().unwrap();

    let emitter = run_restore(dir.path(), 1).unwrap();
    assert_eq!(puts_for(&emitter, "b", "k"), 3);

    // newest version's bytes are what the key holds at the end
    let newest = bodies.iter().find(|(ts, _)| *ts == 3).unwrap();
    assert_eq!(restored_body(&emitter, "b", "k"), newest.1);
    assert_cache_drained(dir.path());
}

#[test]
fn test_backwards_pack_restores_identical_bytes() {
    let dir = TempDir::new().unwrap();
    let tape = TapeWriter::new(&dir.path().join("tapes"), "TAPE00").unwrap();

    let version = vid(1, 1);
    let pack_id = vid(2, 1);
    let id = VersionId::new("b", "k", &version);

    // 1802 bytes in four blocks written physically in reverse order
    let sizes = [500usize, 500, 500, 302];
    let mut data = Vec::new();
    for (i, size) in sizes.iter().enumerate() {
        data.extend(std::iter::repeat((i + 10) as u8).take(*size));
    }
    let mut offsets = Vec::new();
    let mut logical = 0i64;
    for size in sizes {
        offsets.push((logical, logical + size as i64));
        logical += size as i64;
    }

    let mut pack = tape.pack(&pack_id).unwrap();
    let mut entries = vec![PackEntry::default(); sizes.len()];
    for i in (0..sizes.len()).rev() {
        let (logical_start, logical_end) = offsets[i];
        let chunk = &data[logical_start as usize..logical_end as usize];
        let (start, end) = pack.write_block(&id, chunk).unwrap();
        let mut entry = PackEntry::new(&pack_id, logical_start, logical_end);
        entry.set_physical_location(&pack_id, start, end);
        entries[i] = entry;
    }

    let mut versions = tape.version_file(&vid(10, 0)).unwrap();
    versions
        .write_version(&MetaReference {
            id,
            packs: entries,
            ..Default::default()
        })
        .unwrap();
    versions.finish().unwrap();

    let emitter = run_restore(dir.path(), 1).unwrap();
    assert_eq!(puts_for(&emitter, "b", "k"), 1);
    assert_eq!(restored_body(&emitter, "b", "k"), data);
    assert_cache_drained(dir.path());
}

/// Two objects whose blocks live in one pack while their pack-lists live in
/// the other. Whichever pack is read first, both objects come out whole.
fn cross_pack_lists(pack_a_ts: u64, pack_b_ts: u64) {
    let dir = TempDir::new().unwrap();
    let tapes_root = dir.path().join("tapes");
    let tape_a = TapeWriter::new(&tapes_root, "TAPEA").unwrap();
    let tape_b = TapeWriter::new(&tapes_root, "TAPEB").unwrap();

    let pack_a_id = vid(pack_a_ts, 1);
    let pack_b_id = vid(pack_b_ts, 2);
    let version_x = vid(1, 1);
    let version_y = vid(1, 2);
    let id_x = VersionId::new("b", "x", &version_x);
    let id_y = VersionId::new("b", "y", &version_y);
    let data_x: Vec<u8> = (0..700u32).map(|i| (i % 251) as u8).collect();
    let data_y: Vec<u8> = (0..900u32).map(|i| (i % 13) as u8).collect();

    let mut pack_a = tape_a.pack(&pack_a_id).unwrap();
    let mut pack_b = tape_b.pack(&pack_b_id).unwrap();

    // X's data in pack A, two blocks
    let mut entries_x = Vec::new();
    for (logical, chunk) in [(0i64, &data_x[..400]), (400, &data_x[400..])] {
        let (start, end) = pack_a.write_block(&id_x, chunk).unwrap();
        let mut entry = PackEntry::new(&pack_a_id, logical, logical + chunk.len() as i64);
        entry.set_physical_location(&pack_a_id, start, end);
        entries_x.push(entry);
    }
    // Y's data in pack B, two blocks
    let mut entries_y = Vec::new();
    for (logical, chunk) in [(0i64, &data_y[..450]), (450, &data_y[450..])] {
        let (start, end) = pack_b.write_block(&id_y, chunk).unwrap();
        let mut entry = PackEntry::new(&pack_b_id, logical, logical + chunk.len() as i64);
        entry.set_physical_location(&pack_b_id, start, end);
        entries_y.push(entry);
    }

    // each pack carries the other's pack-list
    let (y_list_start, y_list_end) = pack_a
        .write_pack_list(&StoredPack {
            version: id_y.composite(),
            upload: String::new(),
            packs: entries_y,
        })
        .unwrap();
    let (x_list_start, x_list_end) = pack_b
        .write_pack_list(&StoredPack {
            version: id_x.composite(),
            upload: String::new(),
            packs: entries_x,
        })
        .unwrap();

    let mut versions = tape_a.version_file(&vid(10, 0)).unwrap();
    versions
        .write_version(&MetaReference {
            id: id_x,
            reference: Some(PackReference {
                pack: pack_b_id.clone(),
                range: Range::new(x_list_start, x_list_end - x_list_start),
            }),
            ..Default::default()
        })
        .unwrap();
    versions
        .write_version(&MetaReference {
            id: id_y,
            reference: Some(PackReference {
                pack: pack_a_id.clone(),
                range: Range::new(y_list_start, y_list_end - y_list_start),
            }),
            ..Default::default()
        })
        .unwrap();
    versions.finish().unwrap();

    let emitter = run_restore(dir.path(), 1).unwrap();
    assert_eq!(puts_for(&emitter, "b", "x"), 1);
    assert_eq!(puts_for(&emitter, "b", "y"), 1);
    assert_eq!(restored_body(&emitter, "b", "x"), data_x);
    assert_eq!(restored_body(&emitter, "b", "y"), data_y);
    assert_cache_drained(dir.path());
}

#[test]
fn test_cross_pack_lists_a_read_first() {
    cross_pack_lists(100, 200);
}

#[test]
fn test_cross_pack_lists_b_read_first() {
    cross_pack_lists(200, 100);
}

#[test]
fn test_delete_marker_emits_after_older_version() {
    let dir = TempDir::new().unwrap();
    let tape = TapeWriter::new(&dir.path().join("tapes"), "TAPE00").unwrap();

    let mut versions = tape.version_file(&vid(10, 0)).unwrap();
    versions
        .write_version(&MetaReference {
            id: VersionId::new("b", "k", vid(100, 1)),
            data: Some(b"body".to_vec()),
            ..Default::default()
        })
        .unwrap();
    versions
        .write_version(&MetaReference {
            id: VersionId::new("b", "k", vid(200, 1)),
            delete_marker: true,
            ..Default::default()
        })
        .unwrap();
    versions.finish().unwrap();

    let emitter = run_restore(dir.path(), 1).unwrap();
    assert_eq!(
        emitter.emissions(),
        vec![
            Emission::Put {
                bucket: "b".to_string(),
                key: "k".to_string()
            },
            Emission::DeleteMarker {
                bucket: "b".to_string(),
                key: "k".to_string()
            },
        ]
    );
    assert_cache_drained(dir.path());
}

#[test]
fn test_metafile_supersedes_older_version_files() {
    let dir = TempDir::new().unwrap();
    let tape = TapeWriter::new(&dir.path().join("tapes"), "TAPE00").unwrap();

    let old_file = vid(100, 0);
    let dump_file = vid(200, 0);

    // superseded file holds a version that must never be emitted
    let mut old = tape.version_file(&old_file).unwrap();
    old.write_version(&MetaReference {
        id: VersionId::new("b", "stale", vid(100, 1)),
        data: Some(b"stale".to_vec()),
        ..Default::default()
    })
    .unwrap();
    old.finish().unwrap();

    // the full dump starts with a metafile naming itself as the oldest
    let mut dump = tape.version_file(&dump_file).unwrap();
    dump.write_meta_file(&MetaFile {
        oldest: dump_file.clone(),
    })
    .unwrap();
    dump.write_version(&MetaReference {
        id: VersionId::new("b", "kept", vid(200, 1)),
        data: Some(b"kept".to_vec()),
        ..Default::default()
    })
    .unwrap();
    dump.finish().unwrap();

    let emitter = run_restore(dir.path(), 1).unwrap();
    assert_eq!(
        emitter.emissions(),
        vec![Emission::Put {
            bucket: "b".to_string(),
            key: "kept".to_string()
        }]
    );
}

#[test]
fn test_version_split_across_two_tapes_with_parallel_drives() {
    let dir = TempDir::new().unwrap();
    let tapes_root = dir.path().join("tapes");
    let tape_a = TapeWriter::new(&tapes_root, "TAPEA").unwrap();
    let tape_b = TapeWriter::new(&tapes_root, "TAPEB").unwrap();

    let version = vid(1, 1);
    let id = VersionId::new("b", "k", &version);
    let pack_a_id = vid(100, 1);
    let pack_b_id = vid(200, 1);
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 7) as u8).collect();

    let mut pack_a = tape_a.pack(&pack_a_id).unwrap();
    let (a_start, a_end) = pack_a.write_block(&id, &data[..500]).unwrap();
    let mut pack_b = tape_b.pack(&pack_b_id).unwrap();
    let (b_start, b_end) = pack_b.write_block(&id, &data[500..]).unwrap();

    let mut entry_a = PackEntry::new(&pack_a_id, 0, 500);
    entry_a.set_physical_location(&pack_a_id, a_start, a_end);
    let mut entry_b = PackEntry::new(&pack_b_id, 500, 1000);
    entry_b.set_physical_location(&pack_b_id, b_start, b_end);

    let mut versions = tape_a.version_file(&vid(10, 0)).unwrap();
    versions
        .write_version(&MetaReference {
            id,
            packs: vec![entry_a, entry_b],
            ..Default::default()
        })
        .unwrap();
    versions.finish().unwrap();

    let emitter = run_restore(dir.path(), 2).unwrap();
    assert_eq!(puts_for(&emitter, "b", "k"), 1);
    assert_eq!(restored_body(&emitter, "b", "k"), data);
    assert_cache_drained(dir.path());
}

#[test]
fn test_generated_tapes_round_trip() {
    let dir = TempDir::new().unwrap();
    let spec = crate::sim::SimulationSpec {
        tapes: 2,
        buckets: vec!["b0".to_string(), "b1".to_string()],
        objects_per_bucket: 4,
        blocks_per_object: 3,
        block_size: 200,
    };
    let objects =
        crate::sim::create_simulated_tapes(&dir.path().join("tapes"), &spec).unwrap();

    let emitter = run_restore(dir.path(), 2).unwrap();
    for object in &objects {
        assert_eq!(
            restored_body(&emitter, &object.bucket, &object.object),
            object.data,
            "object {}/{} must round-trip",
            object.bucket,
            object.object
        );
    }
    assert_cache_drained(dir.path());
}

#[test]
fn test_version_file_ids_sort_like_timestamps() {
    // file names double as ordering keys for the whole phase-2 pass
    let older = vid(1_000, 500);
    let newer = vid(2_000, 1);
    assert!(utils::id_timestamp_ms(&older).unwrap() < utils::id_timestamp_ms(&newer).unwrap());
    assert!(older < newer);
}
