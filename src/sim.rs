//! Synthetic tape generation.
//!
//! Builds directory-backed tapes for the simulator: each tape gets one
//! version file and one pack, filled with objects whose payloads are random
//! bytes. Object shapes rotate between inline-data records and packed
//! multi-block records so a generated set exercises every data location the
//! restore path knows. The low-level writers are also the test suite's way
//! of laying out hand-crafted tapes.

use crate::codec::{self, MetaFile, MetaReference, PackEntry, StoredPack, VersionId};
use crate::error::{RestoreError, Result};
use crate::utils::{self, BLOCK_SUFFIX, VERSION_SUFFIX};
use rand::RngCore;
use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Shape of a generated tape set.
#[derive(Debug, Clone)]
pub struct SimulationSpec {
    pub tapes: usize,
    pub buckets: Vec<String>,
    pub objects_per_bucket: usize,
    pub blocks_per_object: usize,
    pub block_size: usize,
}

impl Default for SimulationSpec {
    fn default() -> Self {
        Self {
            tapes: 1,
            buckets: vec!["bucket00".to_string()],
            objects_per_bucket: 10,
            blocks_per_object: 1,
            block_size: 500,
        }
    }
}

/// One object the generator put on tape, with the payload it used.
#[derive(Debug, Clone)]
pub struct SimObject {
    pub bucket: String,
    pub object: String,
    pub version: String,
    pub data: Vec<u8>,
}

/// Writes the files of one simulated tape directory.
pub struct TapeWriter {
    dir: PathBuf,
}

impl TapeWriter {
    pub fn new(root: &Path, name: &str) -> Result<Self> {
        let dir = root.join(name);
        fs::create_dir_all(&dir)
            .map_err(|e| RestoreError::simulation(format!("create {}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub fn pack(&self, pack_id: &str) -> Result<PackWriter> {
        let path = self.dir.join(format!("{}{}", pack_id, BLOCK_SUFFIX));
        let file = File::create(&path)
            .map_err(|e| RestoreError::simulation(format!("create {}: {}", path.display(), e)))?;
        Ok(PackWriter {
            pack_id: pack_id.to_string(),
            file,
        })
    }

    pub fn version_file(&self, file_id: &str) -> Result<VersionFileWriter> {
        let path = self.dir.join(format!("{}{}", file_id, VERSION_SUFFIX));
        let file = File::create(&path)
            .map_err(|e| RestoreError::simulation(format!("create {}: {}", path.display(), e)))?;
        Ok(VersionFileWriter {
            file: BufWriter::new(file),
        })
    }
}

/// Appends TLVs to one pack file, reporting the physical span of each
/// record. The span starts at the TLV header, which is where the streaming
/// reader keys its pack map.
pub struct PackWriter {
    pack_id: String,
    file: File,
}

impl PackWriter {
    pub fn pack_id(&self) -> &str {
        &self.pack_id
    }

    /// Write one BLOCK and return its physical `[start, end)` span.
    pub fn write_block(&mut self, id: &VersionId, data: &[u8]) -> Result<(i64, i64)> {
        let start = self.file.stream_position()? as i64;
        codec::write_block(&mut self.file, id, data)?;
        let end = self.file.stream_position()? as i64;
        Ok((start, end))
    }

    /// Write one PACKLIST and return its physical `[start, end)` span.
    pub fn write_pack_list(&mut self, stored: &StoredPack) -> Result<(i64, i64)> {
        let start = self.file.stream_position()? as i64;
        codec::write_pack_list(&mut self.file, stored)?;
        let end = self.file.stream_position()? as i64;
        Ok((start, end))
    }
}

/// Appends version-file records.
pub struct VersionFileWriter {
    file: BufWriter<File>,
}

impl VersionFileWriter {
    pub fn write_version(&mut self, record: &MetaReference) -> Result<()> {
        codec::write_version(&mut self.file, record)
    }

    pub fn write_meta_file(&mut self, meta: &MetaFile) -> Result<()> {
        codec::write_meta_file(&mut self.file, meta)
    }

    pub fn finish(mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// Generate a fresh tape set under `root`, replacing whatever was there.
/// Returns every generated object so callers can seed or verify against a
/// source of truth.
pub fn create_simulated_tapes(root: &Path, spec: &SimulationSpec) -> Result<Vec<SimObject>> {
    if spec.tapes == 0 || spec.buckets.is_empty() {
        return Err(RestoreError::simulation(
            "a tape set needs at least one tape and one bucket",
        ));
    }
    if root.exists() {
        fs::remove_dir_all(root)?;
    }
    fs::create_dir_all(root)?;

    let mut rng = rand::thread_rng();
    let mut objects = Vec::new();
    let mut object_count = 0usize;

    for tape_number in 0..spec.tapes {
        let tape_name = format!("TAPE{:02}", tape_number);
        let tape = TapeWriter::new(root, &tape_name)?;
        let mut version_file = tape.version_file(&utils::mint_id())?;
        let pack_id = utils::mint_id();
        let mut pack = tape.pack(&pack_id)?;

        for bucket in &spec.buckets {
            for _ in 0..spec.objects_per_bucket {
                let version = utils::mint_id();
                let object = format!("Object{:06}", object_count);
                object_count += 1;

                let mut data = vec![0u8; spec.blocks_per_object * spec.block_size];
                rng.fill_bytes(&mut data);
                let id = VersionId::new(bucket, &object, &version);

                if object_count % 3 == 0 {
                    // payload small enough to live in the version record
                    version_file.write_version(&MetaReference {
                        id: id.clone(),
                        data: Some(data.clone()),
                        ..Default::default()
                    })?;
                } else {
                    // packed: sequential blocks collapse into one entry
                    let mut entries: Vec<PackEntry> = Vec::new();
                    let mut logical = 0i64;
                    for chunk in data.chunks(spec.block_size) {
                        let (start, end) = pack.write_block(&id, chunk)?;
                        let mut entry =
                            PackEntry::new(&pack_id, logical, logical + chunk.len() as i64);
                        entry.set_physical_location(&pack_id, start, end);
                        logical += chunk.len() as i64;
                        let merged = match entries.last_mut() {
                            Some(last) => last.try_merge(&entry),
                            None => false,
                        };
                        if !merged {
                            entries.push(entry);
                        }
                    }
                    version_file.write_version(&MetaReference {
                        id: id.clone(),
                        packs: entries,
                        ..Default::default()
                    })?;
                }

                objects.push(SimObject {
                    bucket: bucket.clone(),
                    object,
                    version,
                    data,
                });
            }
        }
        version_file.finish()?;
        info!("generated simulated tape {}", tape_name);
    }

    info!(
        "generated {} objects across {} tapes",
        objects.len(),
        spec.tapes
    );
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generated_layout() {
        let dir = TempDir::new().unwrap();
        let spec = SimulationSpec {
            tapes: 2,
            buckets: vec!["b0".to_string()],
            objects_per_bucket: 3,
            blocks_per_object: 2,
            block_size: 100,
        };
        let objects = create_simulated_tapes(dir.path(), &spec).unwrap();
        assert_eq!(objects.len(), 6);

        for tape in ["TAPE00", "TAPE01"] {
            let tape_dir = dir.path().join(tape);
            let names: Vec<String> = fs::read_dir(&tape_dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect();
            assert_eq!(
                names.iter().filter(|n| n.ends_with(".ver")).count(),
                1,
                "one version file per tape"
            );
            assert_eq!(
                names.iter().filter(|n| n.ends_with(".blk")).count(),
                1,
                "one pack per tape"
            );
        }
    }

    #[test]
    fn test_empty_spec_rejected() {
        let dir = TempDir::new().unwrap();
        let spec = SimulationSpec {
            tapes: 0,
            ..Default::default()
        };
        assert!(create_simulated_tapes(dir.path(), &spec).is_err());
    }
}
