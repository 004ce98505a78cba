//! Reconstruction engine: the three phases.
//!
//! 1. Harvest — copy every tape's version files into a local directory and
//!    record which packs live on which tape.
//! 2. Index build — parse the harvested version files, oldest first, into
//!    the index (honoring METAFILE supersession).
//! 3. Pack streaming — walk every pack in tape/pack timestamp order,
//!    joining BLOCK and PACKLIST records to the index, which emits versions
//!    as they complete.
//!
//! Parallelism is one worker thread per tape, gated by a drive-count
//! semaphore; a worker holds its drive from load through unload. Within a
//! worker all I/O is sequential along the pack file.

use crate::codec::{self, Tag};
use crate::error::{RestoreError, Result};
use crate::hardware::{TapeCartridge, TapeDrive, TapeLibrary};
use crate::index::IndexStore;
use crate::resource::Resource;
use crate::utils;
use std::fs::{self, File};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

pub struct Restorer {
    library: Arc<dyn TapeLibrary>,
    index: Arc<IndexStore>,
    version_dir: PathBuf,
}

impl Restorer {
    pub fn new(
        library: Arc<dyn TapeLibrary>,
        index: Arc<IndexStore>,
        version_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            library,
            index,
            version_dir: version_dir.into(),
        }
    }

    /// Phase 1: copy version files off every cartridge and register every
    /// pack's tape. Cartridges already resident in a drive go first and
    /// need no drive reservation; the rest queue on the drive semaphore.
    pub fn harvest(&self) -> Result<()> {
        if self.version_dir.exists() {
            fs::remove_dir_all(&self.version_dir)?;
        }
        fs::create_dir_all(&self.version_dir)?;

        let (drives, mut cartridges) = self.library.audit()?;
        info!(
            "harvest: {} drives, {} cartridges",
            drives.len(),
            cartridges.len()
        );

        // resident cartridges first
        let resident: Vec<(Arc<dyn TapeDrive>, Arc<dyn TapeCartridge>)> = drives
            .iter()
            .filter_map(|drive| drive.cartridge().map(|cart| (drive.clone(), cart)))
            .collect();
        cartridges.retain(|cart| {
            !resident
                .iter()
                .any(|(_, resident_cart)| resident_cart.name() == cart.name())
        });

        thread::scope(|scope| -> Result<()> {
            let handles: Vec<_> = resident
                .iter()
                .map(|(drive, cart)| scope.spawn(move || self.harvest_tape(drive, cart)))
                .collect();
            join_workers(handles)
        })?;

        // remaining cartridges through the semaphore
        let permits = Resource::new(drives.len());
        thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::new();
            for cart in &cartridges {
                info!("looking for version files on tape {}", cart.name());
                let slot = permits.reserve();
                let drive = drives[slot].clone();
                let permits = &permits;
                handles.push(scope.spawn(move || {
                    let result = (|| -> Result<()> {
                        self.library.load(cart, &drive)?;
                        self.harvest_tape(&drive, cart)
                    })();
                    permits.release(slot);
                    result
                }));
            }
            join_workers(handles)
        })?;
        permits.stop();
        Ok(())
    }

    fn harvest_tape(
        &self,
        drive: &Arc<dyn TapeDrive>,
        cart: &Arc<dyn TapeCartridge>,
    ) -> Result<()> {
        info!("mounting tape {} in drive {}", cart.name(), drive.name());
        let files = drive.mount_ltfs()?;

        for (key, path) in &files.version_files {
            debug!("found version file {} at {}", key, path.display());
            fs::copy(path, self.version_dir.join(key))?;
        }
        for key in files.block_files.keys() {
            debug!("found pack {} on tape {}", key, cart.name());
            self.index.add_tape_to_pack(key, &cart.name())?;
        }

        info!(
            "unmounting tape {} from drive {} ({} version files, {} packs)",
            cart.name(),
            drive.name(),
            files.version_files.len(),
            files.block_files.len()
        );
        drive.unmount();
        self.library.unload(drive)?;
        Ok(())
    }

    /// Phase 2: parse the harvested version files in timestamp order into
    /// the index. A METAFILE naming an `oldest` file marks a full metadata
    /// dump; files older than it are superseded and skipped.
    pub fn build_index(&self) -> Result<()> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.version_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            utils::id_from_file_name(&name)?;
            ids.push(name);
        }
        utils::sort_ids_by_time(&mut ids);

        let chosen = self.version_files_to_process(&ids)?;
        info!(
            "building index from {} of {} version files",
            chosen.len(),
            ids.len()
        );

        for id in &chosen {
            self.index_version_file(id)?;
        }
        Ok(())
    }

    /// Scan from the newest version file backwards for a METAFILE; the
    /// first one found truncates the work list at its `oldest` file.
    fn version_files_to_process(&self, ids: &[String]) -> Result<Vec<String>> {
        for id in ids.iter().rev() {
            let path = self.version_dir.join(id);
            let mut file = BufReader::new(File::open(&path)?);
            let tlv = match codec::read_tlv(&mut file) {
                Some(tlv) => tlv,
                None => continue,
            };
            if tlv.tag != Tag::MetaFile {
                continue;
            }
            let meta = match codec::read_meta_file(&mut file, &tlv) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("unreadable metafile in {}: {}", id, e);
                    continue;
                }
            };
            if meta.oldest.is_empty() {
                continue;
            }
            let oldest = meta
                .oldest
                .strip_suffix(utils::VERSION_SUFFIX)
                .unwrap_or(&meta.oldest);
            info!("metafile in {} supersedes files older than {}", id, oldest);
            match ids.iter().position(|candidate| candidate == oldest) {
                Some(position) => return Ok(ids[position..].to_vec()),
                None => {
                    warn!(
                        "metafile names unknown version file {}; processing the full set",
                        oldest
                    );
                    return Ok(ids.to_vec());
                }
            }
        }
        Ok(ids.to_vec())
    }

    fn index_version_file(&self, id: &str) -> Result<()> {
        let path = self.version_dir.join(id);
        info!("processing version file {}", id);
        let mut file = BufReader::new(File::open(&path)?);
        loop {
            let tlv = match codec::read_tlv(&mut file) {
                Some(tlv) => tlv,
                None => break,
            };
            match tlv.tag {
                Tag::Version => {
                    let record = match codec::read_version(&mut file, &tlv) {
                        Ok(record) => record,
                        Err(e) => {
                            warn!("unreadable version record in {}: {}", id, e);
                            break;
                        }
                    };
                    debug!("version record for {}", record.bucket_key());
                    self.index.add_version(&record)?;
                }
                Tag::DeleteVersion => {
                    let record = match codec::read_version(&mut file, &tlv) {
                        Ok(record) => record,
                        Err(e) => {
                            warn!("unreadable delete record in {}: {}", id, e);
                            break;
                        }
                    };
                    debug!("delete record for {}", record.bucket_key());
                    self.index.delete_version(record.version())?;
                }
                Tag::MetaFile => {
                    // already honored while choosing the file set
                    let _ = codec::read_meta_file(&mut file, &tlv);
                }
                other => {
                    warn!("unexpected {:?} record in version file {}", other, id);
                    file.seek(SeekFrom::Current(tlv.data_len as i64))?;
                }
            }
        }
        Ok(())
    }

    /// Phase 3: drain inline versions, then stream every pack in tape/pack
    /// timestamp order, one worker per tape bounded by the drive count.
    pub fn restore_all(&self) -> Result<()> {
        // versions stored inline never require a tape read
        let inline = self.index.versions_in_record()?;
        info!("draining {} inline versions", inline.len());
        for version_id in inline {
            self.index.process_version(&version_id)?;
        }

        let (tape_order, packs_by_tape) = self.index.tape_pack_order()?;
        if tape_order.is_empty() {
            info!("no packs to read");
            return Ok(());
        }

        let (drives, cartridges) = self.library.audit()?;
        info!(
            "restoring from {} tapes across {} drives",
            tape_order.len(),
            drives.len()
        );

        let permits = Resource::new(drives.len());
        thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::new();
            for tape_id in &tape_order {
                let cart = cartridges
                    .iter()
                    .find(|cart| cart.name() == *tape_id)
                    .cloned()
                    .ok_or_else(|| {
                        RestoreError::hardware(format!("tape {} not found in library", tape_id))
                    })?;
                let packs = packs_by_tape[tape_id].clone();
                let slot = permits.reserve();
                let drive = drives[slot].clone();
                let permits = &permits;
                handles.push(scope.spawn(move || {
                    let result = self.stream_tape(&drive, &cart, &packs);
                    permits.release(slot);
                    result
                }));
            }
            join_workers(handles)
        })?;
        permits.stop();

        self.index.log_stranded_blocks()?;
        Ok(())
    }

    fn stream_tape(
        &self,
        drive: &Arc<dyn TapeDrive>,
        cart: &Arc<dyn TapeCartridge>,
        packs: &[String],
    ) -> Result<()> {
        info!("loading tape {} into drive {}", cart.name(), drive.name());
        self.library.load(cart, drive)?;
        let files = drive.mount_ltfs()?;

        for pack_id in packs {
            let path = files.block_files.get(pack_id).ok_or_else(|| {
                RestoreError::hardware(format!(
                    "pack {} missing from tape {}",
                    pack_id,
                    cart.name()
                ))
            })?;
            info!(
                "reading pack {} ({}) from tape {}",
                pack_id,
                utils::id_time_string(pack_id),
                cart.name()
            );
            self.stream_pack(pack_id, path)?;
        }

        info!("unloading tape {} from drive {}", cart.name(), drive.name());
        drive.unmount();
        self.library.unload(drive)?;
        Ok(())
    }

    /// Walk one pack file TLV by TLV. Codec trouble ends this pack but not
    /// the run; a version-file tag inside a pack means the tape is corrupt
    /// or mis-tagged and is fatal.
    fn stream_pack(&self, pack_id: &str, path: &Path) -> Result<()> {
        let mut file = BufReader::new(File::open(path)?);
        loop {
            let start = file.stream_position()? as i64;
            let tlv = match codec::read_tlv(&mut file) {
                Some(tlv) => tlv,
                None => break,
            };
            match tlv.tag {
                Tag::Block => {
                    let block = match codec::read_block(&mut file, &tlv) {
                        Ok(block) => block,
                        Err(e) => {
                            warn!("pack {} unreadable at offset {}: {}", pack_id, start, e);
                            break;
                        }
                    };
                    let end = file.stream_position()? as i64;
                    if self.index.version_exists(&block.id.version)? {
                        self.index.write_block(pack_id, start, end, &block)?;
                    } else {
                        debug!(
                            "block at {}:{} belongs to no known version",
                            pack_id, start
                        );
                    }
                }
                Tag::PackList => {
                    let entries = match codec::read_pack_list(&mut file, &tlv) {
                        Ok(entries) => entries,
                        Err(e) => {
                            warn!("pack {} unreadable at offset {}: {}", pack_id, start, e);
                            break;
                        }
                    };
                    debug!("pack list at {}:{}", pack_id, start);
                    self.index.process_pack_list(pack_id, start, &entries)?;
                }
                other => {
                    return Err(RestoreError::codec(format!(
                        "{:?} record inside pack {} at offset {}",
                        other, pack_id, start
                    )));
                }
            }
        }
        Ok(())
    }
}

fn join_workers(handles: Vec<thread::ScopedJoinHandle<'_, Result<()>>>) -> Result<()> {
    let mut first_error = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => first_error = first_error.or(Some(e)),
            Err(_) => {
                first_error =
                    first_error.or_else(|| Some(RestoreError::hardware("tape worker panicked")))
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
