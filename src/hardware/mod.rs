//! Tape hardware capability interface.
//!
//! The engine only depends on these traits: a library that can audit, load
//! and unload; drives that can mount LTFS and expose the version and block
//! files of the mounted cartridge. The real implementation drives a changer
//! through `mtx` and mounts through `ltfs`; the simulator walks a directory
//! tree of per-tape subdirectories.

mod library;
mod simulator;

pub use library::RealTapeLibrary;
pub use simulator::TapeLibrarySimulator;

use crate::error::Result;
use crate::utils::{BLOCK_SUFFIX, VERSION_SUFFIX};
use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File maps of a mounted cartridge: base identifier → absolute path.
#[derive(Debug, Default)]
pub struct MountedFiles {
    pub version_files: HashMap<String, PathBuf>,
    pub block_files: HashMap<String, PathBuf>,
}

pub trait TapeLibrary: Send + Sync {
    /// Enumerate the library's drives and cartridges.
    fn audit(&self) -> Result<(Vec<Arc<dyn TapeDrive>>, Vec<Arc<dyn TapeCartridge>>)>;

    /// Move a cartridge into a drive.
    fn load(&self, cartridge: &Arc<dyn TapeCartridge>, drive: &Arc<dyn TapeDrive>) -> Result<()>;

    /// Return the drive's cartridge to its home slot.
    fn unload(&self, drive: &Arc<dyn TapeDrive>) -> Result<()>;
}

pub trait TapeDrive: Send + Sync {
    /// Drive identity for logs (serial or stable name).
    fn name(&self) -> String;

    /// Cartridge currently in the drive, if any.
    fn cartridge(&self) -> Option<Arc<dyn TapeCartridge>>;

    /// Mount the loaded cartridge as a filesystem and list its files.
    fn mount_ltfs(&self) -> Result<MountedFiles>;

    /// Unmount; best-effort, a drive that was never mounted is fine.
    fn unmount(&self);

    fn as_any(&self) -> &dyn Any;
}

pub trait TapeCartridge: Send + Sync {
    /// Volume serial.
    fn name(&self) -> String;

    /// Current storage slot in the changer.
    fn slot(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
}

/// Walk a mount point and collect `<ulid>.ver` / `<ulid>.blk` files keyed by
/// their base identifier. Paths keep the mount point so they can be opened
/// while the tape stays mounted.
pub fn find_version_and_block_files(mount_point: &Path) -> Result<MountedFiles> {
    let mut files = MountedFiles::default();
    walk(mount_point, &mut files)?;
    Ok(files)
}

fn walk(dir: &Path, files: &mut MountedFiles) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files)?;
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if let Some(base) = name.strip_suffix(VERSION_SUFFIX) {
            files.version_files.insert(base.to_string(), path.clone());
        } else if let Some(base) = name.strip_suffix(BLOCK_SUFFIX) {
            files.block_files.insert(base.to_string(), path.clone());
        }
    }
    Ok(())
}
