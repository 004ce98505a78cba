//! Directory-backed tape library used for testing and dry runs.
//!
//! Each subdirectory of the simulation root is one cartridge; its files are
//! the cartridge's LTFS content. "Mounting" is a directory walk.

use super::{find_version_and_block_files, MountedFiles, TapeCartridge, TapeDrive, TapeLibrary};
use crate::error::{RestoreError, Result};
use std::any::Any;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub struct TapeLibrarySimulator {
    drives: Vec<Arc<SimDrive>>,
    tapes: Vec<Arc<SimCartridge>>,
}

struct SimDrive {
    name: String,
    root: PathBuf,
    loaded: Mutex<Option<Arc<SimCartridge>>>,
}

struct SimCartridge {
    name: String,
    slot: usize,
}

impl TapeLibrarySimulator {
    /// Scan `root` for per-tape subdirectories and create `drive_count`
    /// simulated drives.
    pub fn new(root: impl Into<PathBuf>, drive_count: usize) -> Result<Self> {
        let root = root.into();
        let mut tapes = Vec::new();
        let mut names = Vec::new();
        for entry in fs::read_dir(&root)
            .map_err(|e| RestoreError::hardware(format!("read {}: {}", root.display(), e)))?
        {
            let entry = entry?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        for (slot, name) in names.into_iter().enumerate() {
            info!("found simulated tape {}", name);
            tapes.push(Arc::new(SimCartridge { name, slot }));
        }

        let drives = (0..drive_count.max(1))
            .map(|i| {
                Arc::new(SimDrive {
                    name: format!("Drive-{}", i),
                    root: root.clone(),
                    loaded: Mutex::new(None),
                })
            })
            .collect();

        Ok(Self { drives, tapes })
    }
}

impl TapeLibrary for TapeLibrarySimulator {
    fn audit(&self) -> Result<(Vec<Arc<dyn TapeDrive>>, Vec<Arc<dyn TapeCartridge>>)> {
        let drives = self
            .drives
            .iter()
            .map(|d| d.clone() as Arc<dyn TapeDrive>)
            .collect();
        let tapes = self
            .tapes
            .iter()
            .map(|t| t.clone() as Arc<dyn TapeCartridge>)
            .collect();
        Ok((drives, tapes))
    }

    fn load(&self, cartridge: &Arc<dyn TapeCartridge>, drive: &Arc<dyn TapeDrive>) -> Result<()> {
        let drive = drive
            .as_any()
            .downcast_ref::<SimDrive>()
            .ok_or_else(|| RestoreError::hardware("load of a foreign drive"))?;
        let cartridge = self
            .tapes
            .iter()
            .find(|t| t.name == cartridge.name())
            .ok_or_else(|| {
                RestoreError::hardware(format!("unknown cartridge {}", cartridge.name()))
            })?;

        let mut loaded = drive.loaded.lock().unwrap();
        if loaded.is_some() {
            return Err(RestoreError::hardware(format!(
                "drive {} is busy",
                drive.name
            )));
        }
        debug!("loading {} into {}", cartridge.name, drive.name);
        *loaded = Some(cartridge.clone());
        Ok(())
    }

    fn unload(&self, drive: &Arc<dyn TapeDrive>) -> Result<()> {
        let drive = drive
            .as_any()
            .downcast_ref::<SimDrive>()
            .ok_or_else(|| RestoreError::hardware("unload of a foreign drive"))?;
        let mut loaded = drive.loaded.lock().unwrap();
        if loaded.take().is_none() {
            return Err(RestoreError::hardware(format!(
                "drive {} has no cartridge to unload",
                drive.name
            )));
        }
        Ok(())
    }
}

impl TapeDrive for SimDrive {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn cartridge(&self) -> Option<Arc<dyn TapeCartridge>> {
        self.loaded
            .lock()
            .unwrap()
            .clone()
            .map(|c| c as Arc<dyn TapeCartridge>)
    }

    fn mount_ltfs(&self) -> Result<MountedFiles> {
        let loaded = self.loaded.lock().unwrap();
        let cartridge = loaded
            .as_ref()
            .ok_or_else(|| RestoreError::hardware(format!("drive {} is empty", self.name)))?;
        let tape_dir = self.root.join(&cartridge.name);
        debug!("simulated mount of {}", tape_dir.display());
        find_version_and_block_files(&tape_dir)
    }

    fn unmount(&self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TapeCartridge for SimCartridge {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn slot(&self) -> usize {
        self.slot
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
