//! Run configuration.
//!
//! A JSON file maps the changer device and each changer drive number to its
//! tape device path and LTFS mount point. The simulator needs none of this.

use crate::error::{RestoreError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "LibraryDevice")]
    pub library_device: String,

    #[serde(rename = "TapeDevices")]
    pub tape_devices: HashMap<usize, DriveDevice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveDevice {
    #[serde(rename = "slot", default)]
    pub slot: usize,

    #[serde(rename = "Device")]
    pub device: String,

    #[serde(rename = "MountPoint")]
    pub mount_point: PathBuf,
}

pub fn load(path: &Path) -> Result<Config> {
    let data = fs::read(path)
        .map_err(|e| RestoreError::config(format!("read {}: {}", path.display(), e)))?;
    serde_json::from_slice(&data)
        .map_err(|e| RestoreError::config(format!("parse {}: {}", path.display(), e)))
}
