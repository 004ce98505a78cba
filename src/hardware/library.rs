//! Real tape library driver.
//!
//! The changer is operated through the `mtx` utility and drives are mounted
//! with the `ltfs` FUSE binary. Drive device paths and mount points come
//! from the JSON config; cartridge inventory comes from `mtx status`.

use super::{find_version_and_block_files, MountedFiles, TapeCartridge, TapeDrive, TapeLibrary};
use crate::config::DriveDevice;
use crate::error::{RestoreError, Result};
use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub struct RealTapeLibrary {
    changer_device: String,
    drives: Vec<Arc<RealDrive>>,
    cartridges: Vec<Arc<RealCartridge>>,
}

struct RealDrive {
    number: usize,
    device: String,
    mount_point: PathBuf,
    loaded: Mutex<Option<Arc<RealCartridge>>>,
}

struct RealCartridge {
    volser: String,
    slot: Mutex<usize>,
}

/// One line of `mtx status`, reduced to what the driver needs.
#[derive(Debug, PartialEq, Eq)]
enum StatusLine {
    Drive {
        number: usize,
        volser: Option<String>,
        source_slot: Option<usize>,
    },
    Slot {
        number: usize,
        volser: Option<String>,
    },
}

impl RealTapeLibrary {
    /// Inventory the changer and match its drives against the configured
    /// device table. Every changer drive must have a configured device path.
    pub fn new(changer_device: &str, devices: &HashMap<usize, DriveDevice>) -> Result<Self> {
        let output = run_mtx(changer_device, &["status"])?;
        let lines = parse_mtx_status(&output)?;

        let mut drives = Vec::new();
        let mut cartridges = Vec::new();
        let mut free_slots: Vec<usize> = lines
            .iter()
            .filter_map(|l| match l {
                StatusLine::Slot {
                    number,
                    volser: None,
                } => Some(*number),
                _ => None,
            })
            .collect();

        for line in &lines {
            match line {
                StatusLine::Drive {
                    number,
                    volser,
                    source_slot,
                } => {
                    let device = devices.get(number).ok_or_else(|| {
                        RestoreError::config(format!(
                            "changer drive {} has no configured device",
                            number
                        ))
                    })?;
                    let drive = Arc::new(RealDrive {
                        number: *number,
                        device: device.device.clone(),
                        mount_point: device.mount_point.clone(),
                        loaded: Mutex::new(None),
                    });
                    // anything resident at startup gets a home slot now so
                    // it can be unloaded later
                    if let Some(volser) = volser {
                        let home = source_slot.or_else(|| free_slots.pop()).ok_or_else(|| {
                            RestoreError::hardware(format!(
                                "no free slot to home cartridge {}",
                                volser
                            ))
                        })?;
                        let cartridge = Arc::new(RealCartridge {
                            volser: volser.clone(),
                            slot: Mutex::new(home),
                        });
                        *drive.loaded.lock().unwrap() = Some(cartridge.clone());
                        cartridges.push(cartridge);
                    }
                    // a stale mount from a previous run would shadow ours
                    drive.unmount();
                    drives.push(drive);
                }
                StatusLine::Slot {
                    number,
                    volser: Some(volser),
                } => {
                    cartridges.push(Arc::new(RealCartridge {
                        volser: volser.clone(),
                        slot: Mutex::new(*number),
                    }));
                }
                StatusLine::Slot { volser: None, .. } => {}
            }
        }

        info!(
            "library {}: {} drives, {} cartridges",
            changer_device,
            drives.len(),
            cartridges.len()
        );
        Ok(Self {
            changer_device: changer_device.to_string(),
            drives,
            cartridges,
        })
    }
}

impl TapeLibrary for RealTapeLibrary {
    fn audit(&self) -> Result<(Vec<Arc<dyn TapeDrive>>, Vec<Arc<dyn TapeCartridge>>)> {
        let drives = self
            .drives
            .iter()
            .map(|d| d.clone() as Arc<dyn TapeDrive>)
            .collect();
        let cartridges = self
            .cartridges
            .iter()
            .map(|c| c.clone() as Arc<dyn TapeCartridge>)
            .collect();
        Ok((drives, cartridges))
    }

    fn load(&self, cartridge: &Arc<dyn TapeCartridge>, drive: &Arc<dyn TapeDrive>) -> Result<()> {
        let drive = downcast_drive(drive)?;
        let cartridge = self
            .cartridges
            .iter()
            .find(|c| c.volser == cartridge.name())
            .ok_or_else(|| {
                RestoreError::hardware(format!("unknown cartridge {}", cartridge.name()))
            })?;

        let slot = *cartridge.slot.lock().unwrap();
        debug!(
            "mtx load slot {} -> drive {} ({})",
            slot, drive.number, cartridge.volser
        );
        run_mtx(
            &self.changer_device,
            &["load", &slot.to_string(), &drive.number.to_string()],
        )?;
        *drive.loaded.lock().unwrap() = Some(cartridge.clone());
        Ok(())
    }

    fn unload(&self, drive: &Arc<dyn TapeDrive>) -> Result<()> {
        let drive = downcast_drive(drive)?;
        let cartridge = drive
            .loaded
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| {
                RestoreError::hardware(format!("drive {} has no cartridge to unload", drive.number))
            })?;
        let slot = *cartridge.slot.lock().unwrap();
        debug!(
            "mtx unload slot {} <- drive {} ({})",
            slot, drive.number, cartridge.volser
        );
        run_mtx(
            &self.changer_device,
            &["unload", &slot.to_string(), &drive.number.to_string()],
        )?;
        Ok(())
    }
}

fn downcast_drive<'a>(drive: &'a Arc<dyn TapeDrive>) -> Result<&'a RealDrive> {
    drive
        .as_any()
        .downcast_ref::<RealDrive>()
        .ok_or_else(|| RestoreError::hardware("foreign drive handle"))
}

impl TapeDrive for RealDrive {
    fn name(&self) -> String {
        format!("Drive{}", self.number)
    }

    fn cartridge(&self) -> Option<Arc<dyn TapeCartridge>> {
        self.loaded
            .lock()
            .unwrap()
            .clone()
            .map(|c| c as Arc<dyn TapeCartridge>)
    }

    fn mount_ltfs(&self) -> Result<MountedFiles> {
        // a leftover mount would make ltfs fail; drop it first
        self.unmount();
        let devname = format!("devname={}", self.device);
        let mount_point = self.mount_point.to_string_lossy().to_string();
        info!("mounting LTFS on {} at {}", self.device, mount_point);
        let status = Command::new("ltfs")
            .args(["-o", &devname, &mount_point])
            .output()
            .map_err(|e| RestoreError::hardware(format!("spawn ltfs: {}", e)))?;
        if !status.status.success() {
            return Err(RestoreError::hardware(format!(
                "ltfs mount of {} failed: {}",
                self.device,
                String::from_utf8_lossy(&status.stderr).trim()
            )));
        }
        find_version_and_block_files(&self.mount_point)
    }

    fn unmount(&self) {
        if let Err(e) = Command::new("umount").arg(&self.mount_point).output() {
            warn!("umount {} failed: {}", self.mount_point.display(), e);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TapeCartridge for RealCartridge {
    fn name(&self) -> String {
        self.volser.clone()
    }

    fn slot(&self) -> usize {
        *self.slot.lock().unwrap()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn run_mtx(device: &str, args: &[&str]) -> Result<String> {
    let output = Command::new("mtx")
        .arg("-f")
        .arg(device)
        .args(args)
        .output()
        .map_err(|e| RestoreError::hardware(format!("spawn mtx: {}", e)))?;
    if !output.status.success() {
        return Err(RestoreError::hardware(format!(
            "mtx {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Parse `mtx status` output into drive and slot lines.
fn parse_mtx_status(output: &str) -> Result<Vec<StatusLine>> {
    let mut lines = Vec::new();
    for raw in output.lines() {
        let line = raw.trim();
        if let Some(rest) = line.strip_prefix("Data Transfer Element ") {
            let (number, tail) = split_element(rest)?;
            if tail.contains("Empty") {
                lines.push(StatusLine::Drive {
                    number,
                    volser: None,
                    source_slot: None,
                });
            } else {
                let source_slot = tail
                    .split("Storage Element ")
                    .nth(1)
                    .and_then(|s| s.split_whitespace().next())
                    .and_then(|s| s.parse().ok());
                lines.push(StatusLine::Drive {
                    number,
                    volser: parse_volume_tag(tail),
                    source_slot,
                });
            }
        } else if let Some(rest) = line.strip_prefix("Storage Element ") {
            // import/export elements are not usable home slots
            if rest.contains("IMPORT/EXPORT") {
                continue;
            }
            let (number, tail) = split_element(rest)?;
            lines.push(StatusLine::Slot {
                number,
                volser: parse_volume_tag(tail),
            });
        }
    }
    Ok(lines)
}

fn split_element(rest: &str) -> Result<(usize, &str)> {
    let colon = rest
        .find(':')
        .ok_or_else(|| RestoreError::hardware(format!("unparsable mtx line: {}", rest)))?;
    let number = rest[..colon]
        .trim()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| RestoreError::hardware(format!("unparsable mtx element: {}", rest)))?;
    Ok((number, &rest[colon + 1..]))
}

fn parse_volume_tag(tail: &str) -> Option<String> {
    tail.split("VolumeTag")
        .nth(1)
        .map(|s| s.trim_start_matches([' ', '=']).trim().to_string())
        .filter(|s| !s.is_empty())
}
