//! Removable volume discovery
//!
//! Picks the mount point of the first removable, writable block device so
//! captures land on external storage when one is plugged in.

use std::path::PathBuf;
use std::process::Command;

/// Column order of plain `lsblk` output
const NAME: usize = 0;
const RM: usize = 2;
const RO: usize = 4;
const TYPE: usize = 5;
const MOUNTPOINT: usize = 6;

/// Return the mount point of the first usable removable volume, if any
pub fn find_removable_volume() -> Option<PathBuf> {
    let output = match Command::new("lsblk").output() {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            tracing::debug!("lsblk exited with status {}", output.status);
            return None;
        }
        Err(e) => {
            tracing::debug!("Failed to run lsblk: {}", e);
            return None;
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_lsblk(&stdout).into_iter().next()
}

/// Parse `lsblk` output into candidate mount points
///
/// ```text
/// NAME         MAJ:MIN RM   SIZE RO TYPE MOUNTPOINT
/// sda            8:0    1  57.6G  0 disk /media/nvidia/DEVICE
/// ```
pub fn parse_lsblk(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() <= MOUNTPOINT || columns[NAME] == "NAME" {
                return None;
            }

            let removable = columns[RM] == "1";
            let writable = columns[RO] == "0";
            let block = matches!(columns[TYPE], "disk" | "part");
            let mount = columns[MOUNTPOINT];

            (removable && writable && block && mount.len() > 1).then(|| PathBuf::from(mount))
        })
        .collect()
}
