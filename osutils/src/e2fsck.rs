use std::path::Path;

use anyhow::{Context, Error};

use crate::dependencies::{CommandOutput, Dependency};

/// Runs a forced, non-interactive e2fsck on the block device, automatically
/// repairing what can be repaired safely.
///
/// The exit status is handed back as-is since only the caller knows which
/// statuses it can live with. An error is only returned when e2fsck could not
/// be run at all.
pub fn preen(block_device_path: &Path) -> Result<CommandOutput, Error> {
    Dependency::E2fsck
        .cmd()
        .arg("-f")
        .arg("-p")
        .arg(block_device_path)
        .output()
        .context("Failed to execute e2fsck")
}
