use std::path::Path;

use anyhow::{Context, Error};

use crate::dependencies::Dependency;

/// Resize ext* filesystem on the specified block device to fill the entire device.
///
/// Works on mounted filesystems too, in which case the resize happens online.
pub fn run(block_device_path: &Path) -> Result<(), Error> {
    Dependency::Resize2fs
        .cmd()
        .arg(block_device_path)
        .run_and_check()
        .context("Failed to execute resize2fs")
}
