use std::path::Path;

use anyhow::{Context, Error};

use crate::dependencies::Dependency;

/// Creates a filesystem of the given type on the block device. Any existing
/// data on the device is lost.
pub fn run(device_path: &Path, filesystem: &str) -> Result<(), Error> {
    Dependency::Mkfs
        .cmd()
        .arg("--type")
        .arg(filesystem)
        .arg(device_path)
        .run_and_check()
        .context("Failed to execute mkfs")
}
