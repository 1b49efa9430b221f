use std::path::Path;

use anyhow::{Context, Error};

use crate::dependencies::Dependency;

/// Mounts the block device at `mount_dir`, letting mount detect the filesystem.
pub fn mount(device: impl AsRef<Path>, mount_dir: impl AsRef<Path>) -> Result<(), Error> {
    Dependency::Mount
        .cmd()
        .arg(device.as_ref())
        .arg(mount_dir.as_ref())
        .run_and_check()
        .with_context(|| {
            format!(
                "Failed to mount {} to path {}",
                device.as_ref().display(),
                mount_dir.as_ref().display(),
            )
        })
}

/// Unmounts given directory mount_dir.
pub fn umount(mount_dir: impl AsRef<Path>) -> Result<(), Error> {
    Dependency::Umount
        .cmd()
        .arg(mount_dir.as_ref())
        .run_and_check()
        .with_context(|| format!("Failed to unmount directory {}", mount_dir.as_ref().display()))
}
