use std::path::Path;

use log::{debug, info, warn};

use dom0backup_api::{
    constants::BACKUP_FILESYSTEM,
    error::{BackupError, IntegrityError, ReportError, SubprocessError},
};
use osutils::{dependencies::CommandOutput, e2fsck, files, mkfs, mount, mountpoint, resize2fs};

use crate::restic::BackupTool;

/// Filesystem and mount operations on the local host.
pub trait HostSystem {
    /// Creates the directory, tolerating one that already exists.
    fn create_dir(&self, path: &Path) -> Result<(), BackupError>;
    fn is_mountpoint(&self, path: &Path) -> Result<bool, BackupError>;
    fn make_filesystem(&self, device: &Path, filesystem: &str) -> Result<(), BackupError>;
    /// Runs a forced filesystem check. The exit status is left to the caller.
    fn check_filesystem(&self, device: &Path) -> Result<CommandOutput, BackupError>;
    fn resize_filesystem(&self, device: &Path) -> Result<(), BackupError>;
    fn mount(&self, device: &Path, path: &Path) -> Result<(), BackupError>;
    fn unmount(&self, path: &Path) -> Result<(), BackupError>;
}

/// The real host, driven through the system tools.
pub struct LocalSystem;

impl HostSystem for LocalSystem {
    fn create_dir(&self, path: &Path) -> Result<(), BackupError> {
        files::ensure_dir(path).structured(SubprocessError::CreateMountDirectory {
            path: path.display().to_string(),
        })
    }

    fn is_mountpoint(&self, path: &Path) -> Result<bool, BackupError> {
        mountpoint::check_is_mountpoint(path).structured(SubprocessError::CheckMountPoint {
            path: path.display().to_string(),
        })
    }

    fn make_filesystem(&self, device: &Path, filesystem: &str) -> Result<(), BackupError> {
        mkfs::run(device, filesystem).structured(SubprocessError::CreateFilesystem {
            device: device.display().to_string(),
        })
    }

    fn check_filesystem(&self, device: &Path) -> Result<CommandOutput, BackupError> {
        e2fsck::preen(device).structured(SubprocessError::CommandCouldNotExecute {
            binary: "e2fsck",
        })
    }

    fn resize_filesystem(&self, device: &Path) -> Result<(), BackupError> {
        resize2fs::run(device).structured(SubprocessError::ResizeFilesystem {
            device: device.display().to_string(),
        })
    }

    fn mount(&self, device: &Path, path: &Path) -> Result<(), BackupError> {
        mount::mount(device, path).structured(SubprocessError::Mount {
            device: device.display().to_string(),
            path: path.display().to_string(),
        })
    }

    fn unmount(&self, path: &Path) -> Result<(), BackupError> {
        mount::umount(path).structured(SubprocessError::Unmount {
            path: path.display().to_string(),
        })
    }
}

/// Makes the backup repository available at `mount_path`.
///
/// A new disk gets a fresh filesystem and an empty repository. An existing
/// disk is checked and grown to the size of the device before mounting. If
/// `mount_path` is already a mount point it is reused as-is, which is only
/// acceptable for an existing disk.
pub fn prepare(
    system: &dyn HostSystem,
    tool: &dyn BackupTool,
    device: &Path,
    is_new_disk: bool,
    mount_path: &Path,
) -> Result<(), BackupError> {
    system.create_dir(mount_path)?;

    if system.is_mountpoint(mount_path)? {
        if is_new_disk {
            return Err(BackupError::new(IntegrityError::MountPathBusy {
                path: mount_path.display().to_string(),
            }));
        }
        warn!(
            "'{}' is already mounted, reusing the existing mount",
            mount_path.display()
        );
    } else {
        if is_new_disk {
            info!(
                "Creating {BACKUP_FILESYSTEM} filesystem on '{}'",
                device.display()
            );
            system.make_filesystem(device, BACKUP_FILESYSTEM)?;
        }

        let fsck = system.check_filesystem(device)?;
        if fsck.success() {
            debug!("Filesystem check of '{}' passed", device.display());
        } else {
            warn!(
                "Filesystem check of '{}' {}:\n{}",
                device.display(),
                fsck.explain_exit(),
                fsck.output_report()
            );
        }

        system.resize_filesystem(device)?;
        system.mount(device, mount_path)?;
        info!("Mounted '{}' at '{}'", device.display(), mount_path.display());
    }

    // A busy path with a new disk bailed out above, so the mount is ours here
    if is_new_disk {
        if let Err(e) = tool.init(mount_path) {
            warn!("Unmounting '{}' after failed setup", mount_path.display());
            return Err(match release(system, mount_path) {
                Ok(()) => e,
                Err(unmount) => e.secondary_error_context(unmount),
            });
        }
    }

    Ok(())
}

/// Unmounts the backup repository.
pub fn release(system: &dyn HostSystem, mount_path: &Path) -> Result<(), BackupError> {
    system.unmount(mount_path)?;
    info!("Unmounted '{}'", mount_path.display());
    Ok(())
}
