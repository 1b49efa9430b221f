use std::{fs::Permissions, io::ErrorKind, os::unix::fs::PermissionsExt, path::Path};

use anyhow::{Context, Error};

/// Creates all directories in a path if they don't exist
pub fn create_dirs<S>(path: S) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    std::fs::create_dir_all(path.as_ref()).context(format!(
        "Could not create path: {}",
        path.as_ref().display()
    ))
}

/// Creates a single directory. A directory that already exists is left alone,
/// any other failure is an error.
pub fn ensure_dir<S>(path: S) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    match std::fs::create_dir(path.as_ref()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e).context(format!(
            "Could not create directory: {}",
            path.as_ref().display()
        )),
    }
}

/// Sets the permission bits of a file
pub fn set_mode<S>(path: S, mode: u32) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    std::fs::set_permissions(path.as_ref(), Permissions::from_mode(mode)).context(format!(
        "Could not set permissions {:#o} for file {}",
        mode,
        path.as_ref().display()
    ))
}

/// Moves a file, falling back to copy and delete when source and destination
/// are on different filesystems
pub fn move_file<S, D>(source: S, destination: D) -> Result<(), Error>
where
    S: AsRef<Path>,
    D: AsRef<Path>,
{
    let (source, destination) = (source.as_ref(), destination.as_ref());
    if std::fs::rename(source, destination).is_ok() {
        return Ok(());
    }

    std::fs::copy(source, destination).with_context(|| {
        format!(
            "Could not copy {} to {}",
            source.display(),
            destination.display()
        )
    })?;
    std::fs::remove_file(source)
        .with_context(|| format!("Could not remove file: {}", source.display()))
}
