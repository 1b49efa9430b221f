use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Error};
use log::{debug, info};

use dom0backup_api::error::{BackupError, ReportError, ToolAcquisitionError};
use osutils::{bzip2, files};

/// Makes sure restic is installed at `path`, downloading the release archive
/// from `url` when it is not. The binary is left readable, writable and
/// executable by root only.
pub fn ensure_restic(path: &Path, url: &str) -> Result<(), BackupError> {
    if path.exists() {
        debug!("Using restic at '{}'", path.display());
    } else {
        install(path, url)?;
    }

    files::set_mode(path, 0o700).structured(ToolAcquisitionError::Install {
        path: path.display().to_string(),
    })
}

fn install(path: &Path, url: &str) -> Result<(), BackupError> {
    info!("Downloading restic from '{url}'");
    let staging = tempfile::tempdir().structured(ToolAcquisitionError::Download {
        url: url.into(),
    })?;

    let archive = download(url, staging.path()).structured(ToolAcquisitionError::Download {
        url: url.into(),
    })?;

    let binary = bzip2::decompress(&archive).structured(ToolAcquisitionError::Decompress)?;

    let install = || -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            files::create_dirs(parent)?;
        }
        files::move_file(&binary, path)
    };
    install().structured(ToolAcquisitionError::Install {
        path: path.display().to_string(),
    })?;

    info!("Installed restic to '{}'", path.display());
    Ok(())
}

/// Downloads `url` into `directory`, keeping the last path segment of the URL
/// as the file name.
fn download(url: &str, directory: &Path) -> Result<PathBuf, Error> {
    let name = match url.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => bail!("URL '{url}' does not name a file"),
    };

    let body = reqwest::blocking::get(url)
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.bytes())
        .context(format!("Failed to download {url}"))?;
    debug!("Downloaded {} bytes", body.len());

    let archive = directory.join(name);
    fs::write(&archive, &body)
        .with_context(|| format!("Failed to write '{}'", archive.display()))?;
    Ok(archive)
}
