use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error};

use crate::dependencies::Dependency;

/// Decompresses a `.bz2` file in place and returns the path of the
/// decompressed file. The compressed file is removed by bzip2.
pub fn decompress(archive: &Path) -> Result<PathBuf, Error> {
    if archive.extension().and_then(|e| e.to_str()) != Some("bz2") {
        bail!("'{}' does not have a .bz2 extension", archive.display());
    }

    Dependency::Bzip2
        .cmd()
        .arg("-d")
        .arg(archive)
        .run_and_check()
        .with_context(|| format!("Failed to decompress '{}'", archive.display()))?;

    Ok(archive.with_extension(""))
}
