use std::path::{Path, PathBuf};

use log::info;

use dom0backup_api::{
    constants::{RESTIC_KEEP_LAST, RESTIC_PASSWORD, RESTIC_PASSWORD_ENV},
    error::{BackupError, ReportError, SubprocessError},
};
use osutils::dependencies::{Command, Dependency};

/// Operations on the backup repository.
pub trait BackupTool {
    /// Creates an empty repository at `repo`.
    fn init(&self, repo: &Path) -> Result<(), BackupError>;

    /// Backs up the root filesystem and drops all but the newest snapshot.
    fn backup(&self, repo: &Path) -> Result<(), BackupError>;

    /// Restores the newest snapshot over the root filesystem.
    fn restore(&self, repo: &Path) -> Result<(), BackupError>;

    /// Lists the snapshots in the repository.
    fn snapshots(&self, repo: &Path) -> Result<String, BackupError>;
}

/// restic, run from `binary`.
pub struct Restic {
    binary: PathBuf,
}

impl Restic {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn cmd(&self) -> Command {
        Dependency::Restic
            .cmd()
            .with_program(&self.binary)
            .with_env(RESTIC_PASSWORD_ENV, RESTIC_PASSWORD)
    }

    fn repo_cmd(&self, repo: &Path) -> Command {
        self.cmd().with_arg("-r").with_arg(repo)
    }
}

impl BackupTool for Restic {
    fn init(&self, repo: &Path) -> Result<(), BackupError> {
        info!("Initializing backup repository at '{}'", repo.display());
        self.cmd()
            .with_arg("init")
            .with_arg("--repo")
            .with_arg(repo)
            .run_and_check()
            .structured(SubprocessError::InitRepository)
    }

    fn backup(&self, repo: &Path) -> Result<(), BackupError> {
        info!("Backing up '/' to '{}'", repo.display());
        self.repo_cmd(repo)
            .with_args(["--verbose", "backup", "--one-file-system", "/"])
            .run_and_check()
            .structured(SubprocessError::Backup)?;

        info!("Pruning all but the last {RESTIC_KEEP_LAST} snapshot(s)");
        self.repo_cmd(repo)
            .with_args(["forget", "--keep-last"])
            .with_arg(RESTIC_KEEP_LAST.to_string())
            .with_arg("--prune")
            .run_and_check()
            .structured(SubprocessError::Prune)
    }

    fn restore(&self, repo: &Path) -> Result<(), BackupError> {
        info!("Restoring latest snapshot from '{}'", repo.display());
        self.repo_cmd(repo)
            .with_args(["restore", "latest", "--target", "/"])
            .run_and_check()
            .structured(SubprocessError::Restore)
    }

    fn snapshots(&self, repo: &Path) -> Result<String, BackupError> {
        self.repo_cmd(repo)
            .with_arg("snapshots")
            .output_and_check()
            .structured(SubprocessError::Snapshots)
    }
}
