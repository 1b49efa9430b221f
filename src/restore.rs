//! Restoring runs in a worker process that outlives the command that started
//! it. The worker drops the host to single-user mode, restores the newest
//! snapshot over `/` and reboots.

use std::{
    env,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::Context;
use log::{info, LevelFilter};

use dom0backup_api::error::{BackupError, ReportError, SubprocessError};
use osutils::dependencies::{Dependency, DependencyResultExt};

use crate::restic::BackupTool;

/// Name of the hidden subcommand the worker is started with.
pub const RESTORE_WORKER_COMMAND: &str = "restore-worker";

/// Starts the restore of the repository at `repo` without waiting for it.
pub trait RestoreLauncher {
    fn launch(&self, repo: &Path) -> Result<(), BackupError>;
}

/// Re-runs the current executable as a detached restore worker.
pub struct DetachedWorker {
    pub config: PathBuf,
    pub verbosity: LevelFilter,
}

impl DetachedWorker {
    fn command(&self, executable: &Path, repo: &Path) -> Command {
        let mut cmd = Command::new(executable);
        cmd.arg("--verbosity")
            .arg(self.verbosity.as_str())
            .arg("--config")
            .arg(&self.config)
            .arg(RESTORE_WORKER_COMMAND)
            .arg("--repo")
            .arg(repo)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Keep running when the session of the caller ends
            .process_group(0);
        cmd
    }
}

impl RestoreLauncher for DetachedWorker {
    fn launch(&self, repo: &Path) -> Result<(), BackupError> {
        let executable = env::current_exe()
            .context("Failed to locate the running executable")
            .structured(SubprocessError::SpawnRestoreWorker)?;

        let child = self
            .command(&executable, repo)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", executable.display()))
            .structured(SubprocessError::SpawnRestoreWorker)?;

        info!("Started restore worker with PID {}", child.id());
        Ok(())
    }
}

/// Body of the restore worker.
pub fn run_worker(tool: &dyn BackupTool, repo: &Path) -> Result<(), BackupError> {
    info!("Switching to single-user mode");
    Dependency::Init
        .cmd()
        .arg("1")
        .run_and_check()
        .message("Failed to switch to single-user mode")?;

    tool.restore(repo)?;

    info!("Rebooting");
    Dependency::Shutdown
        .cmd()
        .with_args(["-r", "now"])
        .run_and_check()
        .structured(SubprocessError::Reboot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_command_line() {
        let worker = DetachedWorker {
            config: "/etc/dom0backup/config.yaml".into(),
            verbosity: LevelFilter::Info,
        };
        let cmd = worker.command(Path::new("/usr/bin/dom0backup"), Path::new("/srv/restic-repo"));

        assert_eq!(cmd.get_program(), "/usr/bin/dom0backup");
        assert_eq!(
            cmd.get_args().collect::<Vec<_>>(),
            vec![
                "--verbosity",
                "INFO",
                "--config",
                "/etc/dom0backup/config.yaml",
                "restore-worker",
                "--repo",
                "/srv/restic-repo",
            ]
        );
    }
}
