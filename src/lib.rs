use log::info;

use dom0backup_api::error::{BackupError, BackupResultExt};

pub mod attach;
pub mod cli;
pub mod config;
pub mod host;
mod logging;
pub mod mount;
pub mod provision;
pub mod restic;
pub mod restore;
pub mod session;
pub mod tool;

pub use logging::{background_log::BackgroundLog, multilog::MultiLogger};

use cli::Action;
use restore::RestoreLauncher;
use session::{with_backup_session, BackupSession, SessionContext};

/// Version as provided by environment variables at build time
pub const DOM0BACKUP_VERSION: &str = match option_env!("DOM0BACKUP_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub enum ExitKind {
    /// Requested operation completed and the backup volume was released.
    Done,
    /// A detached worker took over the mounted backup volume. The process
    /// should exit right away without further cleanup.
    Detached,
}

/// Mounts the backup repository, performs `action` on it and releases it.
///
/// Restore is the exception: the repository is handed over to a detached
/// worker and left mounted.
pub fn run(
    ctx: &SessionContext,
    action: Action,
    launcher: &dyn RestoreLauncher,
) -> Result<ExitKind, BackupError> {
    match action {
        Action::Restore => {
            let session = BackupSession::acquire(ctx)?;
            if let Err(e) = launcher.launch(session.mount_path()) {
                return Err(match session.release() {
                    Ok(()) => e,
                    Err(release) => e.secondary_error_context(release),
                })
                .message("Failed to start restore");
            }
            session.abandon();
            Ok(ExitKind::Detached)
        }

        Action::Backup => with_backup_session(ctx, |repo| ctx.tool.backup(repo))
            .message("Failed to back up")
            .map(|()| ExitKind::Done),

        Action::Status => with_backup_session(ctx, |repo| ctx.tool.snapshots(repo))
            .message("Failed to list snapshots")
            .map(|snapshots| {
                print!("{snapshots}");
                ExitKind::Done
            }),

        Action::None => with_backup_session(ctx, |repo| {
            info!("No action requested for '{}'", repo.display());
            Ok(())
        })
        .map(|()| ExitKind::Done),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        cell::RefCell,
        path::{Path, PathBuf},
    };

    use dom0backup_api::error::{ErrorKind, SubprocessError};

    use crate::session::testing::Host;

    #[derive(Default)]
    struct RecordingLauncher {
        launched: RefCell<Vec<PathBuf>>,
        fail: bool,
    }

    impl RestoreLauncher for RecordingLauncher {
        fn launch(&self, repo: &Path) -> Result<(), BackupError> {
            if self.fail {
                return Err(BackupError::new(SubprocessError::SpawnRestoreWorker));
            }
            self.launched.borrow_mut().push(repo.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn test_restore_skips_teardown() {
        let host = Host::new();
        let launcher = RecordingLauncher::default();

        let exit = run(&host.ctx(), Action::Restore, &launcher).unwrap();
        assert_eq!(exit, ExitKind::Detached);
        assert_eq!(
            *launcher.launched.borrow(),
            vec![PathBuf::from("/srv/restic-repo")]
        );

        let actions = host.actions();
        assert!(actions.contains(&"mount".to_string()));
        for teardown in ["umount", "VBD.unplug", "VBD.destroy", "session.logout"] {
            assert!(
                !actions.contains(&teardown.to_string()),
                "'{teardown}' should not have run"
            );
        }
        assert_eq!(host.api.vbds().len(), 1);
    }

    #[test]
    fn test_restore_launch_failure_releases() {
        let host = Host::new();
        let launcher = RecordingLauncher {
            fail: true,
            ..Default::default()
        };

        let err = run(&host.ctx(), Action::Restore, &launcher).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Subprocess(SubprocessError::SpawnRestoreWorker)
        );
        assert!(host.actions().contains(&"umount".to_string()));
        assert!(host.api.vbds().is_empty());
    }

    #[test]
    fn test_actions() {
        let host = Host::new();
        let launcher = RecordingLauncher::default();
        let ctx = host.ctx();

        assert_eq!(run(&ctx, Action::Backup, &launcher).unwrap(), ExitKind::Done);
        assert!(host.actions().contains(&"restic backup".to_string()));

        host.clear_journal();
        assert_eq!(run(&ctx, Action::Status, &launcher).unwrap(), ExitKind::Done);
        assert!(host.actions().contains(&"restic snapshots".to_string()));

        host.clear_journal();
        assert_eq!(run(&ctx, Action::None, &launcher).unwrap(), ExitKind::Done);
        let actions = host.actions();
        assert!(actions.iter().all(|a| !a.starts_with("restic")));
        assert_eq!(actions.first().map(String::as_str), Some("session.login_with_password"));
        assert_eq!(actions.last().map(String::as_str), Some("session.logout"));
        assert!(launcher.launched.borrow().is_empty());
    }
}
