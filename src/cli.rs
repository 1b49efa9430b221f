use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use log::LevelFilter;

use dom0backup_api::constants::{AGENT_CONFIG_PATH, BACKUP_MOUNT_PATH};

use crate::DOM0BACKUP_VERSION;

#[derive(Parser, Debug)]
#[clap(version = DOM0BACKUP_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Debug)]
    pub verbosity: LevelFilter,

    /// Path to the agent configuration
    #[arg(global = true, short, long, default_value = AGENT_CONFIG_PATH)]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up the control domain's root filesystem, keeping only the newest
    /// snapshot
    Backup,

    /// Restore the newest snapshot and reboot. Runs in the background
    Restore,

    /// List the snapshots in the backup repository
    Status,

    /// Restore worker started by `restore`
    #[clap(hide = true)]
    RestoreWorker {
        /// Repository to restore from
        #[clap(long, default_value = BACKUP_MOUNT_PATH)]
        repo: PathBuf,
    },

    #[clap(external_subcommand)]
    Unknown(Vec<OsString>),
}

/// What to do while the backup repository is mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Backup,
    Restore,
    Status,
    /// Mount and release without touching the repository.
    None,
}

impl Cli {
    pub fn action(&self) -> Action {
        match &self.command {
            Some(Commands::Backup) => Action::Backup,
            Some(Commands::Restore) => Action::Restore,
            Some(Commands::Status) => Action::Status,
            Some(Commands::RestoreWorker { .. } | Commands::Unknown(_)) | None => Action::None,
        }
    }
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Commands::Backup => write!(f, "backup"),
            Commands::Restore => write!(f, "restore"),
            Commands::Status => write!(f, "status"),
            Commands::RestoreWorker { .. } => write!(f, "restore-worker"),
            Commands::Unknown(args) => match args.first() {
                Some(name) => write!(f, "{}", name.to_string_lossy()),
                None => write!(f, "unknown"),
            },
        }
    }
}
