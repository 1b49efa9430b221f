use std::{panic, process::ExitCode};

use anyhow::{Context, Error};
use clap::Parser;
use log::{error, info, LevelFilter};

use dom0backup::{
    cli::{Cli, Commands},
    config::AgentConfig,
    mount::LocalSystem,
    restic::Restic,
    restore::{self, DetachedWorker},
    session::SessionContext,
    tool, BackgroundLog, ExitKind, MultiLogger,
};
use dom0backup_api::{
    constants::BACKGROUND_LOG_PATH,
    error::{BackupError, BackupResultExt, InternalError},
};
use xapi::XapiClient;

fn run_dom0backup(args: &Cli) -> Result<ExitKind, BackupError> {
    // Log version ASAP
    info!("dom0backup version: {}", dom0backup::DOM0BACKUP_VERSION);

    let config = AgentConfig::load(&args.config)?;

    // The worker runs on a host that is about to lose most of its services,
    // restic was installed by the command that started it
    if let Some(Commands::RestoreWorker { repo }) = &args.command {
        return restore::run_worker(&Restic::new(&config.restic_path), repo)
            .message("Restore worker failed")
            .map(|()| ExitKind::Done);
    }

    let res = panic::catch_unwind(|| {
        tool::ensure_restic(&config.restic_path, &config.restic_url)
            .message("Failed to acquire restic")?;

        let api = XapiClient::new(config.xapi_url()?);
        let system = LocalSystem;
        let tool = Restic::new(&config.restic_path);
        let ctx = SessionContext {
            api: &api,
            system: &system,
            tool: &tool,
            config: &config,
        };
        let launcher = DetachedWorker {
            config: args.config.clone(),
            verbosity: args.verbosity,
        };

        let command = args
            .command
            .as_ref()
            .map_or_else(|| "none".to_string(), ToString::to_string);
        dom0backup::run(&ctx, args.action(), &launcher)
            .message(format!("Failed to execute '{command}' command"))
    });

    match res {
        Err(e) => Err(BackupError::new(InternalError::Panic(format!("{e:?}")))),
        Ok(r) => r,
    }
}

fn setup_logging(args: &Cli) -> Result<(), Error> {
    MultiLogger::new()
        // Add regular env_logger to output to stderr
        .with_logger(Box::new(
            env_logger::builder()
                .format_timestamp(None)
                .filter_level(args.verbosity)
                .build(),
        ))
        // Keep a record that survives the reboot after a restore
        .with_logger(
            BackgroundLog::new(BACKGROUND_LOG_PATH)
                .with_max_level(LevelFilter::Debug)
                .into_logger(),
        )
        .with_target_cap("reqwest", LevelFilter::Debug)
        .with_target_cap("hyper", LevelFilter::Info)
        .init()
        .context("Logger already registered")
}

fn main() -> ExitCode {
    // Parse args
    let args = Cli::parse();

    if let Err(e) = setup_logging(&args) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    match run_dom0backup(&args) {
        Ok(ExitKind::Done) => {}
        Ok(ExitKind::Detached) => {
            // The restore worker owns the mounted repository now
            log::logger().flush();
            std::process::exit(0);
        }
        Err(e) => {
            error!("dom0backup failed: {e:?}");
            log::logger().flush();
            return ExitCode::from(2);
        }
    }
    ExitCode::SUCCESS
}
