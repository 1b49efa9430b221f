use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use strum_macros::IntoStaticStr;

use dom0backup_api::error::{
    BackupError, BackupResultExt, InternalError, ProviderError, ReportError,
};
use xapi::{
    types::{SessionRef, VbdRef, VdiRef},
    ControlPlane,
};

use crate::{
    attach,
    config::AgentConfig,
    host,
    mount::{self, HostSystem},
    provision::{self, DiskSpec},
    restic::BackupTool,
};

/// Everything a backup session talks to.
pub struct SessionContext<'a> {
    pub api: &'a dyn ControlPlane,
    pub system: &'a dyn HostSystem,
    pub tool: &'a dyn BackupTool,
    pub config: &'a AgentConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum SessionState {
    Closed,
    Opening,
    Ready,
    Closing,
    /// Acquire aborted. Whatever was set up before the failure is left in place.
    Failed,
    /// Teardown was skipped on purpose.
    Abandoned,
}

/// The backup disk attached to the control domain and mounted, for the
/// duration of one operation.
pub struct BackupSession<'a> {
    ctx: &'a SessionContext<'a>,
    state: SessionState,
    session: Option<SessionRef>,
    disk: Option<VdiRef>,
    attachment: Option<VbdRef>,
    mounted: bool,
}

impl<'a> BackupSession<'a> {
    /// Logs in, attaches and mounts the backup disk.
    ///
    /// On failure nothing is rolled back. The resources that were left behind
    /// are logged so they can be cleaned up by hand.
    pub fn acquire(ctx: &'a SessionContext<'a>) -> Result<Self, BackupError> {
        let mut session = Self {
            ctx,
            state: SessionState::Closed,
            session: None,
            disk: None,
            attachment: None,
            mounted: false,
        };

        session.transition(SessionState::Closed, SessionState::Opening)?;
        match session.open() {
            Ok(()) => {
                session.state = SessionState::Ready;
                info!(
                    "Backup repository is ready at '{}'",
                    ctx.config.mount_path.display()
                );
                Ok(session)
            }
            Err(e) => {
                session.state = SessionState::Failed;
                session.report_leftovers();
                Err(e).message("Failed to acquire backup session")
            }
        }
    }

    fn open(&mut self) -> Result<(), BackupError> {
        let api = self.ctx.api;
        let config = self.ctx.config;

        let session = api
            .login(&config.username, &config.password)
            .structured(ProviderError::Login)?;
        debug!("Logged into the control plane");
        let session = &*self.session.insert(session);

        let host_uuid = host::resolve_host_uuid(&config.inventory_path)?;
        let host = host::resolve_host_ref(api, session, &host_uuid)?;

        let spec = DiskSpec {
            name: config.disk_name.clone(),
            size: config.disk_size,
            sr_types: config.sr_types.clone(),
        };
        let (disk, is_new) = provision::provision(api, session, &host, &spec)?;
        self.disk = Some(disk.clone());

        let domain = host::resolve_local_domain(api, session, &host)?;

        let attachment = attach::attach(api, session, &disk, &domain, config.max_device_slot)?;
        self.attachment = Some(attachment.clone());

        let device = attach::device_path(api, session, &attachment)?;
        mount::prepare(
            self.ctx.system,
            self.ctx.tool,
            &device,
            is_new,
            &config.mount_path,
        )?;
        self.mounted = true;

        Ok(())
    }

    fn report_leftovers(&self) {
        if self.mounted {
            warn!(
                "Left '{}' mounted",
                self.ctx.config.mount_path.display()
            );
        }
        if let Some(attachment) = &self.attachment {
            warn!("Left attachment '{attachment}' in place");
        }
        if let Some(session) = &self.session {
            warn!("Left control plane session '{session}' open");
        }
    }

    pub fn mount_path(&self) -> &Path {
        &self.ctx.config.mount_path
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Unmounts, detaches and logs out. Every step is attempted. The first
    /// failure is returned with the later ones attached.
    pub fn release(mut self) -> Result<(), BackupError> {
        self.transition(SessionState::Ready, SessionState::Closing)?;

        let api = self.ctx.api;
        let mut errors = Vec::new();

        if self.mounted {
            match mount::release(self.ctx.system, &self.ctx.config.mount_path) {
                Ok(()) => self.mounted = false,
                Err(e) => errors.push(e),
            }
        }

        if let (Some(session), Some(attachment)) = (&self.session, self.attachment.take()) {
            if let Err(e) = attach::detach(api, session, &attachment) {
                errors.push(e);
            }
        }

        if let Some(session) = self.session.take() {
            match api.logout(&session).structured(ProviderError::Logout) {
                Ok(()) => debug!("Logged out of the control plane"),
                Err(e) => errors.push(e),
            }
        }

        self.state = SessionState::Closed;

        let mut errors = errors.into_iter();
        let Some(first) = errors.next() else {
            info!("Released backup session");
            return Ok(());
        };

        error!("Failed to release backup session: {first:?}");
        Err(errors.fold(first, |first, later| {
            error!("Additional failure while releasing backup session: {later:?}");
            first.secondary_error_context(later)
        }))
    }

    /// Leaves the disk attached and mounted and the control plane session
    /// open. Used when another process takes over the mounted repository.
    pub fn abandon(mut self) {
        self.state = SessionState::Abandoned;
        info!(
            "Abandoning backup session, '{}' stays mounted",
            self.ctx.config.mount_path.display()
        );
        if let (Some(disk), Some(attachment)) = (&self.disk, &self.attachment) {
            debug!("Backup disk '{disk}' stays attached through '{attachment}'");
        }
    }

    fn transition(&mut self, from: SessionState, to: SessionState) -> Result<(), BackupError> {
        if self.state != from {
            return Err(BackupError::new(InternalError::InvalidSessionState {
                state: self.state.into(),
                expected: from.into(),
            }));
        }
        self.state = to;
        Ok(())
    }
}

impl Drop for BackupSession<'_> {
    fn drop(&mut self) {
        if self.state == SessionState::Ready {
            error!(
                "Backup session dropped while ready, '{}' stays mounted",
                self.ctx.config.mount_path.display()
            );
        }
    }
}

/// Runs `body` with the backup repository mounted, then releases it.
///
/// An error from `body` takes precedence over an error from the release,
/// which is attached to it as secondary context.
pub fn with_backup_session<T, F>(ctx: &SessionContext, body: F) -> Result<T, BackupError>
where
    F: FnOnce(&Path) -> Result<T, BackupError>,
{
    let session = BackupSession::acquire(ctx)?;
    let mount_path: PathBuf = session.mount_path().to_path_buf();

    let result = body(&mount_path);
    let released = session.release();

    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release)) => Err(e.secondary_error_context(release)),
    }
}
