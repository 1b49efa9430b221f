use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

/// The local installation or agent configuration could not be read.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigurationError {
    #[error("Failed to read installation inventory from '{path}'")]
    ReadInventory { path: String },
    #[error("Installation inventory '{path}' does not contain a valid INSTALLATION_UUID")]
    MissingInstallationUuid { path: String },
    #[error("Failed to load agent configuration from '{path}'")]
    LoadAgentConfig { path: String },
    #[error("Failed to parse agent configuration")]
    ParseAgentConfig,
    #[error("Invalid control plane URL '{url}'")]
    InvalidXapiUrl { url: String },
}

/// A resource the backup volume depends on does not exist.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum NotFoundError {
    #[error("No control domain is resident on this host")]
    ControlDomain,
    #[error("No storage repository suitable for the backup disk was found")]
    StorageRepository,
    #[error("Backup disk '{uuid}' recorded in host metadata does not exist")]
    BackupDisk { uuid: String },
}

/// A bounded resource ran out.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceExhaustedError {
    #[error("All device slots are in use, gave up after {attempts} attempts")]
    DeviceSlots { attempts: u32 },
}

/// A control plane call failed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderError {
    #[error("Failed to log into the control plane")]
    Login,
    #[error("Failed to log out of the control plane")]
    Logout,
    #[error("Failed to look up host '{uuid}'")]
    LookupHost { uuid: String },
    #[error("Failed to read host metadata")]
    ReadHostMetadata,
    #[error("Failed to write host metadata")]
    WriteHostMetadata,
    #[error("Failed to list virtual machines")]
    ListVms,
    #[error("Failed to list storage repositories")]
    ListStorageRepositories,
    #[error("Failed to look up backup disk '{uuid}'")]
    LookupDisk { uuid: String },
    #[error("Failed to create backup disk")]
    CreateDisk,
    #[error("Failed to list attachments of the backup disk")]
    ListAttachments,
    #[error("Failed to create attachment at device slot {slot}")]
    CreateAttachment { slot: u32 },
    #[error("Failed to plug attachment")]
    PlugAttachment,
    #[error("Failed to unplug attachment")]
    UnplugAttachment,
    #[error("Failed to destroy attachment")]
    DestroyAttachment,
    #[error("Failed to get the device of the attachment")]
    GetDevice,
}

/// An external program could not be run or did not finish as expected.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SubprocessError {
    #[error("Failed to find binary '{binary}'")]
    MissingBinary { binary: &'static str },
    #[error("Failed to execute '{binary}'")]
    CommandCouldNotExecute { binary: &'static str },
    #[error("'{binary}' {explanation}")]
    CommandFailed {
        binary: &'static str,
        explanation: String,
    },
    #[error("Failed to create mount directory '{path}'")]
    CreateMountDirectory { path: String },
    #[error("Failed to create filesystem on '{device}'")]
    CreateFilesystem { device: String },
    #[error("Failed to resize filesystem on '{device}'")]
    ResizeFilesystem { device: String },
    #[error("Failed to determine whether '{path}' is a mount point")]
    CheckMountPoint { path: String },
    #[error("Failed to mount '{device}' at '{path}'")]
    Mount { device: String, path: String },
    #[error("Failed to unmount '{path}'")]
    Unmount { path: String },
    #[error("Failed to initialize backup repository")]
    InitRepository,
    #[error("Failed to back up the host")]
    Backup,
    #[error("Failed to prune old snapshots")]
    Prune,
    #[error("Failed to restore the host")]
    Restore,
    #[error("Failed to list snapshots")]
    Snapshots,
    #[error("Failed to spawn the restore worker")]
    SpawnRestoreWorker,
    #[error("Failed to reboot")]
    Reboot,
}

/// The backup tool could not be installed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ToolAcquisitionError {
    #[error("Failed to download backup tool from '{url}'")]
    Download { url: String },
    #[error("Failed to decompress backup tool")]
    Decompress,
    #[error("Failed to install backup tool to '{path}'")]
    Install { path: String },
}

/// The state of the host contradicts what the backup volume expects.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrityError {
    #[error("Expected exactly one control domain resident on this host, found {count}")]
    AmbiguousControlDomain { count: usize },
    #[error("Backup disk is already attached to the control domain through '{attachment}'")]
    DiskAlreadyAttached { attachment: String },
    #[error("Mount path '{path}' is already in use while the backup disk is new")]
    MountPathBusy { path: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Backup session is in state '{state}', expected '{expected}'")]
    InvalidSessionState {
        state: &'static str,
        expected: &'static str,
    },
    #[error("Panicked: {0}")]
    Panic(String),
}

/// Each variant of `ErrorKind` corresponds to a different category of error. The categories are
/// meant to tell an operator where to start looking.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The local installation identity or agent configuration is missing or malformed.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A control domain, storage repository or backup disk could not be found.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// Bounded retries were exhausted.
    #[error(transparent)]
    ResourceExhausted(#[from] ResourceExhaustedError),

    /// The control plane rejected a call. The source carries the provider's error code and
    /// details.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// An external program failed.
    #[error(transparent)]
    Subprocess(#[from] SubprocessError),

    /// The backup tool could not be fetched or installed.
    #[error(transparent)]
    ToolAcquisition(#[from] ToolAcquisitionError),

    /// The host is in a state that requires manual attention.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// A bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct BackupErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct BackupError(Box<BackupErrorInner>);
impl BackupError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        BackupError(Box::new(BackupErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn with_source(kind: impl Into<ErrorKind>, source: anyhow::Error) -> Self {
        BackupError(Box::new(BackupErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: Some(source),
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn secondary_error_context(mut self, secondary: BackupError) -> Self {
        self.0.context.push((format!(
            "While handling the error, an additional error was caught: \n\n{secondary:?}\n\nThe earlier error:"
        ).into(), Location::caller()));
        self
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured BackupError.
    fn structured(self, kind: K) -> Result<T, BackupError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, BackupError> {
        match self {
            Some(t) => Ok(t),
            None => Err(BackupError::new(kind)),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, BackupError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(BackupError::with_source(kind, e.into())),
        }
    }
}

pub trait BackupResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, BackupError>;
}

impl<T> BackupResultExt<T> for Result<T, BackupError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, BackupError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }
}

impl Serialize for BackupError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("backup-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::Configuration(ref e) => state.serialize_field("error", e)?,
            ErrorKind::NotFound(ref e) => state.serialize_field("error", e)?,
            ErrorKind::ResourceExhausted(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Provider(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Subprocess(ref e) => state.serialize_field("error", e)?,
            ErrorKind::ToolAcquisition(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Integrity(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for BackupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}
