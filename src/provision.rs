use log::{debug, info};

use dom0backup_api::{
    constants::BACKUP_VDI_UUID_KEY,
    error::{BackupError, NotFoundError, ProviderError, ReportError},
};
use xapi::{
    types::{HostRef, SessionRef, SrRef, VdiConfig, VdiRef},
    ControlPlane, FailureKind,
};

/// What a newly created backup disk looks like.
#[derive(Debug, Clone)]
pub struct DiskSpec {
    pub name: String,
    pub size: u64,
    pub sr_types: Vec<String>,
}

/// Looks up the backup disk recorded in the host's metadata, if any.
pub fn find_existing(
    api: &dyn ControlPlane,
    session: &SessionRef,
    host: &HostRef,
) -> Result<Option<VdiRef>, BackupError> {
    let other_config = api
        .host_get_other_config(session, host)
        .structured(ProviderError::ReadHostMetadata)?;

    let Some(uuid) = other_config.get(BACKUP_VDI_UUID_KEY) else {
        return Ok(None);
    };

    match api.vdi_get_by_uuid(session, uuid) {
        Ok(vdi) => {
            debug!("Found backup disk '{uuid}'");
            Ok(Some(vdi))
        }
        Err(e) if e.is(&FailureKind::UuidInvalid) => Err(BackupError::with_source(
            NotFoundError::BackupDisk { uuid: uuid.clone() },
            e.into(),
        )),
        Err(e) => Err(e).structured(ProviderError::LookupDisk { uuid: uuid.clone() }),
    }
}

/// Returns the backup disk of this host, creating and recording it on first
/// use. The flag is true when the disk was just created.
pub fn provision(
    api: &dyn ControlPlane,
    session: &SessionRef,
    host: &HostRef,
    spec: &DiskSpec,
) -> Result<(VdiRef, bool), BackupError> {
    if let Some(vdi) = find_existing(api, session, host)? {
        return Ok((vdi, false));
    }

    let sr = select_sr(api, session, &spec.sr_types)?;
    info!("Creating backup disk '{}' on SR '{sr}'", spec.name);
    let vdi = api
        .vdi_create(session, &VdiConfig::user_disk(&spec.name, sr, spec.size))
        .structured(ProviderError::CreateDisk)?;

    let uuid = api
        .vdi_get_uuid(session, &vdi)
        .structured(ProviderError::CreateDisk)?;

    let mut other_config = api
        .host_get_other_config(session, host)
        .structured(ProviderError::ReadHostMetadata)?;
    other_config.insert(BACKUP_VDI_UUID_KEY.into(), uuid.clone());
    api.host_set_other_config(session, host, &other_config)
        .structured(ProviderError::WriteHostMetadata)?;

    info!("Recorded backup disk '{uuid}' in host metadata");
    Ok((vdi, true))
}

/// Picks the last SR of an acceptable type, in enumeration order.
fn select_sr(
    api: &dyn ControlPlane,
    session: &SessionRef,
    sr_types: &[String],
) -> Result<SrRef, BackupError> {
    let mut selected = None;
    for sr in api
        .sr_get_all(session)
        .structured(ProviderError::ListStorageRepositories)?
    {
        let record = api
            .sr_get_record(session, &sr)
            .structured(ProviderError::ListStorageRepositories)?;
        if sr_types.contains(&record.sr_type) {
            selected = Some(sr);
        }
    }

    selected.structured(NotFoundError::StorageRepository)
}
