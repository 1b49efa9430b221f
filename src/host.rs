use std::path::Path;

use log::debug;
use uuid::Uuid;

use dom0backup_api::error::{
    BackupError, ConfigurationError, IntegrityError, NotFoundError, ProviderError, ReportError,
};
use osutils::inventory::Inventory;
use xapi::{
    types::{HostRef, SessionRef, VmRef},
    ControlPlane,
};

/// Reads the UUID of this host from the installation inventory.
pub fn resolve_host_uuid(inventory_path: &Path) -> Result<Uuid, BackupError> {
    let inventory = Inventory::read(inventory_path).structured(ConfigurationError::ReadInventory {
        path: inventory_path.display().to_string(),
    })?;

    inventory
        .installation_uuid()
        .structured(ConfigurationError::MissingInstallationUuid {
            path: inventory_path.display().to_string(),
        })
}

pub fn resolve_host_ref(
    api: &dyn ControlPlane,
    session: &SessionRef,
    uuid: &Uuid,
) -> Result<HostRef, BackupError> {
    let uuid = uuid.to_string();
    api.host_get_by_uuid(session, &uuid)
        .structured(ProviderError::LookupHost { uuid })
}

/// Finds the control domain resident on `host`. There must be exactly one.
pub fn resolve_local_domain(
    api: &dyn ControlPlane,
    session: &SessionRef,
    host: &HostRef,
) -> Result<VmRef, BackupError> {
    let vms = api
        .vm_get_all_records(session)
        .structured(ProviderError::ListVms)?;

    let mut domains = vms
        .into_iter()
        .filter(|(_, vm)| vm.is_control_domain && vm.resident_on == *host)
        .collect::<Vec<_>>();

    match domains.len() {
        0 => Err(BackupError::new(NotFoundError::ControlDomain)),
        1 => {
            let (vm, record) = domains.remove(0);
            debug!("Control domain of host '{host}' is '{}'", record.uuid);
            Ok(vm)
        }
        count => Err(BackupError::new(IntegrityError::AmbiguousControlDomain {
            count,
        })),
    }
}
