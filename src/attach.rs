use std::path::PathBuf;

use log::{debug, error, info, warn};

use dom0backup_api::{
    constants::DEV_DIRECTORY,
    error::{BackupError, IntegrityError, ProviderError, ReportError, ResourceExhaustedError},
};
use xapi::{
    types::{SessionRef, VbdConfig, VbdRef, VdiRef, VmRef},
    ControlPlane, FailureKind,
};

/// Attaches `vdi` to `vm` and plugs it.
///
/// Device slots are tried in order starting at 0 while the control plane
/// reports the slot as taken, up to and including `max_slot`. Any other
/// failure aborts. A live attachment of the same disk to the same VM is
/// reported instead of attaching a second time.
pub fn attach(
    api: &dyn ControlPlane,
    session: &SessionRef,
    vdi: &VdiRef,
    vm: &VmRef,
    max_slot: u32,
) -> Result<VbdRef, BackupError> {
    ensure_not_attached(api, session, vdi, vm)?;

    let vbd = create_in_free_slot(api, session, vdi, vm, max_slot)?;

    api.vbd_plug(session, &vbd)
        .structured(ProviderError::PlugAttachment)?;
    info!("Plugged backup disk attachment '{vbd}'");

    Ok(vbd)
}

fn ensure_not_attached(
    api: &dyn ControlPlane,
    session: &SessionRef,
    vdi: &VdiRef,
    vm: &VmRef,
) -> Result<(), BackupError> {
    for vbd in api
        .vdi_get_vbds(session, vdi)
        .structured(ProviderError::ListAttachments)?
    {
        let record = api
            .vbd_get_record(session, &vbd)
            .structured(ProviderError::ListAttachments)?;
        if record.vm == *vm && record.currently_attached {
            return Err(BackupError::new(IntegrityError::DiskAlreadyAttached {
                attachment: vbd.to_string(),
            }));
        }
    }

    Ok(())
}

fn create_in_free_slot(
    api: &dyn ControlPlane,
    session: &SessionRef,
    vdi: &VdiRef,
    vm: &VmRef,
    max_slot: u32,
) -> Result<VbdRef, BackupError> {
    for slot in 0..=max_slot {
        let config = VbdConfig::disk(vdi.clone(), vm.clone(), slot);
        match api.vbd_create(session, &config) {
            Ok(vbd) => {
                debug!("Created attachment '{vbd}' at device slot {slot}");
                return Ok(vbd);
            }
            Err(e) if e.is(&FailureKind::DeviceAlreadyExists) => {
                debug!("Device slot {slot} is taken");
            }
            Err(e) => {
                return Err(e).structured(ProviderError::CreateAttachment { slot });
            }
        }
    }

    Err(BackupError::new(ResourceExhaustedError::DeviceSlots {
        attempts: max_slot + 1,
    }))
}

/// Block device path of a plugged attachment.
pub fn device_path(
    api: &dyn ControlPlane,
    session: &SessionRef,
    vbd: &VbdRef,
) -> Result<PathBuf, BackupError> {
    let device = api
        .vbd_get_device(session, vbd)
        .structured(ProviderError::GetDevice)?;
    Ok(PathBuf::from(DEV_DIRECTORY).join(device))
}

/// Unplugs and destroys an attachment. Destroy is attempted even if unplug
/// fails.
pub fn detach(
    api: &dyn ControlPlane,
    session: &SessionRef,
    vbd: &VbdRef,
) -> Result<(), BackupError> {
    let unplugged = api
        .vbd_unplug(session, vbd)
        .structured(ProviderError::UnplugAttachment);
    if let Err(e) = &unplugged {
        error!("Failed to unplug attachment '{vbd}': {e:?}");
    }

    let destroyed = api
        .vbd_destroy(session, vbd)
        .structured(ProviderError::DestroyAttachment);
    if let Err(e) = &destroyed {
        error!("Failed to destroy attachment '{vbd}': {e:?}");
    }

    match (unplugged, destroyed) {
        (Ok(()), Ok(())) => {
            info!("Detached backup disk attachment '{vbd}'");
            Ok(())
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Err(first), Err(second)) => {
            warn!("Both unplug and destroy of '{vbd}' failed");
            Err(first.secondary_error_context(second))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dom0backup_api::error::ErrorKind;
    use xapi::fake::FakeControlPlane;

    struct Pool {
        fake: FakeControlPlane,
        session: SessionRef,
        dom0: VmRef,
        vdi: VdiRef,
    }

    fn pool() -> Pool {
        let fake = FakeControlPlane::new();
        let host = fake.add_host("host");
        let dom0 = fake.add_vm(&host, true);
        let sr = fake.add_sr("ext");
        let vdi = fake.add_vdi("backup", &sr);
        let session = fake.login("root", "").unwrap();
        Pool {
            fake,
            session,
            dom0,
            vdi,
        }
    }

    /// Occupies slots `0..count` of `vm` with other disks.
    fn occupy(pool: &Pool, count: u32) {
        let sr = pool.fake.vdis()[0].1.sr.clone();
        for slot in 0..count {
            let other = pool.fake.add_vdi(&format!("other-{slot}"), &sr);
            pool.fake.add_vbd(&other, &pool.dom0, slot, true);
        }
    }

    fn userdevice(pool: &Pool, vbd: &VbdRef) -> String {
        pool.fake
            .vbds()
            .into_iter()
            .find(|(r, _)| r == vbd)
            .map(|(_, record)| record.userdevice)
            .unwrap()
    }

    #[test]
    fn test_attach_first_slot() {
        let pool = pool();
        let vbd = attach(&pool.fake, &pool.session, &pool.vdi, &pool.dom0, 20).unwrap();

        assert_eq!(userdevice(&pool, &vbd), "0");
        assert_eq!(pool.fake.calls("VBD.create"), 1);
        assert_eq!(pool.fake.calls("VBD.plug"), 1);
        assert_eq!(
            device_path(&pool.fake, &pool.session, &vbd).unwrap(),
            PathBuf::from("/dev/xvda")
        );
    }

    #[test]
    fn test_attach_slot_collision() {
        let pool = pool();
        occupy(&pool, 1);

        let vbd = attach(&pool.fake, &pool.session, &pool.vdi, &pool.dom0, 20).unwrap();
        assert_eq!(userdevice(&pool, &vbd), "1");
        assert_eq!(pool.fake.calls("VBD.create"), 2);
    }

    #[test]
    fn test_attach_attempts_up_to_free_slot() {
        for k in [3, 20] {
            let pool = pool();
            occupy(&pool, k);

            let vbd = attach(&pool.fake, &pool.session, &pool.vdi, &pool.dom0, 20).unwrap();
            assert_eq!(userdevice(&pool, &vbd), k.to_string());
            assert_eq!(pool.fake.calls("VBD.create"), k as usize + 1);
        }
    }

    #[test]
    fn test_attach_slots_exhausted() {
        let pool = pool();
        occupy(&pool, 21);

        let err = attach(&pool.fake, &pool.session, &pool.vdi, &pool.dom0, 20).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::ResourceExhausted(ResourceExhaustedError::DeviceSlots { attempts: 21 })
        );
        assert_eq!(pool.fake.calls("VBD.create"), 21);
        assert_eq!(pool.fake.calls("VBD.plug"), 0);
    }

    #[test]
    fn test_attach_other_failure_aborts() {
        let pool = pool();
        pool.fake
            .fail_next("VBD.create", FailureKind::Other("VM_BAD_POWER_STATE".into()));

        let err = attach(&pool.fake, &pool.session, &pool.vdi, &pool.dom0, 20).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Provider(ProviderError::CreateAttachment { slot: 0 })
        );
        assert_eq!(pool.fake.calls("VBD.create"), 1);
    }

    #[test]
    fn test_plug_failure_not_retried() {
        let pool = pool();
        pool.fake
            .fail_next("VBD.plug", FailureKind::Other("SR_BACKEND_FAILURE".into()));

        let err = attach(&pool.fake, &pool.session, &pool.vdi, &pool.dom0, 20).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Provider(ProviderError::PlugAttachment)
        );
        assert_eq!(pool.fake.calls("VBD.plug"), 1);
    }

    #[test]
    fn test_double_attach_detected() {
        let pool = pool();
        let live = pool.fake.add_vbd(&pool.vdi, &pool.dom0, 4, true);

        let err = attach(&pool.fake, &pool.session, &pool.vdi, &pool.dom0, 20).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Integrity(IntegrityError::DiskAlreadyAttached {
                attachment: live.to_string()
            })
        );
        assert_eq!(pool.fake.calls("VBD.create"), 0);
    }

    #[test]
    fn test_stale_attachment_ignored() {
        let pool = pool();
        // Unplugged leftovers do not block a new attachment
        pool.fake.add_vbd(&pool.vdi, &pool.dom0, 0, false);

        let vbd = attach(&pool.fake, &pool.session, &pool.vdi, &pool.dom0, 20).unwrap();
        assert_eq!(userdevice(&pool, &vbd), "1");
    }

    #[test]
    fn test_detach() {
        let pool = pool();
        let vbd = attach(&pool.fake, &pool.session, &pool.vdi, &pool.dom0, 20).unwrap();

        detach(&pool.fake, &pool.session, &vbd).unwrap();
        assert!(pool.fake.vbds().is_empty());
        assert_eq!(
            *pool.fake.journal().borrow(),
            vec![
                "session.login_with_password",
                "VDI.get_VBDs",
                "VBD.create",
                "VBD.plug",
                "VBD.unplug",
                "VBD.destroy",
            ]
        );
    }

    #[test]
    fn test_detach_attempts_destroy_after_unplug_failure() {
        let pool = pool();
        let vbd = attach(&pool.fake, &pool.session, &pool.vdi, &pool.dom0, 20).unwrap();
        pool.fake
            .fail_next("VBD.unplug", FailureKind::Other("INTERNAL_ERROR".into()));

        let err = detach(&pool.fake, &pool.session, &vbd).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Provider(ProviderError::UnplugAttachment)
        );
        // Destroy was attempted and refused since the disk is still plugged
        assert_eq!(pool.fake.calls("VBD.destroy"), 1);
        assert!(format!("{err:?}").contains("Failed to destroy attachment"));
    }
}
