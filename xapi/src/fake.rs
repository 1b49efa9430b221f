//! In-memory control plane for tests.
//!
//! Models just enough of a pool to exercise provisioning and attachment:
//! hosts with `other_config`, VMs, an ordered list of SRs, VDIs and VBDs.
//! Every call is recorded in a [`Journal`] that can be shared with other
//! fakes to assert cross-component ordering.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, HashSet},
    rc::Rc,
};

use crate::{
    api::ControlPlane,
    error::{FailureKind, XapiError},
    types::{
        HostRef, SessionRef, SrRecord, SrRef, VbdConfig, VbdRecord, VbdRef, VdiConfig, VdiRef,
        VmRecord, VmRef,
    },
};

/// Ordered record of calls made against one or more fakes.
pub type Journal = Rc<RefCell<Vec<String>>>;

#[derive(Debug, Clone)]
pub struct FakeVdi {
    pub uuid: String,
    pub name_label: String,
    pub sr: SrRef,
    pub virtual_size: u64,
}

#[derive(Debug, Clone)]
struct Injection {
    kind: FailureKind,
    persistent: bool,
}

#[derive(Default)]
struct State {
    sessions: HashSet<SessionRef>,
    host_uuids: HashMap<String, HostRef>,
    host_configs: HashMap<HostRef, HashMap<String, String>>,
    vms: HashMap<VmRef, VmRecord>,
    srs: Vec<(SrRef, SrRecord)>,
    vdis: BTreeMap<VdiRef, FakeVdi>,
    vbds: BTreeMap<VbdRef, VbdRecord>,
    injections: HashMap<String, Injection>,
    calls: HashMap<String, usize>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn next_uuid(&mut self) -> String {
        format!("00000000-0000-4000-8000-{:012}", self.next_id())
    }
}

#[derive(Default)]
pub struct FakeControlPlane {
    state: RefCell<State>,
    journal: Journal,
}

fn failure(method: &str, kind: FailureKind, details: &[&str]) -> XapiError {
    XapiError::failure(
        method,
        kind,
        details.iter().map(|d| d.to_string()).collect(),
    )
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records calls into the given journal instead of a private one.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn add_host(&self, uuid: &str) -> HostRef {
        let mut state = self.state.borrow_mut();
        let host = HostRef::new(format!("OpaqueRef:host-{}", state.next_id()));
        state.host_uuids.insert(uuid.into(), host.clone());
        state.host_configs.insert(host.clone(), HashMap::new());
        host
    }

    pub fn add_vm(&self, resident_on: &HostRef, is_control_domain: bool) -> VmRef {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        let vm = VmRef::new(format!("OpaqueRef:vm-{id}"));
        let uuid = state.next_uuid();
        state.vms.insert(
            vm.clone(),
            VmRecord {
                uuid,
                name_label: if is_control_domain {
                    format!("Control domain {id}")
                } else {
                    format!("Guest {id}")
                },
                is_control_domain,
                resident_on: resident_on.clone(),
            },
        );
        vm
    }

    /// Appends an SR. `SR.get_all` returns SRs in insertion order.
    pub fn add_sr(&self, sr_type: &str) -> SrRef {
        let mut state = self.state.borrow_mut();
        let sr = SrRef::new(format!("OpaqueRef:sr-{}", state.next_id()));
        let uuid = state.next_uuid();
        state.srs.push((
            sr.clone(),
            SrRecord {
                uuid,
                name_label: format!("{sr_type} storage"),
                sr_type: sr_type.into(),
            },
        ));
        sr
    }

    /// Adds a pre-existing VDI with a known UUID.
    pub fn add_vdi(&self, uuid: &str, sr: &SrRef) -> VdiRef {
        let mut state = self.state.borrow_mut();
        let vdi = VdiRef::new(format!("OpaqueRef:vdi-{}", state.next_id()));
        state.vdis.insert(
            vdi.clone(),
            FakeVdi {
                uuid: uuid.into(),
                name_label: String::new(),
                sr: sr.clone(),
                virtual_size: 0,
            },
        );
        vdi
    }

    /// Adds a pre-existing VBD, occupying `userdevice` on `vm`.
    pub fn add_vbd(&self, vdi: &VdiRef, vm: &VmRef, userdevice: u32, attached: bool) -> VbdRef {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        let uuid = state.next_uuid();
        let vbd = VbdRef::new(format!("OpaqueRef:vbd-{id}"));
        state.vbds.insert(
            vbd.clone(),
            VbdRecord {
                uuid,
                vdi: vdi.clone(),
                vm: vm.clone(),
                userdevice: userdevice.to_string(),
                device: if attached {
                    device_name(userdevice)
                } else {
                    String::new()
                },
                currently_attached: attached,
            },
        );
        vbd
    }

    pub fn set_other_config(&self, host: &HostRef, key: &str, value: &str) {
        self.state
            .borrow_mut()
            .host_configs
            .entry(host.clone())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Makes the next call to `method` fail with `kind`.
    pub fn fail_next(&self, method: &str, kind: FailureKind) {
        self.state.borrow_mut().injections.insert(
            method.into(),
            Injection {
                kind,
                persistent: false,
            },
        );
    }

    /// Makes every call to `method` fail with `kind`.
    pub fn fail_always(&self, method: &str, kind: FailureKind) {
        self.state.borrow_mut().injections.insert(
            method.into(),
            Injection {
                kind,
                persistent: true,
            },
        );
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state
            .borrow()
            .calls
            .get(method)
            .copied()
            .unwrap_or_default()
    }

    pub fn other_config(&self, host: &HostRef) -> HashMap<String, String> {
        self.state
            .borrow()
            .host_configs
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    pub fn vdis(&self) -> Vec<(VdiRef, FakeVdi)> {
        self.state
            .borrow()
            .vdis
            .iter()
            .map(|(r, v)| (r.clone(), v.clone()))
            .collect()
    }

    pub fn vbds(&self) -> Vec<(VbdRef, VbdRecord)> {
        self.state
            .borrow()
            .vbds
            .iter()
            .map(|(r, v)| (r.clone(), v.clone()))
            .collect()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.borrow().sessions.len()
    }

    /// Records the call and applies any injected failure.
    fn enter(&self, method: &str) -> Result<(), XapiError> {
        self.journal.borrow_mut().push(method.to_string());

        let mut state = self.state.borrow_mut();
        *state.calls.entry(method.into()).or_default() += 1;

        match state.injections.get(method).cloned() {
            Some(injection) => {
                if !injection.persistent {
                    state.injections.remove(method);
                }
                Err(failure(method, injection.kind, &[]))
            }
            None => Ok(()),
        }
    }

    fn enter_session(&self, method: &str, session: &SessionRef) -> Result<(), XapiError> {
        self.enter(method)?;
        if !self.state.borrow().sessions.contains(session) {
            return Err(failure(
                method,
                FailureKind::SessionInvalid,
                &[session.as_str()],
            ));
        }
        Ok(())
    }

    fn vbd_record(&self, method: &str, vbd: &VbdRef) -> Result<VbdRecord, XapiError> {
        self.state
            .borrow()
            .vbds
            .get(vbd)
            .cloned()
            .ok_or_else(|| failure(method, FailureKind::HandleInvalid, &["VBD", vbd.as_str()]))
    }
}

fn device_name(userdevice: u32) -> String {
    let letter = (b'a' + (userdevice % 26) as u8) as char;
    format!("xvd{letter}")
}

impl ControlPlane for FakeControlPlane {
    fn login(&self, username: &str, _password: &str) -> Result<SessionRef, XapiError> {
        const METHOD: &str = "session.login_with_password";
        self.enter(METHOD)?;
        if username != "root" {
            return Err(failure(
                METHOD,
                FailureKind::SessionAuthenticationFailed,
                &[username],
            ));
        }
        let mut state = self.state.borrow_mut();
        let session = SessionRef::new(format!("OpaqueRef:session-{}", state.next_id()));
        state.sessions.insert(session.clone());
        Ok(session)
    }

    fn logout(&self, session: &SessionRef) -> Result<(), XapiError> {
        self.enter_session("session.logout", session)?;
        self.state.borrow_mut().sessions.remove(session);
        Ok(())
    }

    fn host_get_by_uuid(&self, session: &SessionRef, uuid: &str) -> Result<HostRef, XapiError> {
        const METHOD: &str = "host.get_by_uuid";
        self.enter_session(METHOD, session)?;
        self.state
            .borrow()
            .host_uuids
            .get(uuid)
            .cloned()
            .ok_or_else(|| failure(METHOD, FailureKind::UuidInvalid, &["host", uuid]))
    }

    fn host_get_other_config(
        &self,
        session: &SessionRef,
        host: &HostRef,
    ) -> Result<HashMap<String, String>, XapiError> {
        const METHOD: &str = "host.get_other_config";
        self.enter_session(METHOD, session)?;
        self.state
            .borrow()
            .host_configs
            .get(host)
            .cloned()
            .ok_or_else(|| failure(METHOD, FailureKind::HandleInvalid, &["host", host.as_str()]))
    }

    fn host_set_other_config(
        &self,
        session: &SessionRef,
        host: &HostRef,
        other_config: &HashMap<String, String>,
    ) -> Result<(), XapiError> {
        const METHOD: &str = "host.set_other_config";
        self.enter_session(METHOD, session)?;
        let mut state = self.state.borrow_mut();
        match state.host_configs.get_mut(host) {
            Some(config) => {
                *config = other_config.clone();
                Ok(())
            }
            None => Err(failure(
                METHOD,
                FailureKind::HandleInvalid,
                &["host", host.as_str()],
            )),
        }
    }

    fn vm_get_all_records(
        &self,
        session: &SessionRef,
    ) -> Result<HashMap<VmRef, VmRecord>, XapiError> {
        self.enter_session("VM.get_all_records", session)?;
        Ok(self.state.borrow().vms.clone())
    }

    fn sr_get_all(&self, session: &SessionRef) -> Result<Vec<SrRef>, XapiError> {
        self.enter_session("SR.get_all", session)?;
        Ok(self
            .state
            .borrow()
            .srs
            .iter()
            .map(|(sr, _)| sr.clone())
            .collect())
    }

    fn sr_get_record(&self, session: &SessionRef, sr: &SrRef) -> Result<SrRecord, XapiError> {
        const METHOD: &str = "SR.get_record";
        self.enter_session(METHOD, session)?;
        self.state
            .borrow()
            .srs
            .iter()
            .find(|(r, _)| r == sr)
            .map(|(_, record)| record.clone())
            .ok_or_else(|| failure(METHOD, FailureKind::HandleInvalid, &["SR", sr.as_str()]))
    }

    fn vdi_create(&self, session: &SessionRef, config: &VdiConfig) -> Result<VdiRef, XapiError> {
        const METHOD: &str = "VDI.create";
        self.enter_session(METHOD, session)?;
        let mut state = self.state.borrow_mut();
        if !state.srs.iter().any(|(r, _)| *r == config.sr) {
            return Err(failure(
                METHOD,
                FailureKind::HandleInvalid,
                &["SR", config.sr.as_str()],
            ));
        }
        let vdi = VdiRef::new(format!("OpaqueRef:vdi-{}", state.next_id()));
        let uuid = state.next_uuid();
        state.vdis.insert(
            vdi.clone(),
            FakeVdi {
                uuid,
                name_label: config.name_label.clone(),
                sr: config.sr.clone(),
                virtual_size: config.virtual_size,
            },
        );
        Ok(vdi)
    }

    fn vdi_get_by_uuid(&self, session: &SessionRef, uuid: &str) -> Result<VdiRef, XapiError> {
        const METHOD: &str = "VDI.get_by_uuid";
        self.enter_session(METHOD, session)?;
        self.state
            .borrow()
            .vdis
            .iter()
            .find(|(_, v)| v.uuid == uuid)
            .map(|(r, _)| r.clone())
            .ok_or_else(|| failure(METHOD, FailureKind::UuidInvalid, &["VDI", uuid]))
    }

    fn vdi_get_uuid(&self, session: &SessionRef, vdi: &VdiRef) -> Result<String, XapiError> {
        const METHOD: &str = "VDI.get_uuid";
        self.enter_session(METHOD, session)?;
        self.state
            .borrow()
            .vdis
            .get(vdi)
            .map(|v| v.uuid.clone())
            .ok_or_else(|| failure(METHOD, FailureKind::HandleInvalid, &["VDI", vdi.as_str()]))
    }

    fn vdi_get_vbds(&self, session: &SessionRef, vdi: &VdiRef) -> Result<Vec<VbdRef>, XapiError> {
        const METHOD: &str = "VDI.get_VBDs";
        self.enter_session(METHOD, session)?;
        let state = self.state.borrow();
        if !state.vdis.contains_key(vdi) {
            return Err(failure(
                METHOD,
                FailureKind::HandleInvalid,
                &["VDI", vdi.as_str()],
            ));
        }
        Ok(state
            .vbds
            .iter()
            .filter(|(_, record)| record.vdi == *vdi)
            .map(|(r, _)| r.clone())
            .collect())
    }

    fn vbd_create(&self, session: &SessionRef, config: &VbdConfig) -> Result<VbdRef, XapiError> {
        const METHOD: &str = "VBD.create";
        self.enter_session(METHOD, session)?;
        let mut state = self.state.borrow_mut();
        if !state.vdis.contains_key(&config.vdi) {
            return Err(failure(
                METHOD,
                FailureKind::HandleInvalid,
                &["VDI", config.vdi.as_str()],
            ));
        }
        if !state.vms.contains_key(&config.vm) {
            return Err(failure(
                METHOD,
                FailureKind::HandleInvalid,
                &["VM", config.vm.as_str()],
            ));
        }
        if state
            .vbds
            .values()
            .any(|v| v.vm == config.vm && v.userdevice == config.userdevice)
        {
            return Err(failure(
                METHOD,
                FailureKind::DeviceAlreadyExists,
                &[config.userdevice.as_str()],
            ));
        }
        let id = state.next_id();
        let uuid = state.next_uuid();
        let vbd = VbdRef::new(format!("OpaqueRef:vbd-{id}"));
        state.vbds.insert(
            vbd.clone(),
            VbdRecord {
                uuid,
                vdi: config.vdi.clone(),
                vm: config.vm.clone(),
                userdevice: config.userdevice.clone(),
                device: String::new(),
                currently_attached: false,
            },
        );
        Ok(vbd)
    }

    fn vbd_get_record(&self, session: &SessionRef, vbd: &VbdRef) -> Result<VbdRecord, XapiError> {
        const METHOD: &str = "VBD.get_record";
        self.enter_session(METHOD, session)?;
        self.vbd_record(METHOD, vbd)
    }

    fn vbd_get_device(&self, session: &SessionRef, vbd: &VbdRef) -> Result<String, XapiError> {
        const METHOD: &str = "VBD.get_device";
        self.enter_session(METHOD, session)?;
        self.vbd_record(METHOD, vbd).map(|record| record.device)
    }

    fn vbd_plug(&self, session: &SessionRef, vbd: &VbdRef) -> Result<(), XapiError> {
        const METHOD: &str = "VBD.plug";
        self.enter_session(METHOD, session)?;
        let record = self.vbd_record(METHOD, vbd)?;
        if record.currently_attached {
            return Err(failure(
                METHOD,
                FailureKind::Other("DEVICE_ALREADY_ATTACHED".into()),
                &[vbd.as_str()],
            ));
        }
        let slot = record.userdevice.parse::<u32>().unwrap_or_default();
        let mut state = self.state.borrow_mut();
        if let Some(record) = state.vbds.get_mut(vbd) {
            record.currently_attached = true;
            record.device = device_name(slot);
        }
        Ok(())
    }

    fn vbd_unplug(&self, session: &SessionRef, vbd: &VbdRef) -> Result<(), XapiError> {
        const METHOD: &str = "VBD.unplug";
        self.enter_session(METHOD, session)?;
        let record = self.vbd_record(METHOD, vbd)?;
        if !record.currently_attached {
            return Err(failure(
                METHOD,
                FailureKind::Other("DEVICE_ALREADY_DETACHED".into()),
                &[vbd.as_str()],
            ));
        }
        let mut state = self.state.borrow_mut();
        if let Some(record) = state.vbds.get_mut(vbd) {
            record.currently_attached = false;
            record.device.clear();
        }
        Ok(())
    }

    fn vbd_destroy(&self, session: &SessionRef, vbd: &VbdRef) -> Result<(), XapiError> {
        const METHOD: &str = "VBD.destroy";
        self.enter_session(METHOD, session)?;
        let record = self.vbd_record(METHOD, vbd)?;
        if record.currently_attached {
            return Err(failure(
                METHOD,
                FailureKind::OperationNotAllowed,
                &["VBD currently attached"],
            ));
        }
        self.state.borrow_mut().vbds.remove(vbd);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> (FakeControlPlane, SessionRef, VmRef, SrRef) {
        let fake = FakeControlPlane::new();
        let host = fake.add_host("host-uuid");
        let dom0 = fake.add_vm(&host, true);
        let sr = fake.add_sr("ext");
        let session = fake.login("root", "").unwrap();
        (fake, session, dom0, sr)
    }

    #[test]
    fn test_slot_uniqueness() {
        let (fake, session, dom0, sr) = pool();
        let vdi = fake
            .vdi_create(&session, &VdiConfig::user_disk("a", sr, 1))
            .unwrap();

        fake.vbd_create(&session, &VbdConfig::disk(vdi.clone(), dom0.clone(), 0))
            .unwrap();
        let err = fake
            .vbd_create(&session, &VbdConfig::disk(vdi, dom0, 0))
            .unwrap_err();
        assert!(err.is(&FailureKind::DeviceAlreadyExists));
    }

    #[test]
    fn test_plug_unplug_destroy() {
        let (fake, session, dom0, sr) = pool();
        let vdi = fake
            .vdi_create(&session, &VdiConfig::user_disk("a", sr, 1))
            .unwrap();
        let vbd = fake
            .vbd_create(&session, &VbdConfig::disk(vdi.clone(), dom0, 1))
            .unwrap();

        fake.vbd_plug(&session, &vbd).unwrap();
        assert_eq!(fake.vbd_get_device(&session, &vbd).unwrap(), "xvdb");
        assert!(fake
            .vbd_destroy(&session, &vbd)
            .unwrap_err()
            .is(&FailureKind::OperationNotAllowed));

        fake.vbd_unplug(&session, &vbd).unwrap();
        fake.vbd_destroy(&session, &vbd).unwrap();
        assert!(fake.vdi_get_vbds(&session, &vdi).unwrap().is_empty());
    }

    #[test]
    fn test_injected_failures() {
        let (fake, session, _, _) = pool();

        fake.fail_next("SR.get_all", FailureKind::Other("INTERNAL_ERROR".into()));
        assert!(fake.sr_get_all(&session).is_err());
        assert!(fake.sr_get_all(&session).is_ok());

        fake.fail_always("VM.get_all_records", FailureKind::HandleInvalid);
        assert!(fake.vm_get_all_records(&session).is_err());
        assert!(fake.vm_get_all_records(&session).is_err());
        assert_eq!(fake.calls("VM.get_all_records"), 2);
    }

    #[test]
    fn test_sessions() {
        let (fake, session, _, _) = pool();
        assert_eq!(fake.open_sessions(), 1);
        fake.logout(&session).unwrap();
        assert_eq!(fake.open_sessions(), 0);
        assert!(fake
            .sr_get_all(&session)
            .unwrap_err()
            .is(&FailureKind::SessionInvalid));
        assert!(fake
            .vdi_get_by_uuid(&fake.login("root", "").unwrap(), "nope")
            .unwrap_err()
            .is(&FailureKind::UuidInvalid));
        assert_eq!(
            fake.journal().borrow().first().map(String::as_str),
            Some("session.login_with_password")
        );
    }
}
