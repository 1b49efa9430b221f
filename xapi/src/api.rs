use std::collections::HashMap;

use crate::{
    error::XapiError,
    types::{
        HostRef, SessionRef, SrRecord, SrRef, VbdConfig, VbdRecord, VbdRef, VdiConfig, VdiRef,
        VmRecord, VmRef,
    },
};

/// The subset of the XAPI surface needed to provision and attach the backup
/// disk. Every call other than `login` takes the session explicitly.
pub trait ControlPlane {
    fn login(&self, username: &str, password: &str) -> Result<SessionRef, XapiError>;
    fn logout(&self, session: &SessionRef) -> Result<(), XapiError>;

    fn host_get_by_uuid(&self, session: &SessionRef, uuid: &str) -> Result<HostRef, XapiError>;
    fn host_get_other_config(
        &self,
        session: &SessionRef,
        host: &HostRef,
    ) -> Result<HashMap<String, String>, XapiError>;
    fn host_set_other_config(
        &self,
        session: &SessionRef,
        host: &HostRef,
        other_config: &HashMap<String, String>,
    ) -> Result<(), XapiError>;

    fn vm_get_all_records(
        &self,
        session: &SessionRef,
    ) -> Result<HashMap<VmRef, VmRecord>, XapiError>;

    fn sr_get_all(&self, session: &SessionRef) -> Result<Vec<SrRef>, XapiError>;
    fn sr_get_record(&self, session: &SessionRef, sr: &SrRef) -> Result<SrRecord, XapiError>;

    fn vdi_create(&self, session: &SessionRef, config: &VdiConfig) -> Result<VdiRef, XapiError>;
    fn vdi_get_by_uuid(&self, session: &SessionRef, uuid: &str) -> Result<VdiRef, XapiError>;
    fn vdi_get_uuid(&self, session: &SessionRef, vdi: &VdiRef) -> Result<String, XapiError>;
    fn vdi_get_vbds(&self, session: &SessionRef, vdi: &VdiRef) -> Result<Vec<VbdRef>, XapiError>;

    fn vbd_create(&self, session: &SessionRef, config: &VbdConfig) -> Result<VbdRef, XapiError>;
    fn vbd_get_record(&self, session: &SessionRef, vbd: &VbdRef) -> Result<VbdRecord, XapiError>;
    fn vbd_get_device(&self, session: &SessionRef, vbd: &VbdRef) -> Result<String, XapiError>;
    fn vbd_plug(&self, session: &SessionRef, vbd: &VbdRef) -> Result<(), XapiError>;
    fn vbd_unplug(&self, session: &SessionRef, vbd: &VbdRef) -> Result<(), XapiError>;
    fn vbd_destroy(&self, session: &SessionRef, vbd: &VbdRef) -> Result<(), XapiError>;
}
