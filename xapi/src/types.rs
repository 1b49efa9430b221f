use std::{
    collections::HashMap,
    fmt::{Display, Formatter, Result as FmtResult},
};

use serde::{Deserialize, Serialize};

macro_rules! opaque_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(reference: impl Into<String>) -> Self {
                Self(reference.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_ref!(
    /// Authenticated session handle.
    SessionRef
);
opaque_ref!(
    /// Physical host.
    HostRef
);
opaque_ref!(
    /// Virtual machine, including control domains.
    VmRef
);
opaque_ref!(
    /// Storage repository.
    SrRef
);
opaque_ref!(
    /// Virtual disk image.
    VdiRef
);
opaque_ref!(
    /// Virtual block device, the attachment of a VDI to a VM.
    VbdRef
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name_label: String,
    pub is_control_domain: bool,
    pub resident_on: HostRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrRecord {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name_label: String,
    #[serde(rename = "type")]
    pub sr_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VbdRecord {
    #[serde(default)]
    pub uuid: String,
    #[serde(rename = "VDI")]
    pub vdi: VdiRef,
    #[serde(rename = "VM")]
    pub vm: VmRef,
    pub userdevice: String,
    #[serde(default)]
    pub device: String,
    pub currently_attached: bool,
}

/// Arguments of `VDI.create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VdiConfig {
    pub name_label: String,
    pub name_description: String,
    #[serde(rename = "SR")]
    pub sr: SrRef,
    /// Size in bytes, sent as a decimal string.
    #[serde(serialize_with = "int_as_string")]
    pub virtual_size: u64,
    #[serde(rename = "type")]
    pub vdi_type: String,
    pub sharable: bool,
    pub read_only: bool,
    pub other_config: HashMap<String, String>,
}

impl VdiConfig {
    /// A writable, non-shareable user disk.
    pub fn user_disk(name_label: impl Into<String>, sr: SrRef, virtual_size: u64) -> Self {
        Self {
            name_label: name_label.into(),
            name_description: String::new(),
            sr,
            virtual_size,
            vdi_type: "user".into(),
            sharable: false,
            read_only: false,
            other_config: HashMap::new(),
        }
    }
}

/// Arguments of `VBD.create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VbdConfig {
    #[serde(rename = "VDI")]
    pub vdi: VdiRef,
    #[serde(rename = "VM")]
    pub vm: VmRef,
    pub userdevice: String,
    #[serde(rename = "type")]
    pub vbd_type: String,
    pub mode: String,
    pub bootable: bool,
    pub empty: bool,
    pub other_config: HashMap<String, String>,
    pub qos_algorithm_type: String,
    pub qos_algorithm_params: HashMap<String, String>,
}

impl VbdConfig {
    /// A non-bootable read-write disk attachment at the given device slot.
    pub fn disk(vdi: VdiRef, vm: VmRef, slot: u32) -> Self {
        Self {
            vdi,
            vm,
            userdevice: slot.to_string(),
            vbd_type: "Disk".into(),
            mode: "rw".into(),
            bootable: false,
            empty: false,
            other_config: HashMap::new(),
            qos_algorithm_type: String::new(),
            qos_algorithm_params: HashMap::new(),
        }
    }
}

fn int_as_string<S: serde::Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}
