use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;

use dom0backup_api::{
    constants::{
        BACKUP_MOUNT_PATH, BACKUP_SR_TYPES, BACKUP_VDI_NAME, BACKUP_VDI_SIZE, MAX_DEVICE_SLOT,
        RESTIC_PATH_DEFAULT, RESTIC_URL_DEFAULT, XAPI_LOCAL_PASSWORD, XAPI_LOCAL_USER,
        XAPI_URL_DEFAULT, XENSOURCE_INVENTORY_PATH,
    },
    error::{BackupError, ConfigurationError, ReportError},
};

/// Optional agent configuration. Every field falls back to the built-in value
/// when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct AgentConfig {
    /// JSON-RPC endpoint of the control plane.
    pub xapi_url: String,

    pub username: String,
    pub password: String,

    /// Where the backup disk is mounted and the repository lives.
    pub mount_path: PathBuf,

    pub inventory_path: PathBuf,

    /// Install location of restic. Downloaded from `restic_url` if missing.
    pub restic_path: PathBuf,
    pub restic_url: String,

    /// Size of a newly created backup disk, in bytes.
    pub disk_size: u64,
    pub disk_name: String,

    /// SR types eligible to host a new backup disk.
    pub sr_types: Vec<String>,

    /// Highest device slot tried when attaching the backup disk.
    pub max_device_slot: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            xapi_url: XAPI_URL_DEFAULT.into(),
            username: XAPI_LOCAL_USER.into(),
            password: XAPI_LOCAL_PASSWORD.into(),
            mount_path: BACKUP_MOUNT_PATH.into(),
            inventory_path: XENSOURCE_INVENTORY_PATH.into(),
            restic_path: RESTIC_PATH_DEFAULT.into(),
            restic_url: RESTIC_URL_DEFAULT.into(),
            disk_size: BACKUP_VDI_SIZE,
            disk_name: BACKUP_VDI_NAME.into(),
            sr_types: BACKUP_SR_TYPES.iter().map(|t| t.to_string()).collect(),
            max_device_slot: MAX_DEVICE_SLOT,
        }
    }
}

impl AgentConfig {
    /// Loads the configuration at `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BackupError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "No agent configuration at '{}', using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            fs::read_to_string(path).structured(ConfigurationError::LoadAgentConfig {
                path: path.display().to_string(),
            })?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, BackupError> {
        // An empty document means "all defaults"
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_path_to_error::deserialize(serde_yaml::Deserializer::from_str(contents))
            .structured(ConfigurationError::ParseAgentConfig)
    }

    pub fn xapi_url(&self) -> Result<Url, BackupError> {
        Url::parse(&self.xapi_url).structured(ConfigurationError::InvalidXapiUrl {
            url: self.xapi_url.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dom0backup_api::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.mount_path, PathBuf::from("/srv/restic-repo"));
        assert_eq!(config.sr_types, vec!["ext", "lvm"]);
        assert_eq!(config.max_device_slot, 20);
        assert_eq!(config.disk_size, 10 * 1024 * 1024 * 1024);
        assert_eq!(
            config.xapi_url().unwrap().as_str(),
            "http://localhost/jsonrpc"
        );

        assert_eq!(AgentConfig::parse("").unwrap(), config);
    }

    #[test]
    fn test_partial_override() {
        let config = AgentConfig::parse(indoc::indoc! {r#"
            mount-path: /mnt/backup
            sr-types:
              - lvm
            max-device-slot: 5
        "#})
        .unwrap();

        assert_eq!(config.mount_path, PathBuf::from("/mnt/backup"));
        assert_eq!(config.sr_types, vec!["lvm"]);
        assert_eq!(config.max_device_slot, 5);
        assert_eq!(config.username, "root");
        assert_eq!(config.restic_path, PathBuf::from("/usr/bin/restic"));
    }

    #[test]
    fn test_invalid() {
        let err = AgentConfig::parse("mount-pth: /mnt").unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Configuration(ConfigurationError::ParseAgentConfig)
        );

        let err = AgentConfig::parse("max-device-slot: many").unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Configuration(ConfigurationError::ParseAgentConfig)
        );

        let config = AgentConfig {
            xapi_url: "not a url".into(),
            ..Default::default()
        };
        assert_eq!(
            config.xapi_url().unwrap_err().kind(),
            &ErrorKind::Configuration(ConfigurationError::InvalidXapiUrl {
                url: "not a url".into()
            })
        );
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        assert_eq!(AgentConfig::load(&path).unwrap(), AgentConfig::default());

        fs::write(&path, "disk-name: Backup\n").unwrap();
        assert_eq!(AgentConfig::load(&path).unwrap().disk_name, "Backup");

        // A directory cannot be read
        let err = AgentConfig::load(dir.path()).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Configuration(ConfigurationError::LoadAgentConfig {
                path: dir.path().display().to_string()
            })
        );
    }
}
