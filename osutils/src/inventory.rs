use std::path::Path;

use anyhow::{Context, Error};
use uuid::Uuid;

/// Represents the contents of the /etc/xensource-inventory file.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Inventory {
    pub installation_uuid: Option<String>,
}

impl Inventory {
    /// Reads the inventory file at `path` and parses it into an Inventory struct.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::parse(&std::fs::read_to_string(path.as_ref()).with_context(
            || format!("Failed to read '{}'", path.as_ref().display()),
        )?))
    }

    /// Returns the installation UUID of the host, if present and well formed.
    pub fn installation_uuid(&self) -> Option<Uuid> {
        self.installation_uuid
            .as_deref()
            .and_then(|uuid| Uuid::parse_str(uuid).ok())
    }

    /// Parses the input string into an Inventory struct.
    fn parse(data: &str) -> Self {
        let mut inventory = Inventory::default();
        for line in data.lines() {
            if line.is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            let Some((key, raw_value)) = line.trim().split_once('=') else {
                continue;
            };

            if key == "INSTALLATION_UUID" {
                inventory.installation_uuid = Some(
                    raw_value
                        .trim()
                        .trim_matches('\'')
                        .trim_matches('\"')
                        .to_string(),
                );
            }
        }

        inventory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;

    #[test]
    fn test_parse() {
        let inventory = Inventory::parse(indoc! {r#"
            PRIMARY_DISK='/dev/disk/by-id/ata-QEMU_HARDDISK_QM00001'
            BUILD_NUMBER='release/lima/master/10'
            INSTALLATION_UUID='0f1a2b3c-4d5e-4f60-8a7b-9c0d1e2f3a4b'
            # comment
            CONTROL_DOMAIN_UUID='11111111-2222-4333-8444-555555555555'
            MANAGEMENT_INTERFACE='xenbr0'
        "#});

        assert_eq!(
            inventory,
            Inventory {
                installation_uuid: Some("0f1a2b3c-4d5e-4f60-8a7b-9c0d1e2f3a4b".into()),
            }
        );
        assert_eq!(
            inventory.installation_uuid().unwrap().to_string(),
            "0f1a2b3c-4d5e-4f60-8a7b-9c0d1e2f3a4b"
        );
    }

    #[test]
    fn test_parse_missing_or_malformed() {
        let inventory = Inventory::parse("BUILD_NUMBER='10'\n");
        assert_eq!(inventory, Inventory::default());
        assert_eq!(inventory.installation_uuid, None);
        assert_eq!(inventory.installation_uuid(), None);

        let inventory = Inventory::parse("INSTALLATION_UUID='not-a-uuid'\n");
        assert_eq!(inventory.installation_uuid.as_deref(), Some("not-a-uuid"));
        assert_eq!(inventory.installation_uuid(), None);

        let inventory = Inventory::parse("garbage line\n\nINSTALLATION_UUID\n");
        assert_eq!(inventory, Inventory::default());
    }

    #[test]
    fn test_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xensource-inventory");
        std::fs::write(
            &path,
            "INSTALLATION_UUID='0f1a2b3c-4d5e-4f60-8a7b-9c0d1e2f3a4b'\n",
        )
        .unwrap();
        assert!(Inventory::read(&path).unwrap().installation_uuid().is_some());

        let missing = dir.path().join("missing");
        assert_eq!(
            Inventory::read(&missing).unwrap_err().to_string(),
            format!("Failed to read '{}'", missing.display())
        );
    }
}
