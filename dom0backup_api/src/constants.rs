use const_format::formatcp;

// Control plane constants

/// Default JSON-RPC endpoint of the local XAPI instance.
pub const XAPI_URL_DEFAULT: &str = "http://localhost/jsonrpc";

/// User used to log into the local XAPI instance.
pub const XAPI_LOCAL_USER: &str = "root";

/// Password used to log into the local XAPI instance. Local logins are not
/// authenticated.
pub const XAPI_LOCAL_PASSWORD: &str = "";

/// Key in the host's other-config map that records the backup VDI.
pub const BACKUP_VDI_UUID_KEY: &str = "backup_vdi_uuid";

// Backup disk constants

/// Size of the backup VDI in bytes (10 GiB).
pub const BACKUP_VDI_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Name label of the backup VDI.
pub const BACKUP_VDI_NAME: &str = "Dom0 Backup";

/// SR types that can host the backup VDI.
pub const BACKUP_SR_TYPES: [&str; 2] = ["ext", "lvm"];

/// Highest `userdevice` slot tried when attaching the backup VDI.
pub const MAX_DEVICE_SLOT: u32 = 20;

/// Filesystem created on a new backup VDI.
pub const BACKUP_FILESYSTEM: &str = "ext4";

// Path constants

/// Mount point of the backup repository.
pub const BACKUP_MOUNT_PATH: &str = "/srv/restic-repo";

/// Installation inventory of the host.
pub const XENSOURCE_INVENTORY_PATH: &str = "/etc/xensource-inventory";

/// Directory holding block device nodes.
pub const DEV_DIRECTORY: &str = "/dev";

/// Directory holding the agent configuration.
pub const AGENT_CONFIG_DIRECTORY: &str = "/etc/dom0backup";

/// Path to load the agent config from.
pub const AGENT_CONFIG_PATH: &str = formatcp!("{AGENT_CONFIG_DIRECTORY}/config.yaml");

/// Path of the JSON background log.
pub const BACKGROUND_LOG_PATH: &str = "/var/log/dom0backup.log";

// Backup tool constants

/// Version of restic downloaded when no binary is installed.
pub const RESTIC_VERSION: &str = "0.9.1";

/// Install location of the restic binary.
pub const RESTIC_PATH_DEFAULT: &str = "/usr/bin/restic";

/// Name of the restic release asset, also the name of the decompressed binary.
pub const RESTIC_ASSET_NAME: &str = formatcp!("restic_{RESTIC_VERSION}_linux_amd64");

/// Download location of the restic release.
pub const RESTIC_URL_DEFAULT: &str = formatcp!(
    "https://github.com/restic/restic/releases/download/v{RESTIC_VERSION}/{RESTIC_ASSET_NAME}.bz2"
);

/// Environment variable restic reads the repository password from.
pub const RESTIC_PASSWORD_ENV: &str = "RESTIC_PASSWORD";

/// Repository password. The repository lives on a dom0-private disk, so the
/// password is a fixed placeholder.
pub const RESTIC_PASSWORD: &str = "none";

/// Number of snapshots kept after a backup.
pub const RESTIC_KEEP_LAST: u32 = 1;
