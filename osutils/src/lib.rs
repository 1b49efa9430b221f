pub mod bzip2;
pub mod dependencies;
pub mod e2fsck;
pub mod files;
pub mod inventory;
pub mod mkfs;
pub mod mount;
pub mod mountpoint;
pub mod resize2fs;
