//! Device identity for same-device and ancestry checks.

use serde::{Deserialize, Serialize};

/// (device, inode) pair identifying one filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device ID.
    pub device: u64,
    /// Inode number.
    pub inode: u64,
}

impl DeviceId {
    /// Create a new device identity.
    pub fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }

    /// Whether both objects live on the same device.
    pub fn same_device(&self, other: &DeviceId) -> bool {
        self.device == other.device
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.device, self.inode)
    }
}
