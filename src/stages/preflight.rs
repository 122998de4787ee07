//! Target disk inspection before anything destructive runs.
//!
//! The target is read with `lsblk -J -b` and rejected when it is not a whole
//! disk, is smaller than `MIN_DISK_SIZE_BYTES`, or has anything mounted.

use serde::{Deserialize, Deserializer};

use crate::config::MIN_DISK_SIZE_BYTES;

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<BlockDevice>,
}

/// One `lsblk` entry with its partitions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockDevice {
    pub name: String,
    /// Size in bytes.
    #[serde(deserialize_with = "size_in_bytes")]
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub fstype: Option<String>,
    #[serde(default)]
    pub mountpoint: Option<String>,
    #[serde(default)]
    pub children: Vec<BlockDevice>,
}

impl BlockDevice {
    /// First mount point found on the device or any of its partitions.
    pub fn active_mount(&self) -> Option<&str> {
        self.mountpoint
            .as_deref()
            .or_else(|| self.children.iter().find_map(BlockDevice::active_mount))
    }

    /// Partitions or a filesystem are present and will be destroyed.
    pub fn has_existing_data(&self) -> bool {
        !self.children.is_empty() || self.fstype.is_some()
    }
}

/// Older util-linux prints sizes as strings even with `-b`.
fn size_in_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Bytes(u64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Bytes(n) => Ok(n),
        Size::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Parse `lsblk -J` output for a single device.
///
/// Captured output may carry stderr noise around the JSON document; only the
/// first document is read.
pub fn parse_lsblk(output: &str) -> Result<BlockDevice, String> {
    let start = output
        .find('{')
        .ok_or_else(|| "lsblk produced no JSON output".to_string())?;
    let parsed = serde_json::Deserializer::from_str(&output[start..])
        .into_iter::<LsblkOutput>()
        .next()
        .ok_or_else(|| "lsblk produced no JSON output".to_string())?
        .map_err(|e| format!("Failed to parse lsblk output: {}", e))?;
    parsed
        .blockdevices
        .into_iter()
        .next()
        .ok_or_else(|| "lsblk reported no block device".to_string())
}

/// Reject a device that cannot safely be installed onto.
pub fn check_target(device: &BlockDevice) -> Result<(), String> {
    if device.kind != "disk" {
        return Err(format!(
            "Selected device {} is a {}, not a disk",
            device.name, device.kind
        ));
    }
    if device.size < MIN_DISK_SIZE_BYTES {
        return Err(format!(
            "Disk must be at least 8GB. Selected disk {} is {}",
            device.name,
            format_size(device.size)
        ));
    }
    if let Some(mount) = device.active_mount() {
        return Err(format!(
            "Disk {} is busy: mounted at {}. Unmount all partitions first.",
            device.name, mount
        ));
    }
    Ok(())
}

pub fn format_size(bytes: u64) -> String {
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    let gb = bytes as f64 / GB;
    if gb >= 1024.0 {
        format!("{:.1} TB", gb / 1024.0)
    } else {
        format!("{:.1} GB", gb)
    }
}
