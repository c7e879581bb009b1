use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, IntoStaticStr};

/// Filesystem types that can be created on a block device.
///
/// Swap is included since it is formatted and activated like any other
/// filesystem, even though the kernel does not list it in `/proc/filesystems`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FilesystemType {
    Btrfs,
    Ext2,
    Ext3,
    Ext4,
    Swap,
    Vfat,
    Xfs,
}

impl FilesystemType {
    /// Returns the name of the filesystem as understood by `mkfs --type` and
    /// `mount -t`.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Returns whether the filesystem carries a label.
    pub fn supports_label(self) -> bool {
        true
    }

    /// Returns the maximum length of a label, in bytes.
    pub fn max_label_len(self) -> usize {
        match self {
            Self::Btrfs => 255,
            Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Swap => 16,
            Self::Vfat => 11,
            Self::Xfs => 12,
        }
    }

    /// Returns whether a UUID can be chosen when the filesystem is created.
    pub fn supports_uuid(self) -> bool {
        match self {
            Self::Btrfs | Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Swap | Self::Xfs => true,
            Self::Vfat => false,
        }
    }

    /// Returns the flag `mkfs` uses to set the label.
    pub fn mkfs_label_flag(self) -> &'static str {
        match self {
            Self::Vfat => "-n",
            _ => "-L",
        }
    }

    /// Returns the `mkfs` arguments to set the UUID, if supported.
    pub fn mkfs_uuid_args(self, uuid: &str) -> Option<Vec<String>> {
        match self {
            Self::Btrfs | Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Swap => {
                Some(vec!["-U".into(), uuid.into()])
            }
            Self::Xfs => Some(vec!["-m".into(), format!("uuid={uuid}")]),
            Self::Vfat => None,
        }
    }

    /// Returns whether this is the swap "filesystem".
    pub fn is_swap(self) -> bool {
        self == Self::Swap
    }
}
