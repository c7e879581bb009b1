use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, IntoStaticStr};

/// Partition table (disk label) types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PtType {
    Msdos,
    Gpt,
}

impl PtType {
    /// Name of the label as understood by `parted mklabel`.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Maximum number of primary partitions the table can hold.
    pub fn max_primary(self) -> u32 {
        match self {
            Self::Msdos => 4,
            Self::Gpt => 128,
        }
    }

    /// Whether the table supports extended and logical partitions.
    pub fn extended_possible(self) -> bool {
        self == Self::Msdos
    }
}

/// Kind of a partition within its partition table.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PartitionType {
    #[default]
    Primary,
    Extended,
    Logical,
}

/// Partition id, using the MS-DOS system id numbering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PartitionId(pub u32);

impl PartitionId {
    pub const SWAP: Self = Self(0x82);
    pub const LINUX: Self = Self(0x83);
    pub const LVM: Self = Self(0x8e);
    pub const ESP: Self = Self(0xef);
    pub const RAID: Self = Self(0xfd);

    /// Returns the `sfdisk --part-type` shortcut for this id. Shortcuts are
    /// accepted for both MS-DOS and GPT partition tables.
    pub fn sfdisk_alias(self) -> Option<&'static str> {
        Some(match self {
            Self::LINUX => "L",
            Self::SWAP => "S",
            Self::LVM => "V",
            Self::RAID => "R",
            Self::ESP => "U",
            _ => return None,
        })
    }
}

impl Default for PartitionId {
    fn default() -> Self {
        Self::LINUX
    }
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}
