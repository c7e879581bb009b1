use std::{collections::BTreeMap, fmt::Display};

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::{
    actiongraph::{
        action::{Action, ActionKind, Side},
        commit::CommitContext,
        ActionGraph,
    },
    devicegraph::DeviceRef,
    error::{NotFoundError, StorageError},
    sid::Sid,
};

pub mod disk;
pub mod filesystem;
pub mod lvm_lv;
pub mod lvm_vg;
pub mod partition;
pub mod partition_table;

pub use disk::Disk;
pub use filesystem::Filesystem;
pub use lvm_lv::LvmLv;
pub use lvm_vg::LvmVg;
pub use partition::{Partition, Region};
pub use partition_table::PartitionTable;

/// Vertex payload of a devicegraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Device {
    sid: Sid,
    kind: DeviceKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    userdata: BTreeMap<String, String>,
}

/// The concrete kind of a device together with its kind-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DeviceKind {
    Disk(Disk),
    PartitionTable(PartitionTable),
    Partition(Partition),
    LvmVg(LvmVg),
    LvmLv(LvmLv),
    Filesystem(Filesystem),
}

macro_rules! narrowing {
    ($variant:ident, $ty:ty, $as:ident, $as_mut:ident, $to:ident, $to_mut:ident, $name:literal) => {
        impl DeviceKind {
            pub fn $as(&self) -> Option<&$ty> {
                match self {
                    Self::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            pub fn $as_mut(&mut self) -> Option<&mut $ty> {
                match self {
                    Self::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl Device {
            #[track_caller]
            pub fn $to(&self) -> Result<&$ty, StorageError> {
                let sid = self.sid;
                self.kind.$as().ok_or_else(|| {
                    StorageError::new(NotFoundError::WrongDeviceType {
                        sid,
                        expected: $name,
                    })
                })
            }

            #[track_caller]
            pub fn $to_mut(&mut self) -> Result<&mut $ty, StorageError> {
                let sid = self.sid;
                self.kind.$as_mut().ok_or_else(|| {
                    StorageError::new(NotFoundError::WrongDeviceType {
                        sid,
                        expected: $name,
                    })
                })
            }
        }
    };
}

narrowing!(Disk, Disk, as_disk, as_disk_mut, to_disk, to_disk_mut, "Disk");
narrowing!(
    PartitionTable,
    PartitionTable,
    as_partition_table,
    as_partition_table_mut,
    to_partition_table,
    to_partition_table_mut,
    "PartitionTable"
);
narrowing!(
    Partition,
    Partition,
    as_partition,
    as_partition_mut,
    to_partition,
    to_partition_mut,
    "Partition"
);
narrowing!(LvmVg, LvmVg, as_lvm_vg, as_lvm_vg_mut, to_lvm_vg, to_lvm_vg_mut, "LvmVg");
narrowing!(LvmLv, LvmLv, as_lvm_lv, as_lvm_lv_mut, to_lvm_lv, to_lvm_lv_mut, "LvmLv");
narrowing!(
    Filesystem,
    Filesystem,
    as_filesystem,
    as_filesystem_mut,
    to_filesystem,
    to_filesystem_mut,
    "Filesystem"
);

impl DeviceKind {
    /// Returns the behaviour of this kind of device.
    pub fn ops(&self) -> &dyn DeviceOps {
        match self {
            Self::Disk(disk) => disk,
            Self::PartitionTable(pt) => pt,
            Self::Partition(partition) => partition,
            Self::LvmVg(vg) => vg,
            Self::LvmLv(lv) => lv,
            Self::Filesystem(fs) => fs,
        }
    }

    /// Whether the device shows up as a block device node.
    pub fn is_blk_device(&self) -> bool {
        matches!(self, Self::Disk(_) | Self::Partition(_) | Self::LvmLv(_))
    }
}

impl Device {
    /// Creates a device with a freshly allocated sid.
    pub fn new(kind: DeviceKind) -> Self {
        Self::with_sid(Sid::allocate(), kind)
    }

    pub(crate) fn with_sid(sid: Sid, kind: DeviceKind) -> Self {
        Self {
            sid,
            kind,
            userdata: BTreeMap::new(),
        }
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut DeviceKind {
        &mut self.kind
    }

    pub fn classname(&self) -> &'static str {
        self.kind.ops().classname()
    }

    pub fn userdata(&self) -> &BTreeMap<String, String> {
        &self.userdata
    }

    pub fn set_userdata(&mut self, userdata: BTreeMap<String, String>) {
        self.userdata = userdata;
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} sid:{}", self.classname(), self.sid)?;
        match &self.kind {
            DeviceKind::Disk(disk) => write!(f, " name:{} size-k:{}", disk.name, disk.size_k),
            DeviceKind::PartitionTable(pt) => write!(f, " pt-type:{}", pt.pt_type),
            DeviceKind::Partition(partition) => write!(
                f,
                " name:{} type:{} region:{} id:{}",
                partition.name, partition.partition_type, partition.region, partition.id
            ),
            DeviceKind::LvmVg(vg) => write!(f, " vg-name:{}", vg.vg_name),
            DeviceKind::LvmLv(lv) => write!(f, " lv-name:{} size-k:{}", lv.lv_name, lv.size_k),
            DeviceKind::Filesystem(fs) => {
                write!(f, " fs-type:{}", fs.fs_type)?;
                if !fs.label.is_empty() {
                    write!(f, " label:{}", fs.label)?;
                }
                if !fs.mount_points.is_empty() {
                    write!(f, " mount-points:{}", fs.mount_points.join(","))?;
                }
                Ok(())
            }
        }
    }
}

/// Behaviour every device kind provides to the action graph.
///
/// `dev` is always the device itself, resolved in the devicegraph the action
/// refers to.
pub trait DeviceOps {
    fn classname(&self) -> &'static str;

    fn displayname(&self, dev: DeviceRef<'_>) -> Result<String, StorageError>;

    /// Adds the actions creating a device that only exists in the target.
    fn add_create_actions(
        &self,
        dev: DeviceRef<'_>,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        ag.add_chain(dev.sid(), Side::Rhs, [ActionKind::Create]);
        Ok(())
    }

    /// Adds the actions turning `lhs` into `dev`. Nothing is added when no
    /// field differs.
    fn add_modify_actions(
        &self,
        _dev: DeviceRef<'_>,
        _lhs: DeviceRef<'_>,
        _ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    /// Adds the actions removing a device that only exists in the current
    /// devicegraph.
    fn add_delete_actions(
        &self,
        dev: DeviceRef<'_>,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        ag.add_chain(dev.sid(), Side::Lhs, [ActionKind::Delete]);
        Ok(())
    }

    /// Adds ordering edges for the action at `vertex` beyond the generic
    /// parent and child rules.
    fn add_dependencies(
        &self,
        _dev: DeviceRef<'_>,
        _vertex: NodeIndex,
        _ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    /// Describes the action, in progress form when `doing` is set.
    fn text(&self, dev: DeviceRef<'_>, action: &Action, doing: bool)
        -> Result<String, StorageError>;

    /// Performs the action on the system.
    fn commit(
        &self,
        dev: DeviceRef<'_>,
        action: &Action,
        ctx: &mut CommitContext<'_>,
    ) -> Result<(), StorageError>;
}

/// Picks the plan or the progress form of a verb.
pub(crate) fn tense(doing: bool, plan: &'static str, progress: &'static str) -> &'static str {
    if doing {
        progress
    } else {
        plan
    }
}
