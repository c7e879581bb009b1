use serde::{Deserialize, Serialize};

use sysdefs::partition_tables::PtType;

use crate::{
    actiongraph::{
        action::{Action, ActionKind, Side},
        commit::CommitContext,
        ActionGraph,
    },
    devicegraph::{DeviceRef, Devicegraph},
    error::{InternalError, StorageError},
    holders::HolderKind,
    sid::Sid,
    size::to_human_readable,
};

use super::{tense, DeviceKind, DeviceOps, PartitionTable};

/// A physical disk. Disks are never created or removed, they are only
/// carried through a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Disk {
    pub name: String,
    pub size_k: u64,
    #[serde(default)]
    pub rotational: bool,
}

impl Disk {
    pub fn new(name: impl Into<String>, size_k: u64) -> Self {
        Self {
            name: name.into(),
            size_k,
            rotational: false,
        }
    }

    /// Adds a disk to the devicegraph and returns its sid.
    pub fn create(graph: &mut Devicegraph, name: impl Into<String>, size_k: u64) -> Sid {
        graph.create_device(DeviceKind::Disk(Self::new(name, size_k)))
    }

    /// Puts a new, empty partition table on the disk.
    pub fn create_partition_table(
        graph: &mut Devicegraph,
        disk: Sid,
        pt_type: PtType,
    ) -> Result<Sid, StorageError> {
        graph.find_device(disk)?.to_disk()?;
        let pt = graph.create_device(DeviceKind::PartitionTable(PartitionTable::new(pt_type)));
        graph.add_holder(disk, pt, HolderKind::User)?;
        Ok(pt)
    }
}

impl DeviceOps for Disk {
    fn classname(&self) -> &'static str {
        "Disk"
    }

    fn displayname(&self, _dev: DeviceRef<'_>) -> Result<String, StorageError> {
        Ok(self.name.clone())
    }

    fn add_create_actions(
        &self,
        dev: DeviceRef<'_>,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        ag.add_chain(dev.sid(), Side::Rhs, [ActionKind::Nop]);
        Ok(())
    }

    fn add_delete_actions(
        &self,
        dev: DeviceRef<'_>,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        ag.add_chain(dev.sid(), Side::Lhs, [ActionKind::Nop]);
        Ok(())
    }

    fn text(
        &self,
        _dev: DeviceRef<'_>,
        action: &Action,
        doing: bool,
    ) -> Result<String, StorageError> {
        let verb = match action.side {
            Side::Rhs => tense(doing, "Use", "Using"),
            Side::Lhs => tense(doing, "Release", "Releasing"),
        };
        Ok(format!(
            "{verb} disk {} ({})",
            self.name,
            to_human_readable(self.size_k)
        ))
    }

    fn commit(
        &self,
        _dev: DeviceRef<'_>,
        action: &Action,
        _ctx: &mut CommitContext<'_>,
    ) -> Result<(), StorageError> {
        match action.kind {
            ActionKind::Nop => Ok(()),
            _ => Err(StorageError::new(InternalError::Internal(
                "Disks only take part in a plan as synchronization points",
            ))),
        }
    }
}
