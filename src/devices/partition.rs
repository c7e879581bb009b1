use std::fmt::Display;

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};

use osutils::dependencies::{Command, Dependency};
use sysdefs::partition_tables::{PartitionId, PartitionType};

use crate::{
    actiongraph::{
        action::{Action, ActionKind, Modification, Side},
        commit::CommitContext,
        ActionGraph,
    },
    devicegraph::DeviceRef,
    error::{InternalError, ReportError, StorageError},
    size::{sectors_to_k, to_human_readable},
};

use super::{partition_table::disk_of, tense, DeviceOps};

/// Location of a partition on its disk, in 512 byte sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Region {
    pub start: u64,
    pub length: u64,
}

impl Region {
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// Last sector of the region.
    pub fn end(&self) -> u64 {
        (self.start + self.length).saturating_sub(1)
    }

    pub fn size_k(&self) -> u64 {
        sectors_to_k(self.length)
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.length)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Partition {
    pub name: String,
    #[serde(default)]
    pub partition_type: PartitionType,
    pub region: Region,
    #[serde(default)]
    pub id: PartitionId,
}

impl Partition {
    /// Partition number, taken from the trailing digits of the name.
    pub fn number(&self) -> Result<u32, StorageError> {
        let digits = self.name.len()
            - self
                .name
                .chars()
                .rev()
                .take_while(|c| c.is_ascii_digit())
                .count();
        self.name[digits..]
            .parse()
            .structured(InternalError::Internal("Partition name does not end in a number"))
    }

    fn sfdisk_id(&self) -> String {
        match self.id.sfdisk_alias() {
            Some(alias) => alias.to_string(),
            None => format!("{:x}", self.id.0),
        }
    }

    fn set_id_command(&self, disk: &str) -> Result<Command, StorageError> {
        Ok(Dependency::Sfdisk.cmd().with_args([
            "--part-type".to_string(),
            disk.to_string(),
            self.number()?.to_string(),
            self.sfdisk_id(),
        ]))
    }

    fn with_size(&self) -> String {
        format!("{} ({})", self.name, to_human_readable(self.region.size_k()))
    }
}

impl DeviceOps for Partition {
    fn classname(&self) -> &'static str {
        "Partition"
    }

    fn displayname(&self, _dev: DeviceRef<'_>) -> Result<String, StorageError> {
        Ok(self.name.clone())
    }

    fn add_modify_actions(
        &self,
        dev: DeviceRef<'_>,
        lhs: DeviceRef<'_>,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        let lhs = lhs.device().to_partition()?;

        let mut actions = Vec::new();
        if self.region.length != lhs.region.length {
            actions.push(ActionKind::Modify(Modification::Resize));
        }
        if self.id != lhs.id {
            actions.push(ActionKind::Modify(Modification::SetPartitionId));
        }
        ag.add_chain(dev.sid(), Side::Rhs, actions);
        Ok(())
    }

    /// A new partition is created only after the partitions that are deleted
    /// from the same disk, so that it may reuse their space. On a new
    /// partition table these are the partitions of the replaced one.
    fn add_dependencies(
        &self,
        dev: DeviceRef<'_>,
        vertex: NodeIndex,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        if ag.action(vertex).kind != ActionKind::Create {
            return Ok(());
        }

        let lhs = ag.lhs();
        let mut previous = Vec::new();
        for pt in dev.parents() {
            if let Ok(lhs_pt) = lhs.device(pt.sid()) {
                previous.extend(lhs_pt.children());
                continue;
            }
            let Ok(lhs_disk) = lhs.device(disk_of(pt)?.sid()) else {
                continue;
            };
            for old_pt in lhs_disk.children() {
                if !ag.rhs().device_exists(old_pt.sid()) {
                    previous.extend(old_pt.children());
                }
            }
        }

        for sibling in previous {
            if !ag.rhs().device_exists(sibling.sid()) {
                if let Some(last) = ag.last_action(sibling.sid()) {
                    ag.add_dependency(last, vertex);
                }
            }
        }
        Ok(())
    }

    fn text(
        &self,
        _dev: DeviceRef<'_>,
        action: &Action,
        doing: bool,
    ) -> Result<String, StorageError> {
        Ok(match &action.kind {
            ActionKind::Create => format!(
                "{} partition {}",
                tense(doing, "Create", "Creating"),
                self.with_size()
            ),
            ActionKind::Delete => format!(
                "{} partition {}",
                tense(doing, "Delete", "Deleting"),
                self.with_size()
            ),
            ActionKind::Modify(Modification::Resize) => format!(
                "{} partition {} to {}",
                tense(doing, "Resize", "Resizing"),
                self.name,
                to_human_readable(self.region.size_k())
            ),
            ActionKind::Modify(Modification::SetPartitionId) => format!(
                "{} id of partition {} to {}",
                tense(doing, "Set", "Setting"),
                self.name,
                self.id
            ),
            _ => format!("{} partition {}", tense(doing, "Keep", "Keeping"), self.name),
        })
    }

    fn commit(
        &self,
        dev: DeviceRef<'_>,
        action: &Action,
        ctx: &mut CommitContext<'_>,
    ) -> Result<(), StorageError> {
        let pt = dev.parent_where("PartitionTable", |kind| kind.as_partition_table().is_some())?;
        let disk = disk_of(pt)?.block_device_name()?;
        let number = self.number()?.to_string();
        let start = self.region.start.to_string();
        let end = self.region.end().to_string();
        let partition_type: &'static str = self.partition_type.into();

        match &action.kind {
            ActionKind::Create => {
                ctx.run(Dependency::Parted.cmd().with_args([
                    "--script",
                    "--align",
                    "none",
                    disk.as_str(),
                    "unit",
                    "s",
                    "mkpart",
                    partition_type,
                    start.as_str(),
                    end.as_str(),
                ]))?;
                if self.partition_type != PartitionType::Extended {
                    ctx.run(self.set_id_command(&disk)?)?;
                }
            }
            ActionKind::Delete => {
                ctx.run(Dependency::Parted.cmd().with_args([
                    "--script",
                    disk.as_str(),
                    "rm",
                    number.as_str(),
                ]))?;
            }
            ActionKind::Modify(Modification::Resize) => {
                ctx.run(Dependency::Parted.cmd().with_args([
                    "--script",
                    disk.as_str(),
                    "unit",
                    "s",
                    "resizepart",
                    number.as_str(),
                    end.as_str(),
                ]))?;
            }
            ActionKind::Modify(Modification::SetPartitionId) => {
                ctx.run(self.set_id_command(&disk)?)?;
            }
            _ => {
                return Err(StorageError::new(InternalError::Internal(
                    "Unsupported action for a partition",
                )))
            }
        }

        ctx.run(Dependency::Udevadm.cmd().with_arg("settle"))
    }
}
