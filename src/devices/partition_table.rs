use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};

use osutils::dependencies::Dependency;
use sysdefs::partition_tables::{PartitionId, PartitionType, PtType};

use crate::{
    actiongraph::{
        action::{Action, ActionKind},
        commit::CommitContext,
        ActionGraph,
    },
    devicegraph::{DeviceRef, Devicegraph},
    error::{InternalError, StorageError},
    holders::HolderKind,
    sid::Sid,
};

use super::{tense, DeviceKind, DeviceOps, Partition, Region};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionTable {
    pub pt_type: PtType,
}

impl PartitionTable {
    pub fn new(pt_type: PtType) -> Self {
        Self { pt_type }
    }

    /// Adds a primary Linux partition to the partition table.
    pub fn create_partition(
        graph: &mut Devicegraph,
        pt: Sid,
        name: impl Into<String>,
        region: Region,
    ) -> Result<Sid, StorageError> {
        Self::create_partition_with(
            graph,
            pt,
            name,
            region,
            PartitionType::Primary,
            PartitionId::LINUX,
        )
    }

    pub fn create_partition_with(
        graph: &mut Devicegraph,
        pt: Sid,
        name: impl Into<String>,
        region: Region,
        partition_type: PartitionType,
        id: PartitionId,
    ) -> Result<Sid, StorageError> {
        graph.find_device(pt)?.to_partition_table()?;
        let partition = graph.create_device(DeviceKind::Partition(Partition {
            name: name.into(),
            partition_type,
            region,
            id,
        }));
        graph.add_holder(pt, partition, HolderKind::Subdevice)?;
        Ok(partition)
    }

    fn label(&self) -> String {
        self.pt_type.name().to_uppercase()
    }
}

/// Returns the disk a partition table or partition lives on.
pub(crate) fn disk_of<'a>(pt: DeviceRef<'a>) -> Result<DeviceRef<'a>, StorageError> {
    pt.parent_where("Disk", |kind| kind.as_disk().is_some())
}

impl DeviceOps for PartitionTable {
    fn classname(&self) -> &'static str {
        "PartitionTable"
    }

    fn displayname(&self, dev: DeviceRef<'_>) -> Result<String, StorageError> {
        Ok(format!(
            "{} on {}",
            self.label(),
            disk_of(dev)?.block_device_name()?
        ))
    }

    /// A new partition table is written only after everything removed from
    /// the same disk is gone, the old partition table included.
    fn add_dependencies(
        &self,
        dev: DeviceRef<'_>,
        vertex: NodeIndex,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        if ag.action(vertex).kind != ActionKind::Create {
            return Ok(());
        }

        let Ok(lhs_disk) = ag.lhs().device(disk_of(dev)?.sid()) else {
            return Ok(());
        };
        for old in lhs_disk.children() {
            if !ag.rhs().device_exists(old.sid()) {
                if let Some(last) = ag.last_action(old.sid()) {
                    ag.add_dependency(last, vertex);
                }
            }
        }
        Ok(())
    }

    fn text(
        &self,
        dev: DeviceRef<'_>,
        action: &Action,
        doing: bool,
    ) -> Result<String, StorageError> {
        let verb = match action.kind {
            ActionKind::Create => tense(doing, "Create", "Creating"),
            ActionKind::Delete => tense(doing, "Delete", "Deleting"),
            _ => tense(doing, "Keep", "Keeping"),
        };
        Ok(format!("{verb} {}", self.displayname(dev)?))
    }

    fn commit(
        &self,
        dev: DeviceRef<'_>,
        action: &Action,
        ctx: &mut CommitContext<'_>,
    ) -> Result<(), StorageError> {
        let disk = disk_of(dev)?.block_device_name()?;
        match action.kind {
            ActionKind::Create => {
                ctx.run(Dependency::Parted.cmd().with_args([
                    "--script",
                    disk.as_str(),
                    "mklabel",
                    self.pt_type.name(),
                ]))?;
                ctx.run(Dependency::Udevadm.cmd().with_arg("settle"))
            }
            ActionKind::Delete => {
                ctx.run(Dependency::Wipefs.cmd().with_args(["--all", disk.as_str()]))
            }
            _ => Err(StorageError::new(InternalError::Internal(
                "Partition tables can only be created or deleted",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use osutils::testutils::RecordingRunner;

    use crate::{actiongraph::action::Side, devices::Disk, environment::Environment};

    use super::*;

    #[test]
    fn test_create_partition() {
        let mut graph = Devicegraph::new();
        let disk = Disk::create(&mut graph, "/dev/sda", 1024 * 1024);
        let pt = Disk::create_partition_table(&mut graph, disk, PtType::Msdos).unwrap();
        let sda5 = PartitionTable::create_partition_with(
            &mut graph,
            pt,
            "/dev/sda5",
            Region::new(4096, 2048),
            PartitionType::Logical,
            PartitionId::SWAP,
        )
        .unwrap();

        let partition = graph.find_device(sda5).unwrap().to_partition().unwrap().clone();
        assert_eq!(partition.partition_type, PartitionType::Logical);
        assert_eq!(partition.id, PartitionId::SWAP);
        assert_eq!(graph.find_holder(pt, sda5).unwrap().kind, HolderKind::Subdevice);

        assert!(PartitionTable::create_partition(
            &mut graph,
            disk,
            "/dev/sda1",
            Region::new(0, 1)
        )
        .is_err());
    }

    #[test]
    fn test_text_and_commit() {
        let mut graph = Devicegraph::new();
        let disk = Disk::create(&mut graph, "/dev/sda", 1024 * 1024);
        let sid = Disk::create_partition_table(&mut graph, disk, PtType::Gpt).unwrap();
        let dev = graph.device(sid).unwrap();
        let pt = dev.device().to_partition_table().unwrap();

        let create = Action::new(sid, Side::Rhs, ActionKind::Create);
        assert_eq!(pt.text(dev, &create, false).unwrap(), "Create GPT on /dev/sda");
        assert_eq!(pt.text(dev, &create, true).unwrap(), "Creating GPT on /dev/sda");

        let environment = Environment::default();
        let mut runner = RecordingRunner::new();
        let mut ctx = CommitContext::new(&mut runner, &environment);
        pt.commit(dev, &create, &mut ctx).unwrap();
        pt.commit(dev, &Action::new(sid, Side::Lhs, ActionKind::Delete), &mut ctx)
            .unwrap();
        assert_eq!(
            runner.commands(),
            [
                "parted --script /dev/sda mklabel gpt",
                "udevadm settle",
                "wipefs --all /dev/sda",
            ]
        );
    }

    #[test]
    fn test_replace_partition_table() {
        let mut lhs = Devicegraph::new();
        let disk = Disk::create(&mut lhs, "/dev/sda", 1024 * 1024);
        let gpt = Disk::create_partition_table(&mut lhs, disk, PtType::Gpt).unwrap();
        let old =
            PartitionTable::create_partition(&mut lhs, gpt, "/dev/sda1", Region::new(2048, 4096))
                .unwrap();

        let mut rhs = lhs.clone();
        rhs.remove_device(old).unwrap();
        rhs.remove_device(gpt).unwrap();
        let msdos = Disk::create_partition_table(&mut rhs, disk, PtType::Msdos).unwrap();
        let new =
            PartitionTable::create_partition(&mut rhs, msdos, "/dev/sda1", Region::new(2048, 8192))
                .unwrap();

        let ag = ActionGraph::new(&lhs, &rhs).unwrap();
        assert_eq!(
            ag.commit_steps().unwrap(),
            [
                "Deleting partition /dev/sda1 (2.00 MiB)",
                "Deleting GPT on /dev/sda",
                "Creating MSDOS on /dev/sda",
                "Creating partition /dev/sda1 (4.00 MiB)",
            ]
        );
        let delete_gpt = ag.last_action(gpt).unwrap();
        assert!(ag.has_dependency(delete_gpt, ag.first_action(msdos).unwrap()));
        assert!(ag.has_dependency(ag.last_action(old).unwrap(), ag.first_action(new).unwrap()));

        let mut runner = RecordingRunner::new();
        ag.commit(&Environment::default(), &mut runner, None).unwrap();
        let commands = runner.commands();
        assert_eq!(
            &commands[..5],
            [
                "parted --script /dev/sda rm 1",
                "udevadm settle",
                "wipefs --all /dev/sda",
                "parted --script /dev/sda mklabel msdos",
                "udevadm settle",
            ]
        );
        assert_eq!(
            commands[5],
            "parted --script --align none /dev/sda unit s mkpart primary 2048 10239"
        );
    }
}
