use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};

use osutils::dependencies::Dependency;

use crate::{
    actiongraph::{
        action::{Action, ActionKind, Modification},
        commit::CommitContext,
        ActionGraph,
    },
    devicegraph::{DeviceRef, Devicegraph},
    error::{InternalError, NotFoundError, StorageError},
    holders::HolderKind,
    sid::Sid,
};

use super::{tense, DeviceKind, DeviceOps, LvmLv};

/// An LVM volume group. Its parents are the physical volumes, its children
/// the logical volumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LvmVg {
    pub vg_name: String,
}

impl LvmVg {
    pub fn new(vg_name: impl Into<String>) -> Self {
        Self {
            vg_name: vg_name.into(),
        }
    }

    /// Adds an empty volume group to the devicegraph.
    pub fn create(graph: &mut Devicegraph, vg_name: impl Into<String>) -> Sid {
        graph.create_device(DeviceKind::LvmVg(Self::new(vg_name)))
    }

    /// Uses the block device `blk` as a physical volume of the volume group.
    pub fn add_lvm_pv(graph: &mut Devicegraph, vg: Sid, blk: Sid) -> Result<(), StorageError> {
        graph.find_device(vg)?.to_lvm_vg()?;
        if !graph.find_device(blk)?.kind().is_blk_device() {
            return Err(StorageError::new(NotFoundError::WrongDeviceType {
                sid: blk,
                expected: "BlkDevice",
            }));
        }
        graph.add_holder(blk, vg, HolderKind::User)
    }

    /// Adds a logical volume of `size_k` KiB to the volume group.
    pub fn create_lvm_lv(
        graph: &mut Devicegraph,
        vg: Sid,
        lv_name: impl Into<String>,
        size_k: u64,
    ) -> Result<Sid, StorageError> {
        graph.find_device(vg)?.to_lvm_vg()?;
        let lv = graph.create_device(DeviceKind::LvmLv(LvmLv::new(lv_name, size_k)));
        graph.add_holder(vg, lv, HolderKind::Subdevice)?;
        Ok(lv)
    }

    fn pv_names(dev: DeviceRef<'_>) -> Result<Vec<String>, StorageError> {
        dev.parents()
            .iter()
            .map(|pv| pv.block_device_name())
            .collect()
    }
}

impl DeviceOps for LvmVg {
    fn classname(&self) -> &'static str {
        "LvmVg"
    }

    fn displayname(&self, _dev: DeviceRef<'_>) -> Result<String, StorageError> {
        Ok(self.vg_name.clone())
    }

    /// Extending waits until the new physical volume is ready, reducing
    /// happens before the removed physical volume is touched.
    fn add_dependencies(
        &self,
        _dev: DeviceRef<'_>,
        vertex: NodeIndex,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        let kind = ag.action(vertex).kind.clone();
        match kind {
            ActionKind::Modify(Modification::ExtendVg { pv }) => {
                if let Some(last) = ag.last_action(pv) {
                    ag.add_dependency(last, vertex);
                }
            }
            ActionKind::Modify(Modification::ReduceVg { pv }) => {
                if let Some(first) = ag.first_action(pv) {
                    ag.add_dependency(vertex, first);
                }
            }
            _ => (),
        }
        Ok(())
    }

    fn text(
        &self,
        dev: DeviceRef<'_>,
        action: &Action,
        doing: bool,
    ) -> Result<String, StorageError> {
        Ok(match &action.kind {
            ActionKind::Create => format!(
                "{} volume group {} from {}",
                tense(doing, "Create", "Creating"),
                self.vg_name,
                Self::pv_names(dev)?.join(", ")
            ),
            ActionKind::Delete => format!(
                "{} volume group {}",
                tense(doing, "Delete", "Deleting"),
                self.vg_name
            ),
            ActionKind::Modify(Modification::ExtendVg { pv }) => format!(
                "{} volume group {} by {}",
                tense(doing, "Extend", "Extending"),
                self.vg_name,
                dev.graph().device(*pv)?.block_device_name()?
            ),
            ActionKind::Modify(Modification::ReduceVg { pv }) => format!(
                "{} volume group {} by {}",
                tense(doing, "Reduce", "Reducing"),
                self.vg_name,
                dev.graph().device(*pv)?.block_device_name()?
            ),
            _ => format!(
                "{} volume group {}",
                tense(doing, "Keep", "Keeping"),
                self.vg_name
            ),
        })
    }

    fn commit(
        &self,
        dev: DeviceRef<'_>,
        action: &Action,
        ctx: &mut CommitContext<'_>,
    ) -> Result<(), StorageError> {
        match &action.kind {
            ActionKind::Create => ctx.run(
                Dependency::Vgcreate
                    .cmd()
                    .with_args(["--yes", self.vg_name.as_str()])
                    .with_args(Self::pv_names(dev)?),
            ),
            ActionKind::Delete => ctx.run(
                Dependency::Vgremove
                    .cmd()
                    .with_args(["--force", self.vg_name.as_str()]),
            ),
            ActionKind::Modify(Modification::ExtendVg { pv }) => ctx.run(
                Dependency::Vgextend
                    .cmd()
                    .with_arg(&self.vg_name)
                    .with_arg(dev.graph().device(*pv)?.block_device_name()?),
            ),
            ActionKind::Modify(Modification::ReduceVg { pv }) => ctx.run(
                Dependency::Vgreduce
                    .cmd()
                    .with_arg(&self.vg_name)
                    .with_arg(dev.graph().device(*pv)?.block_device_name()?),
            ),
            _ => Err(StorageError::new(InternalError::Internal(
                "Unsupported action for a volume group",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use osutils::testutils::RecordingRunner;
    use sysdefs::partition_tables::PtType;

    use crate::{
        actiongraph::action::Side,
        devices::{Disk, PartitionTable, Region},
        environment::Environment,
        error::ErrorKind,
    };

    use super::*;

    #[test]
    fn test_create_and_commit() {
        let mut graph = Devicegraph::new();
        let disk = Disk::create(&mut graph, "/dev/sdb", 1024 * 1024);
        let pt = Disk::create_partition_table(&mut graph, disk, PtType::Gpt).unwrap();
        let sdb1 =
            PartitionTable::create_partition(&mut graph, pt, "/dev/sdb1", Region::new(2048, 8192))
                .unwrap();
        let sdb2 =
            PartitionTable::create_partition(&mut graph, pt, "/dev/sdb2", Region::new(10240, 8192))
                .unwrap();

        let vg = LvmVg::create(&mut graph, "data");
        LvmVg::add_lvm_pv(&mut graph, vg, sdb1).unwrap();
        LvmVg::add_lvm_pv(&mut graph, vg, sdb2).unwrap();

        // A volume group is not a block device and cannot be a physical volume.
        let other = LvmVg::create(&mut graph, "other");
        assert!(matches!(
            LvmVg::add_lvm_pv(&mut graph, other, vg).unwrap_err().kind(),
            ErrorKind::NotFound(NotFoundError::WrongDeviceType { .. })
        ));

        let dev = graph.device(vg).unwrap();
        let lvm_vg = dev.device().to_lvm_vg().unwrap();

        let create = Action::new(vg, Side::Rhs, ActionKind::Create);
        assert_eq!(
            lvm_vg.text(dev, &create, false).unwrap(),
            "Create volume group data from /dev/sdb1, /dev/sdb2"
        );
        let extend = Action::new(
            vg,
            Side::Rhs,
            ActionKind::Modify(Modification::ExtendVg { pv: sdb2 }),
        );
        assert_eq!(
            lvm_vg.text(dev, &extend, true).unwrap(),
            "Extending volume group data by /dev/sdb2"
        );

        let environment = Environment::default();
        let mut runner = RecordingRunner::new();
        let mut ctx = CommitContext::new(&mut runner, &environment);
        lvm_vg.commit(dev, &create, &mut ctx).unwrap();
        lvm_vg.commit(dev, &extend, &mut ctx).unwrap();
        lvm_vg
            .commit(dev, &Action::new(vg, Side::Lhs, ActionKind::Delete), &mut ctx)
            .unwrap();
        assert_eq!(
            runner.commands(),
            [
                "vgcreate --yes data /dev/sdb1 /dev/sdb2",
                "vgextend data /dev/sdb2",
                "vgremove --force data",
            ]
        );
    }

    #[test]
    fn test_create_lvm_lv() {
        let mut graph = Devicegraph::new();
        let vg = LvmVg::create(&mut graph, "system");
        let lv = LvmVg::create_lvm_lv(&mut graph, vg, "home", 1024).unwrap();
        assert_eq!(graph.find_holder(vg, lv).unwrap().kind, HolderKind::Subdevice);
        assert_eq!(
            graph.device(lv).unwrap().block_device_name().unwrap(),
            "/dev/system/home"
        );
        assert!(LvmVg::create_lvm_lv(&mut graph, lv, "nested", 1).is_err());
    }
}
