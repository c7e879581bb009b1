use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};

use osutils::dependencies::Dependency;

use crate::{
    actiongraph::{
        action::{Action, ActionKind, Modification, Side},
        commit::CommitContext,
        ActionGraph,
    },
    devicegraph::DeviceRef,
    error::{InternalError, StorageError},
    size::to_human_readable,
};

use super::{tense, DeviceOps};

/// An LVM logical volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LvmLv {
    pub lv_name: String,
    pub size_k: u64,
}

impl LvmLv {
    pub fn new(lv_name: impl Into<String>, size_k: u64) -> Self {
        Self {
            lv_name: lv_name.into(),
            size_k,
        }
    }

    /// Device node of the logical volume inside the given volume group.
    pub fn path(&self, vg_name: &str) -> String {
        format!("/dev/{vg_name}/{}", self.lv_name)
    }
}

impl DeviceOps for LvmLv {
    fn classname(&self) -> &'static str {
        "LvmLv"
    }

    fn displayname(&self, dev: DeviceRef<'_>) -> Result<String, StorageError> {
        dev.block_device_name()
    }

    fn add_modify_actions(
        &self,
        dev: DeviceRef<'_>,
        lhs: DeviceRef<'_>,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        if self.size_k != lhs.device().to_lvm_lv()?.size_k {
            ag.add_chain(
                dev.sid(),
                Side::Rhs,
                [ActionKind::Modify(Modification::Resize)],
            );
        }
        Ok(())
    }

    /// Creating waits for the logical volumes removed from the same volume
    /// group, resizing waits for the volume group to be extended.
    fn add_dependencies(
        &self,
        dev: DeviceRef<'_>,
        vertex: NodeIndex,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        if ag.action(vertex).kind == ActionKind::Create {
            let lhs = ag.lhs();
            for vg in dev.parents() {
                let Ok(lhs_vg) = lhs.device(vg.sid()) else {
                    continue;
                };
                for old in lhs_vg.children() {
                    if !ag.rhs().device_exists(old.sid()) {
                        if let Some(last) = ag.last_action(old.sid()) {
                            ag.add_dependency(last, vertex);
                        }
                    }
                }
            }
            return Ok(());
        }
        if ag.action(vertex).kind != ActionKind::Modify(Modification::Resize) {
            return Ok(());
        }

        for vg in dev.parents() {
            let extensions: Vec<_> = ag
                .chain(vg.sid())
                .iter()
                .copied()
                .filter(|index| {
                    matches!(
                        ag.action(*index).kind,
                        ActionKind::Modify(Modification::ExtendVg { .. })
                    )
                })
                .collect();
            for extension in extensions {
                ag.add_dependency(extension, vertex);
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
        let name = dev.block_device_name()?;
        let size = to_human_readable(self.size_k);
        Ok(match &action.kind {
            ActionKind::Create => format!(
                "{} logical volume {name} ({size})",
                tense(doing, "Create", "Creating")
            ),
            ActionKind::Delete => format!(
                "{} logical volume {name} ({size})",
                tense(doing, "Delete", "Deleting")
            ),
            ActionKind::Modify(Modification::Resize) => format!(
                "{} logical volume {name} to {size}",
                tense(doing, "Resize", "Resizing")
            ),
            _ => format!(
                "{} logical volume {name}",
                tense(doing, "Keep", "Keeping")
            ),
        })
    }

    fn commit(
        &self,
        dev: DeviceRef<'_>,
        action: &Action,
        ctx: &mut CommitContext<'_>,
    ) -> Result<(), StorageError> {
        let vg = dev.parent_where("LvmVg", |kind| kind.as_lvm_vg().is_some())?;
        let vg_name = vg.device().to_lvm_vg()?.vg_name.as_str();
        let size = format!("{}k", self.size_k);
        let path = self.path(vg_name);

        match &action.kind {
            ActionKind::Create => ctx.run(Dependency::Lvcreate.cmd().with_args([
                "--yes",
                "--name",
                self.lv_name.as_str(),
                "--size",
                size.as_str(),
                vg_name,
            ])),
            ActionKind::Delete => {
                ctx.run(Dependency::Lvremove.cmd().with_args(["--yes", path.as_str()]))
            }
            ActionKind::Modify(Modification::Resize) => {
                ctx.run(Dependency::Lvresize.cmd().with_args([
                    "--yes",
                    "--force",
                    "--size",
                    size.as_str(),
                    path.as_str(),
                ]))
            }
            _ => Err(StorageError::new(InternalError::Internal(
                "Unsupported action for a logical volume",
            ))),
        }
    }
}
