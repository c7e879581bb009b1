use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use osutils::dependencies::{Command, Dependency};
use sysdefs::filesystems::FilesystemType;

use crate::{
    actiongraph::{
        action::{Action, ActionKind, Modification, Side},
        commit::CommitContext,
        ActionGraph,
    },
    devicegraph::{DeviceRef, Devicegraph},
    error::{InternalError, InvalidInputError, NotFoundError, StorageError},
    holders::HolderKind,
    sid::Sid,
    size::to_human_readable,
};

use super::{tense, DeviceKind, DeviceOps};

/// Mount point used for swap space. Swap is activated instead of mounted.
pub const SWAP_MOUNT_POINT: &str = "swap";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Filesystem {
    pub fs_type: FilesystemType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_points: Vec<String>,
}

impl Filesystem {
    pub fn new(fs_type: FilesystemType) -> Self {
        Self {
            fs_type,
            label: String::new(),
            uuid: None,
            mount_points: Vec::new(),
        }
    }

    /// Creates a filesystem on the block device `blk`. Filesystems that allow
    /// choosing a UUID get a random one.
    pub fn create_on(
        graph: &mut Devicegraph,
        blk: Sid,
        fs_type: FilesystemType,
    ) -> Result<Sid, StorageError> {
        if !graph.find_device(blk)?.kind().is_blk_device() {
            return Err(StorageError::new(NotFoundError::WrongDeviceType {
                sid: blk,
                expected: "BlkDevice",
            }));
        }

        let mut fs = Self::new(fs_type);
        if fs_type.supports_uuid() {
            fs.uuid = Some(Uuid::new_v4());
        }
        let fs = graph.create_device(DeviceKind::Filesystem(fs));
        graph.add_holder(blk, fs, HolderKind::User)?;
        Ok(fs)
    }

    /// Sets the label after checking it against what the filesystem type
    /// can store.
    pub fn set_label(&mut self, label: impl Into<String>) -> Result<(), StorageError> {
        let label = label.into();
        let invalid = |reason: String| {
            StorageError::new(InvalidInputError::InvalidLabel {
                label: label.clone(),
                fs_type: self.fs_type.to_string(),
                reason,
            })
        };

        if !self.fs_type.supports_label() {
            return Err(invalid("labels are not supported".into()));
        }
        if label.len() > self.fs_type.max_label_len() {
            return Err(invalid(format!(
                "longer than {} bytes",
                self.fs_type.max_label_len()
            )));
        }
        if label.contains('/') {
            return Err(invalid("contains '/'".into()));
        }

        self.label = label;
        Ok(())
    }

    /// Adds a mount point unless the filesystem is already mounted there.
    pub fn add_mount_point(&mut self, mount_point: impl Into<String>) {
        let mount_point = mount_point.into();
        if !self.mount_points.contains(&mount_point) {
            self.mount_points.push(mount_point);
        }
    }

    pub fn remove_mount_point(&mut self, mount_point: &str) {
        self.mount_points.retain(|mp| mp != mount_point);
    }

    /// Mount points in the order the action graph mounts them in.
    fn sorted_mount_points(&self) -> Vec<String> {
        let mut mount_points = self.mount_points.clone();
        mount_points.sort();
        mount_points
    }

    fn blk_device(dev: DeviceRef<'_>) -> Result<DeviceRef<'_>, StorageError> {
        dev.parent_where("BlkDevice", |kind| kind.is_blk_device())
    }

    fn is_swap_mount(&self, mount_point: &str) -> bool {
        self.fs_type.is_swap() || mount_point == SWAP_MOUNT_POINT
    }

    fn mkfs_command(&self, blk: &str) -> Command {
        let mut cmd = if self.fs_type.is_swap() {
            Dependency::Mkswap.cmd()
        } else {
            Dependency::Mkfs.cmd().with_args(["--type", self.fs_type.name()])
        };
        if !self.label.is_empty() {
            cmd.args([self.fs_type.mkfs_label_flag(), self.label.as_str()]);
        }
        if let Some(args) = self
            .uuid
            .and_then(|uuid| self.fs_type.mkfs_uuid_args(&uuid.to_string()))
        {
            cmd.args(args);
        }
        cmd.with_arg(blk)
    }

    fn set_label_command(&self, blk: &str) -> Command {
        let label = self.label.as_str();
        match self.fs_type {
            FilesystemType::Ext2 | FilesystemType::Ext3 | FilesystemType::Ext4 => {
                Dependency::Tune2fs.cmd().with_args(["-L", label, blk])
            }
            FilesystemType::Xfs => Dependency::XfsAdmin.cmd().with_args(["-L", label, blk]),
            FilesystemType::Btrfs => Dependency::Btrfs
                .cmd()
                .with_args(["filesystem", "label", blk, label]),
            FilesystemType::Vfat => Dependency::Fatlabel.cmd().with_args([blk, label]),
            FilesystemType::Swap => Dependency::Swaplabel
                .cmd()
                .with_args(["--label", label, blk]),
        }
    }
}

impl DeviceOps for Filesystem {
    fn classname(&self) -> &'static str {
        "Filesystem"
    }

    fn displayname(&self, dev: DeviceRef<'_>) -> Result<String, StorageError> {
        Ok(format!(
            "{} on {}",
            self.fs_type,
            Self::blk_device(dev)?.block_device_name()?
        ))
    }

    fn add_create_actions(
        &self,
        dev: DeviceRef<'_>,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        let mut actions = vec![ActionKind::Create];
        actions.extend(self.sorted_mount_points().into_iter().map(ActionKind::Mount));
        ag.add_chain(dev.sid(), Side::Rhs, actions);
        Ok(())
    }

    fn add_modify_actions(
        &self,
        dev: DeviceRef<'_>,
        lhs: DeviceRef<'_>,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        let lhs = lhs.device().to_filesystem()?;

        let unmounts: Vec<_> = lhs
            .mount_points
            .iter()
            .filter(|mp| !self.mount_points.contains(mp))
            .map(|mp| ActionKind::Modify(Modification::Umount(mp.clone())))
            .collect();
        ag.add_chain(dev.sid(), Side::Lhs, unmounts);

        if self.label != lhs.label {
            ag.add_chain(
                dev.sid(),
                Side::Rhs,
                [ActionKind::Modify(Modification::SetLabel)],
            );
        }

        let mounts: Vec<_> = self
            .sorted_mount_points()
            .into_iter()
            .filter(|mp| !lhs.mount_points.contains(mp))
            .map(ActionKind::Mount)
            .collect();
        ag.add_chain(dev.sid(), Side::Rhs, mounts);
        Ok(())
    }

    fn add_delete_actions(
        &self,
        dev: DeviceRef<'_>,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        let mut actions: Vec<_> = self
            .mount_points
            .iter()
            .map(|mp| ActionKind::Modify(Modification::Umount(mp.clone())))
            .collect();
        actions.push(ActionKind::Delete);
        ag.add_chain(dev.sid(), Side::Lhs, actions);
        Ok(())
    }

    /// A new filesystem is created only after the filesystems it replaces on
    /// the same block device are gone.
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
        for blk in dev.parents() {
            let Ok(lhs_blk) = lhs.device(blk.sid()) else {
                continue;
            };
            for old in lhs_blk.children() {
                if !ag.rhs().device_exists(old.sid()) {
                    if let Some(last) = ag.last_action(old.sid()) {
                        ag.add_dependency(last, vertex);
                    }
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
        let blk = Self::blk_device(dev)?;
        let name = blk.block_device_name()?;
        let size = blk
            .size_k()
            .map(|size_k| format!(" ({})", to_human_readable(size_k)))
            .unwrap_or_default();

        Ok(match &action.kind {
            ActionKind::Create => format!(
                "{} {} on {name}{size}",
                tense(doing, "Create", "Creating"),
                self.fs_type
            ),
            ActionKind::Delete => format!(
                "{} {} on {name}{size}",
                tense(doing, "Delete", "Deleting"),
                self.fs_type
            ),
            ActionKind::Modify(Modification::SetLabel) => format!(
                "{} label of {} on {name} to {}",
                tense(doing, "Set", "Setting"),
                self.fs_type,
                self.label
            ),
            ActionKind::Mount(mp) if self.is_swap_mount(mp) => format!(
                "{} swap on {name}",
                tense(doing, "Activate", "Activating")
            ),
            ActionKind::Mount(mp) => format!(
                "{} {} on {name} at {mp}",
                tense(doing, "Mount", "Mounting"),
                self.fs_type
            ),
            ActionKind::Modify(Modification::Umount(mp)) if self.is_swap_mount(mp) => format!(
                "{} swap on {name}",
                tense(doing, "Deactivate", "Deactivating")
            ),
            ActionKind::Modify(Modification::Umount(mp)) => format!(
                "{} {} on {name} at {mp}",
                tense(doing, "Unmount", "Unmounting"),
                self.fs_type
            ),
            _ => format!(
                "{} {} on {name}",
                tense(doing, "Keep", "Keeping"),
                self.fs_type
            ),
        })
    }

    fn commit(
        &self,
        dev: DeviceRef<'_>,
        action: &Action,
        ctx: &mut CommitContext<'_>,
    ) -> Result<(), StorageError> {
        let blk = Self::blk_device(dev)?.block_device_name()?;
        let blk = blk.as_str();

        match &action.kind {
            ActionKind::Create => ctx.run(self.mkfs_command(blk)),
            ActionKind::Delete => ctx.run(Dependency::Wipefs.cmd().with_args(["--all", blk])),
            ActionKind::Modify(Modification::SetLabel) => ctx.run(self.set_label_command(blk)),
            ActionKind::Mount(mp) if self.is_swap_mount(mp) => {
                ctx.run(Dependency::Swapon.cmd().with_arg(blk))
            }
            ActionKind::Mount(mp) => {
                let target = ctx.environment().target_path(mp);
                ctx.run(
                    Dependency::Mkdir
                        .cmd()
                        .with_arg("--parents")
                        .with_arg(&target),
                )?;
                ctx.run(
                    Dependency::Mount
                        .cmd()
                        .with_args(["--types", self.fs_type.name(), blk])
                        .with_arg(&target),
                )
            }
            ActionKind::Modify(Modification::Umount(mp)) if self.is_swap_mount(mp) => {
                ctx.run(Dependency::Swapoff.cmd().with_arg(blk))
            }
            ActionKind::Modify(Modification::Umount(mp)) => {
                let target = ctx.environment().target_path(mp);
                ctx.run(Dependency::Umount.cmd().with_arg(&target))
            }
            _ => Err(StorageError::new(InternalError::Internal(
                "Unsupported action for a filesystem",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use osutils::testutils::RecordingRunner;
    use sysdefs::partition_tables::PtType;

    use crate::{
        devices::{Disk, PartitionTable, Region},
        environment::{Environment, TargetMode},
        error::ErrorKind,
    };

    use super::*;

    fn graph_with_filesystem(fs_type: FilesystemType) -> (Devicegraph, Sid) {
        let mut graph = Devicegraph::new();
        let disk = Disk::create(&mut graph, "/dev/sda", 16 * 1024 * 1024);
        let pt = Disk::create_partition_table(&mut graph, disk, PtType::Gpt).unwrap();
        let sda1 = PartitionTable::create_partition(
            &mut graph,
            pt,
            "/dev/sda1",
            Region::new(2048, 4 * 1024 * 1024),
        )
        .unwrap();
        let fs = Filesystem::create_on(&mut graph, sda1, fs_type).unwrap();
        (graph, fs)
    }

    #[test]
    fn test_create_on() {
        let (graph, sid) = graph_with_filesystem(FilesystemType::Ext4);
        let fs = graph.find_device(sid).unwrap().to_filesystem().unwrap();
        assert!(fs.uuid.is_some());

        let (graph, sid) = graph_with_filesystem(FilesystemType::Vfat);
        let fs = graph.find_device(sid).unwrap().to_filesystem().unwrap();
        assert!(fs.uuid.is_none());

        let mut graph = graph;
        let err = Filesystem::create_on(&mut graph, sid, FilesystemType::Xfs).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::NotFound(NotFoundError::WrongDeviceType { .. })
        ));
    }

    #[test]
    fn test_set_label() {
        let mut fs = Filesystem::new(FilesystemType::Vfat);
        fs.set_label("EFI").unwrap();
        assert_eq!(fs.label, "EFI");

        let err = fs.set_label("MUCH-TOO-LONG").unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidInput(InvalidInputError::InvalidLabel { .. })
        ));
        assert_eq!(fs.label, "EFI");

        let mut fs = Filesystem::new(FilesystemType::Ext4);
        assert!(fs.set_label("a/b").is_err());
        fs.set_label("MUCH-TOO-LONG").unwrap();
    }

    #[test]
    fn test_mount_points() {
        let mut fs = Filesystem::new(FilesystemType::Ext4);
        fs.add_mount_point("/home");
        fs.add_mount_point("/home");
        fs.add_mount_point("/srv");
        assert_eq!(fs.mount_points, ["/home", "/srv"]);
        fs.remove_mount_point("/home");
        assert_eq!(fs.mount_points, ["/srv"]);
    }

    #[test]
    fn test_text() {
        let (graph, sid) = graph_with_filesystem(FilesystemType::Ext4);
        let dev = graph.device(sid).unwrap();
        let fs = dev.device().to_filesystem().unwrap();

        let create = Action::new(sid, Side::Rhs, ActionKind::Create);
        assert_eq!(
            fs.text(dev, &create, false).unwrap(),
            "Create ext4 on /dev/sda1 (2.00 GiB)"
        );
        let mount = Action::new(sid, Side::Rhs, ActionKind::Mount("/home".into()));
        assert_eq!(
            fs.text(dev, &mount, true).unwrap(),
            "Mounting ext4 on /dev/sda1 at /home"
        );
        let umount = Action::new(
            sid,
            Side::Lhs,
            ActionKind::Modify(Modification::Umount("/home".into())),
        );
        assert_eq!(
            fs.text(dev, &umount, false).unwrap(),
            "Unmount ext4 on /dev/sda1 at /home"
        );
        assert_eq!(fs.displayname(dev).unwrap(), "ext4 on /dev/sda1");
    }

    #[test]
    fn test_commit() {
        let (mut graph, sid) = graph_with_filesystem(FilesystemType::Xfs);
        {
            let fs = graph
                .find_device_mut(sid)
                .unwrap()
                .to_filesystem_mut()
                .unwrap();
            fs.uuid = Some(Uuid::nil());
            fs.set_label("DATA").unwrap();
        }
        let dev = graph.device(sid).unwrap();
        let fs = dev.device().to_filesystem().unwrap();

        let environment = Environment {
            target_mode: TargetMode::Chroot,
            rootprefix: PathBuf::from("/mnt/target"),
            ..Default::default()
        };
        let mut runner = RecordingRunner::new();
        let mut ctx = CommitContext::new(&mut runner, &environment);
        for kind in [
            ActionKind::Create,
            ActionKind::Modify(Modification::SetLabel),
            ActionKind::Mount("/srv/data".into()),
            ActionKind::Modify(Modification::Umount("/srv/data".into())),
            ActionKind::Delete,
        ] {
            fs.commit(dev, &Action::new(sid, Side::Rhs, kind), &mut ctx)
                .unwrap();
        }

        assert_eq!(
            runner.commands(),
            [
                "mkfs --type xfs -L DATA -m uuid=00000000-0000-0000-0000-000000000000 /dev/sda1",
                "xfs_admin -L DATA /dev/sda1",
                "mkdir --parents /mnt/target/srv/data",
                "mount --types xfs /dev/sda1 /mnt/target/srv/data",
                "umount /mnt/target/srv/data",
                "wipefs --all /dev/sda1",
            ]
        );
    }

    #[test]
    fn test_commit_swap() {
        let (mut graph, sid) = graph_with_filesystem(FilesystemType::Swap);
        graph
            .find_device_mut(sid)
            .unwrap()
            .to_filesystem_mut()
            .unwrap()
            .uuid = None;
        let dev = graph.device(sid).unwrap();
        let fs = dev.device().to_filesystem().unwrap();

        let mount = Action::new(sid, Side::Rhs, ActionKind::Mount(SWAP_MOUNT_POINT.into()));
        assert_eq!(
            fs.text(dev, &mount, false).unwrap(),
            "Activate swap on /dev/sda1"
        );

        let environment = Environment::default();
        let mut runner = RecordingRunner::new();
        let mut ctx = CommitContext::new(&mut runner, &environment);
        fs.commit(dev, &Action::new(sid, Side::Rhs, ActionKind::Create), &mut ctx)
            .unwrap();
        fs.commit(dev, &mount, &mut ctx).unwrap();
        fs.commit(
            dev,
            &Action::new(
                sid,
                Side::Lhs,
                ActionKind::Modify(Modification::Umount(SWAP_MOUNT_POINT.into())),
            ),
            &mut ctx,
        )
        .unwrap();

        assert_eq!(
            runner.commands(),
            ["mkswap /dev/sda1", "swapon /dev/sda1", "swapoff /dev/sda1"]
        );
    }
}
