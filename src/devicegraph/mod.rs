use std::collections::{BTreeMap, BTreeSet};

use log::trace;
use petgraph::{
    algo::toposort,
    stable_graph::{NodeIndex, StableGraph},
    visit::{Dfs, EdgeRef, IntoEdgeReferences, Reversed, Walker},
    Direction,
};

use crate::{
    devices::{Device, DeviceKind},
    error::{
        ConsistencyError, InternalError, NotFoundError, ReportError, StorageError,
        StorageResultExt,
    },
    holders::{Holder, HolderKind},
    sid::Sid,
};

mod display;
mod persistence;

/// A storage configuration: devices as vertices, holders as edges.
///
/// Besides the petgraph storage the graph keeps an index from sid to vertex
/// so that devices can be looked up by their stable identity.
#[derive(Debug, Clone, Default)]
pub struct Devicegraph {
    graph: StableGraph<Device, Holder>,
    index: BTreeMap<Sid, NodeIndex>,
}

/// Borrowed handle on a device inside a devicegraph.
#[derive(Debug, Clone, Copy)]
pub struct DeviceRef<'a> {
    graph: &'a Devicegraph,
    index: NodeIndex,
}

impl Devicegraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a device, keeping its sid.
    pub fn add_device(&mut self, device: Device) -> Result<Sid, StorageError> {
        let sid = device.sid();
        if self.index.contains_key(&sid) {
            return Err(StorageError::new(ConsistencyError::DuplicateSid(sid)));
        }

        let index = self.graph.add_node(device);
        self.index.insert(sid, index);
        Ok(sid)
    }

    /// Creates a device of the given kind with a new sid and inserts it.
    pub(crate) fn create_device(&mut self, kind: DeviceKind) -> Sid {
        let device = Device::new(kind);
        let sid = device.sid();
        let index = self.graph.add_node(device);
        self.index.insert(sid, index);
        sid
    }

    /// Removes a device and all holders from or to it.
    pub fn remove_device(&mut self, sid: Sid) -> Result<Device, StorageError> {
        let index = self
            .index
            .remove(&sid)
            .structured(NotFoundError::DeviceNotFound { sid })?;
        self.graph
            .remove_node(index)
            .structured(InternalError::Internal("Indexed device missing from graph"))
    }

    pub fn device_exists(&self, sid: Sid) -> bool {
        self.index.contains_key(&sid)
    }

    pub(crate) fn node_index(&self, sid: Sid) -> Result<NodeIndex, StorageError> {
        self.index
            .get(&sid)
            .copied()
            .structured(NotFoundError::DeviceNotFound { sid })
    }

    pub fn find_device(&self, sid: Sid) -> Result<&Device, StorageError> {
        Ok(&self.graph[self.node_index(sid)?])
    }

    pub fn find_device_mut(&mut self, sid: Sid) -> Result<&mut Device, StorageError> {
        let index = self.node_index(sid)?;
        Ok(&mut self.graph[index])
    }

    /// Returns a handle on the device with the given sid.
    pub fn device(&self, sid: Sid) -> Result<DeviceRef<'_>, StorageError> {
        Ok(DeviceRef {
            graph: self,
            index: self.node_index(sid)?,
        })
    }

    /// Finds a block device by its kernel name, e.g. "/dev/sda1" or
    /// "/dev/system/root".
    pub fn find_device_by_name(&self, name: &str) -> Result<DeviceRef<'_>, StorageError> {
        for dev in self.devices() {
            if dev.kind().is_blk_device() && dev.block_device_name()? == name {
                return Ok(dev);
            }
        }
        Err(StorageError::new(NotFoundError::DeviceNameNotFound {
            name: name.to_string(),
        }))
    }

    /// Iterates over all devices ordered by sid.
    pub fn devices(&self) -> impl Iterator<Item = DeviceRef<'_>> {
        self.index.values().map(move |index| DeviceRef {
            graph: self,
            index: *index,
        })
    }

    pub fn device_sids(&self) -> BTreeSet<Sid> {
        self.index.keys().copied().collect()
    }

    pub fn add_holder(
        &mut self,
        source: Sid,
        target: Sid,
        kind: HolderKind,
    ) -> Result<(), StorageError> {
        if source == target {
            return Err(StorageError::new(ConsistencyError::SelfLoop(source)));
        }

        let source_index = self.node_index(source)?;
        let target_index = self.node_index(target)?;
        if self.graph.contains_edge(source_index, target_index) {
            return Err(StorageError::new(ConsistencyError::DuplicateHolder {
                source_sid: source,
                target_sid: target,
            }));
        }

        trace!("Adding {kind} holder from sid {source} to sid {target}");
        self.graph
            .add_edge(source_index, target_index, Holder::new(kind));
        Ok(())
    }

    pub fn find_holder(&self, source: Sid, target: Sid) -> Result<&Holder, StorageError> {
        let not_found = || NotFoundError::HolderNotFound {
            source_sid: source,
            target_sid: target,
        };
        let source_index = self.node_index(source).map_err(|_| StorageError::new(not_found()))?;
        let target_index = self.node_index(target).map_err(|_| StorageError::new(not_found()))?;
        self.graph
            .find_edge(source_index, target_index)
            .and_then(|edge| self.graph.edge_weight(edge))
            .structured(not_found())
    }

    pub fn remove_holder(&mut self, source: Sid, target: Sid) -> Result<Holder, StorageError> {
        let not_found = || NotFoundError::HolderNotFound {
            source_sid: source,
            target_sid: target,
        };
        let edge = self
            .graph
            .find_edge(self.node_index(source)?, self.node_index(target)?)
            .structured(not_found())?;
        self.graph.remove_edge(edge).structured(not_found())
    }

    /// Returns all holders keyed by their (source, target) sid pair.
    pub fn holders(&self) -> BTreeMap<(Sid, Sid), Holder> {
        self.graph
            .edge_references()
            .map(|edge| {
                (
                    (self.graph[edge.source()].sid(), self.graph[edge.target()].sid()),
                    *edge.weight(),
                )
            })
            .collect()
    }

    pub fn num_devices(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_holders(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.index.clear();
    }

    /// Replaces the content of `dest` with a deep copy of this devicegraph.
    /// All sids are kept.
    pub fn copy(&self, dest: &mut Devicegraph) {
        dest.graph = StableGraph::with_capacity(self.num_devices(), self.num_holders());
        dest.index.clear();

        let mut mapping = BTreeMap::new();
        for (sid, index) in &self.index {
            let new_index = dest.graph.add_node(self.graph[*index].clone());
            dest.index.insert(*sid, new_index);
            mapping.insert(*index, new_index);
        }
        for edge in self.graph.edge_references() {
            dest.graph.add_edge(
                mapping[&edge.source()],
                mapping[&edge.target()],
                *edge.weight(),
            );
        }
    }

    /// Validates the structural invariants of the devicegraph.
    pub fn check(&self) -> Result<(), StorageError> {
        let mut seen = BTreeSet::new();
        for index in self.graph.node_indices() {
            let sid = self.graph[index].sid();
            if !seen.insert(sid) {
                return Err(StorageError::new(ConsistencyError::DuplicateSid(sid)));
            }
            if self.index.get(&sid) != Some(&index) {
                return Err(StorageError::new(ConsistencyError::IndexMismatch { sid }));
            }
        }
        if let Some(sid) = self.index.keys().find(|sid| !seen.contains(sid)) {
            return Err(StorageError::new(ConsistencyError::IndexMismatch {
                sid: *sid,
            }));
        }

        let mut pairs = BTreeSet::new();
        for edge in self.graph.edge_references() {
            let source_sid = self.graph[edge.source()].sid();
            let target_sid = self.graph[edge.target()].sid();
            if source_sid == target_sid {
                return Err(StorageError::new(ConsistencyError::SelfLoop(source_sid)));
            }
            if !pairs.insert((source_sid, target_sid)) {
                return Err(StorageError::new(ConsistencyError::DuplicateHolder {
                    source_sid,
                    target_sid,
                }));
            }
        }

        toposort(&self.graph, None).map_err(|cycle| {
            StorageError::new(ConsistencyError::Cycle {
                sid: self.graph[cycle.node_id()].sid(),
            })
        })?;

        Ok(())
    }

    pub fn parents(&self, sid: Sid) -> Result<Vec<DeviceRef<'_>>, StorageError> {
        Ok(self.device(sid)?.parents())
    }

    pub fn children(&self, sid: Sid) -> Result<Vec<DeviceRef<'_>>, StorageError> {
        Ok(self.device(sid)?.children())
    }

    pub fn siblings(&self, sid: Sid, itself: bool) -> Result<Vec<DeviceRef<'_>>, StorageError> {
        Ok(self.device(sid)?.siblings(itself))
    }

    pub fn ancestors(&self, sid: Sid, itself: bool) -> Result<Vec<DeviceRef<'_>>, StorageError> {
        Ok(self.device(sid)?.ancestors(itself))
    }

    pub fn descendants(
        &self,
        sid: Sid,
        itself: bool,
    ) -> Result<Vec<DeviceRef<'_>>, StorageError> {
        Ok(self.device(sid)?.descendants(itself))
    }

    pub fn roots(&self, sid: Sid, itself: bool) -> Result<Vec<DeviceRef<'_>>, StorageError> {
        Ok(self.device(sid)?.roots(itself))
    }

    pub fn leafs(&self, sid: Sid, itself: bool) -> Result<Vec<DeviceRef<'_>>, StorageError> {
        Ok(self.device(sid)?.leafs(itself))
    }

    fn handles(&self, indices: impl IntoIterator<Item = NodeIndex>) -> Vec<DeviceRef<'_>> {
        let mut devices: Vec<_> = indices
            .into_iter()
            .map(|index| DeviceRef { graph: self, index })
            .collect();
        devices.sort_by_key(|dev| dev.sid());
        devices.dedup_by_key(|dev| dev.sid());
        devices
    }
}

impl PartialEq for Devicegraph {
    fn eq(&self, other: &Self) -> bool {
        self.num_devices() == other.num_devices()
            && self.num_holders() == other.num_holders()
            && self.index.keys().all(|sid| {
                matches!(
                    (self.find_device(*sid), other.find_device(*sid)),
                    (Ok(a), Ok(b)) if a == b
                )
            })
            && self.holders() == other.holders()
    }
}

impl Eq for Devicegraph {}

impl<'a> DeviceRef<'a> {
    pub fn graph(&self) -> &'a Devicegraph {
        self.graph
    }

    pub fn device(&self) -> &'a Device {
        &self.graph.graph[self.index]
    }

    pub fn sid(&self) -> Sid {
        self.device().sid()
    }

    pub fn kind(&self) -> &'a DeviceKind {
        self.device().kind()
    }

    pub fn classname(&self) -> &'static str {
        self.kind().ops().classname()
    }

    pub fn displayname(&self) -> Result<String, StorageError> {
        self.kind().ops().displayname(*self)
    }

    fn neighbors(&self, direction: Direction) -> Vec<DeviceRef<'a>> {
        self.graph
            .handles(self.graph.graph.neighbors_directed(self.index, direction))
    }

    /// Devices holding this one.
    pub fn parents(&self) -> Vec<DeviceRef<'a>> {
        self.neighbors(Direction::Incoming)
    }

    /// Devices held by this one.
    pub fn children(&self) -> Vec<DeviceRef<'a>> {
        self.neighbors(Direction::Outgoing)
    }

    /// Devices sharing a parent with this one.
    pub fn siblings(&self, itself: bool) -> Vec<DeviceRef<'a>> {
        let own = self.sid();
        let mut siblings = self.graph.handles(
            self.parents()
                .into_iter()
                .flat_map(|parent| parent.children())
                .map(|dev| dev.index),
        );
        if !itself {
            siblings.retain(|dev| dev.sid() != own);
        }
        siblings
    }

    pub fn ancestors(&self, itself: bool) -> Vec<DeviceRef<'a>> {
        let reversed = Reversed(&self.graph.graph);
        let own = self.index;
        self.graph.handles(
            Dfs::new(reversed, self.index)
                .iter(reversed)
                .filter(|index| itself || *index != own),
        )
    }

    pub fn descendants(&self, itself: bool) -> Vec<DeviceRef<'a>> {
        let own = self.index;
        self.graph.handles(
            Dfs::new(&self.graph.graph, self.index)
                .iter(&self.graph.graph)
                .filter(|index| itself || *index != own),
        )
    }

    /// Ancestors without parents. A root itself is only included when
    /// `itself` is set.
    pub fn roots(&self, itself: bool) -> Vec<DeviceRef<'a>> {
        self.ancestors(itself)
            .into_iter()
            .filter(|dev| dev.parents().is_empty())
            .collect()
    }

    /// Descendants without children. A leaf itself is only included when
    /// `itself` is set.
    pub fn leafs(&self, itself: bool) -> Vec<DeviceRef<'a>> {
        self.descendants(itself)
            .into_iter()
            .filter(|dev| dev.children().is_empty())
            .collect()
    }

    /// Returns the first parent of the given kind.
    pub(crate) fn parent_where(
        &self,
        expected: &'static str,
        predicate: impl Fn(&DeviceKind) -> bool,
    ) -> Result<DeviceRef<'a>, StorageError> {
        self.parents()
            .into_iter()
            .find(|parent| predicate(parent.kind()))
            .structured(NotFoundError::WrongDeviceType {
                sid: self.sid(),
                expected,
            })
            .message(format!("Device with sid {} has no {expected} parent", self.sid()))
    }

    /// Returns the kernel name of a block device.
    pub fn block_device_name(&self) -> Result<String, StorageError> {
        match self.kind() {
            DeviceKind::Disk(disk) => Ok(disk.name.clone()),
            DeviceKind::Partition(partition) => Ok(partition.name.clone()),
            DeviceKind::LvmLv(lv) => {
                let vg = self.parent_where("LvmVg", |kind| kind.as_lvm_vg().is_some())?;
                Ok(lv.path(&vg.device().to_lvm_vg()?.vg_name))
            }
            _ => Err(StorageError::new(NotFoundError::WrongDeviceType {
                sid: self.sid(),
                expected: "BlkDevice",
            })),
        }
    }

    /// Size of a block device in KiB.
    pub fn size_k(&self) -> Option<u64> {
        match self.kind() {
            DeviceKind::Disk(disk) => Some(disk.size_k),
            DeviceKind::Partition(partition) => Some(partition.region.size_k()),
            DeviceKind::LvmLv(lv) => Some(lv.size_k),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use sysdefs::{filesystems::FilesystemType, partition_tables::PtType};

    use crate::{
        devices::{Disk, Filesystem, LvmVg, PartitionTable, Region},
        error::ErrorKind,
    };

    use super::*;

    const GIB: u64 = 1024 * 1024;

    /// Disk with a GPT, two partitions, a volume group over both and one
    /// logical volume carrying an ext4 filesystem.
    fn sample() -> (Devicegraph, BTreeMap<&'static str, Sid>) {
        let mut graph = Devicegraph::new();
        let disk = Disk::create(&mut graph, "/dev/sda", 80 * GIB);
        let gpt = Disk::create_partition_table(&mut graph, disk, PtType::Gpt).unwrap();
        let sda1 = PartitionTable::create_partition(
            &mut graph,
            gpt,
            "/dev/sda1",
            Region::new(2048, 2 * GIB * 2),
        )
        .unwrap();
        let sda2 = PartitionTable::create_partition(
            &mut graph,
            gpt,
            "/dev/sda2",
            Region::new(2048 + 2 * GIB * 2, 2 * GIB * 2),
        )
        .unwrap();
        let vg = LvmVg::create(&mut graph, "system");
        LvmVg::add_lvm_pv(&mut graph, vg, sda1).unwrap();
        LvmVg::add_lvm_pv(&mut graph, vg, sda2).unwrap();
        let lv = LvmVg::create_lvm_lv(&mut graph, vg, "root", 3 * GIB).unwrap();
        let fs = Filesystem::create_on(&mut graph, lv, FilesystemType::Ext4).unwrap();

        let sids = maplit::btreemap! {
            "disk" => disk,
            "gpt" => gpt,
            "sda1" => sda1,
            "sda2" => sda2,
            "vg" => vg,
            "lv" => lv,
            "fs" => fs,
        };
        (graph, sids)
    }

    fn sids(devices: Vec<DeviceRef<'_>>) -> Vec<Sid> {
        devices.into_iter().map(|dev| dev.sid()).collect()
    }

    #[test]
    fn test_find_device() {
        let (graph, s) = sample();
        assert_eq!(graph.num_devices(), 7);
        assert_eq!(graph.num_holders(), 7);
        assert!(graph.device_exists(s["disk"]));
        assert_eq!(
            graph.find_device(s["disk"]).unwrap().to_disk().unwrap().name,
            "/dev/sda"
        );

        let missing = Sid::allocate();
        let err = graph.find_device(missing).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::NotFound(NotFoundError::DeviceNotFound { sid: missing })
        );
        assert!(!graph.device_exists(missing));
    }

    #[test]
    fn test_find_device_by_name() {
        let (graph, s) = sample();
        assert_eq!(graph.find_device_by_name("/dev/sda2").unwrap().sid(), s["sda2"]);
        assert_eq!(
            graph.find_device_by_name("/dev/system/root").unwrap().sid(),
            s["lv"]
        );
        assert!(matches!(
            graph.find_device_by_name("/dev/sdz").unwrap_err().kind(),
            ErrorKind::NotFound(NotFoundError::DeviceNameNotFound { .. })
        ));
    }

    #[test]
    fn test_holders() {
        let (mut graph, s) = sample();
        assert_eq!(
            graph.find_holder(s["gpt"], s["sda1"]).unwrap().kind,
            HolderKind::Subdevice
        );
        assert_eq!(
            graph.find_holder(s["sda1"], s["vg"]).unwrap().kind,
            HolderKind::User
        );
        assert!(matches!(
            graph.find_holder(s["sda1"], s["gpt"]).unwrap_err().kind(),
            ErrorKind::NotFound(NotFoundError::HolderNotFound { .. })
        ));

        assert!(matches!(
            graph
                .add_holder(s["sda1"], s["vg"], HolderKind::User)
                .unwrap_err()
                .kind(),
            ErrorKind::Consistency(ConsistencyError::DuplicateHolder { .. })
        ));
        assert!(matches!(
            graph
                .add_holder(s["vg"], s["vg"], HolderKind::User)
                .unwrap_err()
                .kind(),
            ErrorKind::Consistency(ConsistencyError::SelfLoop(_))
        ));

        graph.remove_holder(s["sda2"], s["vg"]).unwrap();
        assert_eq!(graph.num_holders(), 6);
        assert!(graph.remove_holder(s["sda2"], s["vg"]).is_err());
    }

    #[test]
    fn test_structural_queries() {
        let (graph, s) = sample();

        assert_eq!(sids(graph.parents(s["vg"]).unwrap()), vec![s["sda1"], s["sda2"]]);
        assert_eq!(sids(graph.children(s["gpt"]).unwrap()), vec![s["sda1"], s["sda2"]]);
        assert_eq!(sids(graph.siblings(s["sda1"], false).unwrap()), vec![s["sda2"]]);
        assert_eq!(
            sids(graph.siblings(s["sda1"], true).unwrap()),
            vec![s["sda1"], s["sda2"]]
        );
        assert_eq!(
            sids(graph.ancestors(s["vg"], false).unwrap()),
            vec![s["disk"], s["gpt"], s["sda1"], s["sda2"]]
        );
        assert_eq!(
            sids(graph.descendants(s["sda1"], true).unwrap()),
            vec![s["sda1"], s["vg"], s["lv"], s["fs"]]
        );
        assert_eq!(sids(graph.roots(s["fs"], false).unwrap()), vec![s["disk"]]);
        assert!(graph.roots(s["disk"], false).unwrap().is_empty());
        assert_eq!(sids(graph.roots(s["disk"], true).unwrap()), vec![s["disk"]]);
        assert_eq!(sids(graph.leafs(s["disk"], false).unwrap()), vec![s["fs"]]);
        assert_eq!(sids(graph.leafs(s["fs"], true).unwrap()), vec![s["fs"]]);
    }

    #[test]
    fn test_remove_device() {
        let (mut graph, s) = sample();
        let removed = graph.remove_device(s["vg"]).unwrap();
        assert_eq!(removed.sid(), s["vg"]);
        assert_eq!(graph.num_devices(), 6);
        // Both physical volume holders and the logical volume holder are gone.
        assert_eq!(graph.num_holders(), 4);
        assert!(graph.parents(s["lv"]).unwrap().is_empty());
        graph.check().unwrap();

        assert!(matches!(
            graph.remove_device(s["vg"]).unwrap_err().kind(),
            ErrorKind::NotFound(NotFoundError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_copy_and_equality() {
        let (graph, s) = sample();

        let mut copy = Devicegraph::new();
        Disk::create(&mut copy, "/dev/sdb", GIB);
        graph.copy(&mut copy);
        assert_eq!(copy, graph);
        assert_eq!(copy.device_sids(), graph.device_sids());
        copy.check().unwrap();

        copy.find_device_mut(s["fs"])
            .unwrap()
            .to_filesystem_mut()
            .unwrap()
            .label = "ROOT".into();
        assert_ne!(copy, graph);

        let mut clone = graph.clone();
        assert_eq!(clone, graph);
        clone.remove_holder(s["sda2"], s["vg"]).unwrap();
        clone.add_holder(s["sda2"], s["lv"], HolderKind::User).unwrap();
        assert_ne!(clone, graph);

        let mut cleared = graph.clone();
        cleared.clear();
        assert!(cleared.is_empty());
        assert_eq!(cleared, Devicegraph::new());
    }

    #[test]
    fn test_check() {
        let (mut graph, s) = sample();
        graph.check().unwrap();

        graph.add_holder(s["fs"], s["disk"], HolderKind::User).unwrap();
        assert!(matches!(
            graph.check().unwrap_err().kind(),
            ErrorKind::Consistency(ConsistencyError::Cycle { .. })
        ));

        let mut graph = Devicegraph::new();
        let device = Device::new(DeviceKind::Disk(Disk::new("/dev/sda", GIB)));
        graph.add_device(device.clone()).unwrap();
        assert!(matches!(
            graph.add_device(device).unwrap_err().kind(),
            ErrorKind::Consistency(ConsistencyError::DuplicateSid(_))
        ));
    }

    #[test]
    fn test_block_device_name() {
        let (graph, s) = sample();
        assert_eq!(
            graph.device(s["lv"]).unwrap().block_device_name().unwrap(),
            "/dev/system/root"
        );
        assert_eq!(graph.device(s["lv"]).unwrap().size_k(), Some(3 * GIB));
        assert_eq!(graph.device(s["sda1"]).unwrap().size_k(), Some(2 * GIB));
        assert!(graph.device(s["vg"]).unwrap().block_device_name().is_err());
        assert_eq!(graph.device(s["fs"]).unwrap().size_k(), None);
    }
}
