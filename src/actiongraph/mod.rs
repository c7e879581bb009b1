use std::{
    cmp::Reverse,
    collections::{BTreeMap, BinaryHeap},
};

use log::{debug, error, trace};
use petgraph::{
    algo::tarjan_scc,
    graph::{Graph, NodeIndex},
    Direction,
};

use crate::{
    devicegraph::{DeviceRef, Devicegraph},
    devices::filesystem::SWAP_MOUNT_POINT,
    error::{SchedulingError, StorageError},
    sid::Sid,
};

use self::action::{Action, ActionKind, Side};

pub mod action;
pub mod commit;

const ROOT_MOUNT_POINT: &str = "/";

/// The plan turning the current devicegraph (`lhs`) into the target
/// devicegraph (`rhs`).
///
/// Vertices are actions, an edge from `a` to `b` means `a` has to be executed
/// before `b`. The action graph borrows both devicegraphs and can therefore
/// not outlive them.
#[derive(Debug)]
pub struct ActionGraph<'a> {
    lhs: &'a Devicegraph,
    rhs: &'a Devicegraph,
    graph: Graph<Action, ()>,
    /// Actions of every device in chain order.
    chains: BTreeMap<Sid, Vec<NodeIndex>>,
    /// Topological order of all actions.
    order: Vec<NodeIndex>,
    mount_root: Option<NodeIndex>,
}

impl<'a> ActionGraph<'a> {
    /// Computes and schedules all actions needed to get from `lhs` to `rhs`.
    #[tracing::instrument(name = "actiongraph_calculation", skip_all)]
    pub fn new(lhs: &'a Devicegraph, rhs: &'a Devicegraph) -> Result<Self, StorageError> {
        lhs.check()?;
        rhs.check()?;

        let mut ag = Self::empty(lhs, rhs);
        if lhs == rhs {
            debug!("Devicegraphs are equal, nothing to do");
            return Ok(ag);
        }

        ag.add_actions()?;
        debug!("Added {} actions", ag.graph.node_count());
        ag.add_dependencies()?;
        ag.add_mount_dependencies();
        debug!("Added {} dependencies", ag.graph.edge_count());
        ag.sort()?;
        Ok(ag)
    }

    /// An action graph without actions.
    pub fn empty(lhs: &'a Devicegraph, rhs: &'a Devicegraph) -> Self {
        Self {
            lhs,
            rhs,
            graph: Graph::new(),
            chains: BTreeMap::new(),
            order: Vec::new(),
            mount_root: None,
        }
    }

    pub fn lhs(&self) -> &'a Devicegraph {
        self.lhs
    }

    pub fn rhs(&self) -> &'a Devicegraph {
        self.rhs
    }

    pub fn num_actions(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_dependencies(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn action(&self, vertex: NodeIndex) -> &Action {
        &self.graph[vertex]
    }

    /// Iterates over all actions in insertion order.
    pub fn actions(&self) -> impl Iterator<Item = (NodeIndex, &Action)> {
        self.graph
            .node_indices()
            .map(move |index| (index, &self.graph[index]))
    }

    /// Actions of the device with the given sid, in chain order.
    pub fn chain(&self, sid: Sid) -> &[NodeIndex] {
        self.chains.get(&sid).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn first_action(&self, sid: Sid) -> Option<NodeIndex> {
        self.chain(sid).first().copied()
    }

    pub fn last_action(&self, sid: Sid) -> Option<NodeIndex> {
        self.chain(sid).last().copied()
    }

    /// Scheduled order of all actions.
    pub fn order(&self) -> &[NodeIndex] {
        &self.order
    }

    /// Position of an action in the scheduled order.
    pub fn position(&self, vertex: NodeIndex) -> Option<usize> {
        self.order.iter().position(|index| *index == vertex)
    }

    pub fn has_dependency(&self, from: NodeIndex, to: NodeIndex) -> bool {
        self.graph.contains_edge(from, to)
    }

    /// The action mounting the root filesystem, if there is one.
    pub fn mount_root_filesystem(&self) -> Option<&Action> {
        self.mount_root.map(|index| &self.graph[index])
    }

    /// Appends actions to the chain of the device with the given sid. A
    /// device contributing actions several times keeps a single chain.
    pub fn add_chain(
        &mut self,
        sid: Sid,
        side: Side,
        kinds: impl IntoIterator<Item = ActionKind>,
    ) {
        for kind in kinds {
            let index = self.graph.add_node(Action::new(sid, side, kind));
            let chain = self.chains.entry(sid).or_default();
            match chain.last() {
                Some(previous) => {
                    self.graph[*previous].last = false;
                    self.graph.add_edge(*previous, index, ());
                }
                None => self.graph[index].first = true,
            }
            self.graph[index].last = true;
            chain.push(index);
            trace!("Added action {}", self.graph[index]);
        }
    }

    /// Makes `to` wait for `from`. Invalidates the current order until
    /// [`ActionGraph::sort`] is called again.
    pub fn add_dependency(&mut self, from: NodeIndex, to: NodeIndex) {
        if from != to {
            trace!("Adding dependency {} -> {}", self.graph[from], self.graph[to]);
            self.graph.update_edge(from, to, ());
        }
    }

    /// Resolves the device an action works on.
    pub fn device(&self, action: &Action) -> Result<DeviceRef<'a>, StorageError> {
        match action.side {
            Side::Lhs => self.lhs.device(action.sid),
            Side::Rhs => self.rhs.device(action.sid),
        }
    }

    /// Describes the action at `vertex`, in progress form when `doing` is
    /// set.
    pub fn text(&self, vertex: NodeIndex, doing: bool) -> Result<String, StorageError> {
        let action = &self.graph[vertex];
        let dev = self.device(action)?;
        dev.kind().ops().text(dev, action, doing)
    }

    /// Texts of all scheduled actions with a side effect, in order.
    pub fn commit_steps(&self) -> Result<Vec<String>, StorageError> {
        self.order
            .iter()
            .filter(|index| !self.graph[**index].is_nop())
            .map(|index| self.text(*index, true))
            .collect()
    }

    fn add_actions(&mut self) -> Result<(), StorageError> {
        let (lhs, rhs) = (self.lhs, self.rhs);
        let lhs_sids = lhs.device_sids();
        let rhs_sids = rhs.device_sids();

        for sid in rhs_sids.difference(&lhs_sids) {
            let dev = rhs.device(*sid)?;
            dev.kind().ops().add_create_actions(dev, self)?;
        }

        for sid in lhs_sids.intersection(&rhs_sids) {
            let dev = rhs.device(*sid)?;
            dev.kind()
                .ops()
                .add_modify_actions(dev, lhs.device(*sid)?, self)?;
        }

        for sid in lhs_sids.difference(&rhs_sids) {
            let dev = lhs.device(*sid)?;
            dev.kind().ops().add_delete_actions(dev, self)?;
        }

        let lhs_holders = lhs.holders();
        let rhs_holders = rhs.holders();
        let common = |sid: &Sid| lhs_sids.contains(sid) && rhs_sids.contains(sid);

        // Removed holders first, a replacement block device may only be
        // created once the one it replaces is released.
        for ((source, target), holder) in &lhs_holders {
            if common(target) && !rhs_holders.contains_key(&(*source, *target)) {
                holder.ops().add_delete_actions(*source, *target, self)?;
            }
        }
        for ((source, target), holder) in &rhs_holders {
            if common(target) && !lhs_holders.contains_key(&(*source, *target)) {
                holder.ops().add_create_actions(*source, *target, self)?;
            }
        }

        Ok(())
    }

    /// Adds the generic dependencies between chains, then lets every device
    /// add its own.
    ///
    /// The first action of a device in the target devicegraph that works on
    /// the target devicegraph waits for the parents there. Actions on the
    /// current devicegraph before it, like unmounting, do not. The chain of a
    /// deleted device waits for its deleted children.
    fn add_dependencies(&mut self) -> Result<(), StorageError> {
        let (lhs, rhs) = (self.lhs, self.rhs);

        let firsts: Vec<_> = self
            .chains
            .iter()
            .filter_map(|(sid, chain)| {
                let first = if rhs.device_exists(*sid) {
                    chain
                        .iter()
                        .find(|index| self.graph[**index].side == Side::Rhs)
                } else {
                    chain.first()
                };
                first.map(|first| (*sid, *first))
            })
            .collect();
        for (sid, first) in firsts {
            if rhs.device_exists(sid) {
                for parent in rhs.device(sid)?.parents() {
                    if let Some(last) = self.last_action(parent.sid()) {
                        self.add_dependency(last, first);
                    }
                }
            } else {
                for child in lhs.device(sid)?.children() {
                    if rhs.device_exists(child.sid()) {
                        continue;
                    }
                    if let Some(last) = self.last_action(child.sid()) {
                        self.add_dependency(last, first);
                    }
                }
            }
        }

        let vertices: Vec<_> = self.graph.node_indices().collect();
        for vertex in vertices {
            let dev = self.device(&self.graph[vertex])?;
            dev.kind().ops().add_dependencies(dev, vertex, self)?;
        }

        Ok(())
    }

    /// Chains all mount actions except swap by mount point so that nested
    /// mount points are mounted after their parents.
    ///
    /// Byte-wise ordering only approximates the nesting order. Mount points
    /// that do not nest as plain path prefixes may end up in an order that is
    /// valid for the graph but not needed.
    fn add_mount_dependencies(&mut self) {
        let mut mounts: Vec<(String, NodeIndex)> = self
            .graph
            .node_indices()
            .filter_map(|index| {
                self.graph[index]
                    .mount_point()
                    .filter(|mount_point| *mount_point != SWAP_MOUNT_POINT)
                    .map(|mount_point| (mount_point.to_string(), index))
            })
            .collect();
        mounts.sort();

        self.mount_root = mounts
            .iter()
            .find(|(mount_point, _)| mount_point == ROOT_MOUNT_POINT)
            .map(|(_, index)| *index);

        for pair in mounts.windows(2) {
            self.add_dependency(pair[0].1, pair[1].1);
        }
    }

    /// Orders all actions topologically. Among the actions that are ready,
    /// the one added first goes first.
    pub fn sort(&mut self) -> Result<(), StorageError> {
        self.order.clear();

        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|index| {
                self.graph
                    .neighbors_directed(index, Direction::Incoming)
                    .count()
            })
            .collect();
        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|index| in_degree[index.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != self.graph.node_count() {
            let mut actions = Vec::new();
            for component in tarjan_scc(&self.graph) {
                let cyclic = component.len() > 1
                    || self.graph.contains_edge(component[0], component[0]);
                if cyclic {
                    for index in component {
                        actions.push(self.text(index, false)?);
                    }
                }
            }
            error!("Action graph is not a DAG: {}", actions.join(", "));
            return Err(StorageError::new(SchedulingError::NotADag { actions }));
        }

        self.order = order;
        trace!(
            "Action order: {}",
            self.order
                .iter()
                .map(|index| self.graph[*index].to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }
}
