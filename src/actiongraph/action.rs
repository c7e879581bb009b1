use std::fmt::Display;

use crate::sid::Sid;

/// Which of the two devicegraphs of an action graph an action's device is
/// resolved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The current devicegraph. Used by deleting and unmounting actions.
    Lhs,
    /// The target devicegraph.
    Rhs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    SetLabel,
    Resize,
    SetPartitionId,
    Umount(String),
    /// Add the block device with sid `pv` to a volume group.
    ExtendVg { pv: Sid },
    /// Remove the block device with sid `pv` from a volume group.
    ReduceVg { pv: Sid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Create,
    Modify(Modification),
    Delete,
    /// Synchronization point without side effect.
    Nop,
    Mount(String),
}

impl ActionKind {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify(_) => "modify",
            Self::Delete => "delete",
            Self::Nop => "nop",
            Self::Mount(_) => "mount",
        }
    }
}

/// A single step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub sid: Sid,
    pub side: Side,
    pub kind: ActionKind,
    /// First action of the device's chain.
    pub first: bool,
    /// Last action of the device's chain.
    pub last: bool,
}

impl Action {
    pub fn new(sid: Sid, side: Side, kind: ActionKind) -> Self {
        Self {
            sid,
            side,
            kind,
            first: false,
            last: false,
        }
    }

    pub fn is_nop(&self) -> bool {
        self.kind == ActionKind::Nop
    }

    /// Mount point of a mount action.
    pub fn mount_point(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::Mount(mount_point) => Some(mount_point),
            _ => None,
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} sid:{}", self.kind.name(), self.sid)?;
        match (self.first, self.last) {
            (true, true) => write!(f, " [f l]"),
            (true, false) => write!(f, " [f]"),
            (false, true) => write!(f, " [l]"),
            (false, false) => Ok(()),
        }
    }
}
