use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    actiongraph::{
        action::{ActionKind, Modification, Side},
        ActionGraph,
    },
    devices::DeviceKind,
    error::StorageError,
    sid::Sid,
};

/// Edge payload of a devicegraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Holder {
    pub kind: HolderKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HolderKind {
    /// The source is used by the target, e.g. a partition used as a physical
    /// volume of a volume group.
    User,

    /// The target is part of the source, e.g. a partition of a partition
    /// table.
    Subdevice,
}

impl Holder {
    pub fn new(kind: HolderKind) -> Self {
        Self { kind }
    }

    pub fn user() -> Self {
        Self::new(HolderKind::User)
    }

    pub fn subdevice() -> Self {
        Self::new(HolderKind::Subdevice)
    }

    pub(crate) fn ops(&self) -> &dyn HolderOps {
        match self.kind {
            HolderKind::User => &UserOps,
            HolderKind::Subdevice => &SubdeviceOps,
        }
    }
}

impl Display for HolderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Subdevice => write!(f, "Subdevice"),
        }
    }
}

/// Behaviour every holder kind provides to the action graph.
///
/// The two hooks are only called for holders whose target exists in both
/// devicegraphs. Holders of created or deleted targets are covered by the
/// actions of the target itself.
pub(crate) trait HolderOps {
    fn classname(&self) -> &'static str;

    /// Called for a holder that exists only in the target devicegraph.
    fn add_create_actions(
        &self,
        _source: Sid,
        _target: Sid,
        _ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    /// Called for a holder that exists only in the current devicegraph.
    fn add_delete_actions(
        &self,
        _source: Sid,
        _target: Sid,
        _ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        Ok(())
    }
}

struct UserOps;

impl HolderOps for UserOps {
    fn classname(&self) -> &'static str {
        "User"
    }

    fn add_create_actions(
        &self,
        source: Sid,
        target: Sid,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        if matches!(ag.rhs().find_device(target)?.kind(), DeviceKind::LvmVg(_)) {
            ag.add_chain(
                target,
                Side::Rhs,
                [ActionKind::Modify(Modification::ExtendVg { pv: source })],
            );
        }
        Ok(())
    }

    fn add_delete_actions(
        &self,
        source: Sid,
        target: Sid,
        ag: &mut ActionGraph<'_>,
    ) -> Result<(), StorageError> {
        if matches!(ag.lhs().find_device(target)?.kind(), DeviceKind::LvmVg(_)) {
            ag.add_chain(
                target,
                Side::Lhs,
                [ActionKind::Modify(Modification::ReduceVg { pv: source })],
            );
        }
        Ok(())
    }
}

struct SubdeviceOps;

impl HolderOps for SubdeviceOps {
    fn classname(&self) -> &'static str {
        "Subdevice"
    }
}
