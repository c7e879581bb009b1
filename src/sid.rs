use std::{
    fmt::{self, Display},
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

/// First sid handed out in a fresh process.
const FIRST_SID: u64 = 42;

static NEXT_SID: AtomicU64 = AtomicU64::new(FIRST_SID);

/// Storage id of a device.
///
/// Sids are allocated once per logical device and survive copying a
/// devicegraph into another snapshot, which makes them the join key when two
/// devicegraphs are compared. A sid is never reused and the counter is never
/// reset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sid(u64);

impl Sid {
    /// Allocates a new, process-wide unique sid.
    pub fn allocate() -> Self {
        Sid(NEXT_SID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Makes sure later allocations never return `sid` or anything below it.
    /// Used after loading devices whose sids were allocated by another process.
    pub(crate) fn reserve(sid: Sid) {
        NEXT_SID.fetch_max(sid.0.saturating_add(1), Ordering::Relaxed);
    }
}

impl From<u64> for Sid {
    fn from(value: u64) -> Self {
        Sid(value)
    }
}

impl Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
