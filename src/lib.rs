//! Planning and applying storage changes.
//!
//! A [`Devicegraph`] describes one storage configuration. The
//! [`ActionGraph`] between the probed and the staging devicegraph holds the
//! ordered actions that turn one into the other, and committing it runs them
//! through a [`osutils::runner::CommandRunner`].

pub mod actiongraph;
pub mod devicegraph;
pub mod devices;
pub mod environment;
pub mod error;
pub mod holders;
pub mod sid;
pub mod size;
pub mod storage;

pub use actiongraph::{
    action::{Action, ActionKind, Modification, Side},
    commit::{CommitCallbacks, CommitContext},
    ActionGraph,
};
pub use devicegraph::{DeviceRef, Devicegraph};
pub use devices::{Device, DeviceKind, DeviceOps};
pub use environment::{Environment, TargetMode};
pub use error::{ErrorKind, StorageError};
pub use holders::{Holder, HolderKind};
pub use sid::Sid;
pub use storage::Storage;
