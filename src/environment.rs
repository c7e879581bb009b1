use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use osutils::path::join_relative;

use crate::error::{InvalidInputError, ReportError, StorageError};

/// Settings of a storage session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Environment {
    /// Refuse to commit anything to the system.
    #[serde(default)]
    pub read_only: bool,

    /// How the system being modified relates to the running one.
    #[serde(default)]
    pub target_mode: TargetMode,

    /// Directory the target system is mounted under. Ignored in direct mode.
    #[serde(default = "default_rootprefix")]
    pub rootprefix: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TargetMode {
    /// The running system is the target.
    #[default]
    Direct,

    /// The target is mounted below the root prefix and will be entered with
    /// chroot.
    Chroot,

    /// The target is an image being assembled below the root prefix.
    Image,
}

fn default_rootprefix() -> PathBuf {
    PathBuf::from("/")
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            read_only: false,
            target_mode: TargetMode::default(),
            rootprefix: default_rootprefix(),
        }
    }
}

impl Environment {
    pub fn new(read_only: bool) -> Self {
        Self {
            read_only,
            ..Default::default()
        }
    }

    /// Reads the environment from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).structured(InvalidInputError::LoadEnvironment {
                path: path.display().to_string(),
            })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, StorageError> {
        serde_yaml::from_str(contents).structured(InvalidInputError::ParseEnvironment)
    }

    /// Returns where `mount_point` of the target lives on the running system.
    pub fn target_path(&self, mount_point: impl AsRef<Path>) -> PathBuf {
        match self.target_mode {
            TargetMode::Direct => mount_point.as_ref().to_path_buf(),
            TargetMode::Chroot | TargetMode::Image => join_relative(&self.rootprefix, mount_point),
        }
    }
}
