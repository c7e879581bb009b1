//! Loading and saving devicegraphs as YAML.

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    devices::Device,
    error::{PersistenceError, ReportError, StorageError, StorageResultExt},
    holders::HolderKind,
    sid::Sid,
};

use super::Devicegraph;

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct DevicegraphFile {
    #[serde(default)]
    devices: Vec<Device>,
    #[serde(default)]
    holders: Vec<HolderEntry>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct HolderEntry {
    source_sid: Sid,
    target_sid: Sid,
    kind: HolderKind,
}

impl Devicegraph {
    /// Parses a devicegraph from its YAML representation.
    ///
    /// The result is checked for consistency, and the global sid counter is
    /// moved past the highest sid found so that new devices never collide
    /// with loaded ones.
    pub fn from_yaml(contents: &str) -> Result<Self, StorageError> {
        let file: DevicegraphFile =
            serde_yaml::from_str(contents).structured(PersistenceError::Parse)?;

        let mut graph = Devicegraph::new();
        for device in file.devices {
            graph.add_device(device)?;
        }
        for holder in file.holders {
            graph.add_holder(holder.source_sid, holder.target_sid, holder.kind)?;
        }
        graph.check().message("Loaded devicegraph is inconsistent")?;

        // The highest sid has to leave room for later allocations.
        if let Some(max) = graph.index.keys().next_back() {
            if max.value() == u64::MAX {
                return Err(StorageError::new(PersistenceError::SidOutOfRange { sid: *max }));
            }
            Sid::reserve(*max);
        }

        Ok(graph)
    }

    pub fn to_yaml(&self) -> Result<String, StorageError> {
        let file = DevicegraphFile {
            devices: self.devices().map(|dev| dev.device().clone()).collect(),
            holders: self
                .holders()
                .into_iter()
                .map(|((source_sid, target_sid), holder)| HolderEntry {
                    source_sid,
                    target_sid,
                    kind: holder.kind,
                })
                .collect(),
        };
        serde_yaml::to_string(&file).structured(PersistenceError::Serialize)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        debug!("Loading devicegraph from '{}'", path.display());
        let contents = std::fs::read_to_string(path).structured(PersistenceError::Load {
            path: path.display().to_string(),
        })?;
        Self::from_yaml(&contents).message(format!(
            "Failed to load devicegraph from '{}'",
            path.display()
        ))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        let path = path.as_ref();
        debug!("Saving devicegraph to '{}'", path.display());
        std::fs::write(path, self.to_yaml()?).structured(PersistenceError::Save {
            path: path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use sysdefs::{filesystems::FilesystemType, partition_tables::PtType};

    use crate::{
        devices::{Disk, Filesystem, PartitionTable, Region},
        error::{ConsistencyError, ErrorKind},
    };

    use super::*;

    #[test]
    fn test_save_and_load() {
        let mut graph = Devicegraph::new();
        let disk = Disk::create(&mut graph, "/dev/sda", 1024 * 1024);
        let gpt = Disk::create_partition_table(&mut graph, disk, PtType::Gpt).unwrap();
        let sda1 =
            PartitionTable::create_partition(&mut graph, gpt, "/dev/sda1", Region::new(2048, 4096))
                .unwrap();
        let fs = Filesystem::create_on(&mut graph, sda1, FilesystemType::Xfs).unwrap();
        {
            let fs = graph.find_device_mut(fs).unwrap();
            fs.set_userdata(maplit::btreemap! {
                "purpose".to_string() => "data".to_string(),
            });
            let fs = fs.to_filesystem_mut().unwrap();
            fs.set_label("DATA").unwrap();
            fs.add_mount_point("/data");
        }

        let file = tempfile::NamedTempFile::new().unwrap();
        graph.save(file.path()).unwrap();
        let loaded = Devicegraph::load(file.path()).unwrap();
        assert_eq!(loaded, graph);
        assert_eq!(loaded.find_device(fs).unwrap().userdata()["purpose"], "data");
    }

    #[test]
    fn test_from_yaml_advances_sid_counter() {
        let loaded = Devicegraph::from_yaml(indoc! {r#"
            devices:
              - sid: 900000
                kind:
                  type: disk
                  name: /dev/vda
                  size-k: 1048576
                  rotational: true
              - sid: 900001
                kind:
                  type: partition-table
                  pt-type: msdos
            holders:
              - source-sid: 900000
                target-sid: 900001
                kind: user
        "#})
        .unwrap();

        assert_eq!(loaded.num_devices(), 2);
        assert!(
            loaded
                .find_device(Sid::from(900000))
                .unwrap()
                .to_disk()
                .unwrap()
                .rotational
        );
        assert!(Sid::allocate() > Sid::from(900001));
    }

    #[test]
    fn test_from_yaml_errors() {
        let err = Devicegraph::from_yaml("devices: 3").unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Persistence(PersistenceError::Parse)
        );

        let err = Devicegraph::from_yaml(indoc! {r#"
            devices:
              - sid: 910000
                kind:
                  type: disk
                  name: /dev/vda
                  size-k: 1
                  rotational: false
              - sid: 910000
                kind:
                  type: disk
                  name: /dev/vdb
                  size-k: 1
                  rotational: false
        "#})
        .unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Consistency(ConsistencyError::DuplicateSid(Sid::from(910000)))
        );

        let err = Devicegraph::from_yaml(indoc! {r#"
            devices:
              - sid: 18446744073709551615
                kind:
                  type: disk
                  name: /dev/vda
                  size-k: 1
                  rotational: false
        "#})
        .unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Persistence(PersistenceError::SidOutOfRange {
                sid: Sid::from(u64::MAX)
            })
        );
        assert!(Sid::allocate() < Sid::from(u64::MAX));

        let err = Devicegraph::load("/does/not/exist.yaml").unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Persistence(PersistenceError::Load { .. })
        ));
    }
}
