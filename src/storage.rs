use std::collections::BTreeMap;

use log::{debug, info};

use osutils::runner::CommandRunner;

use crate::{
    actiongraph::{commit::CommitCallbacks, ActionGraph},
    devicegraph::Devicegraph,
    environment::Environment,
    error::{InvalidInputError, NotFoundError, StorageError},
};

/// Name of the devicegraph describing the system as it is.
pub const PROBED: &str = "probed";

/// Name of the devicegraph describing the system as it should become.
pub const STAGING: &str = "staging";

/// A storage session: the probed and staging devicegraphs plus any number of
/// named copies.
#[derive(Debug)]
pub struct Storage {
    environment: Environment,
    probed: Devicegraph,
    staging: Devicegraph,
    others: BTreeMap<String, Devicegraph>,
}

impl Storage {
    /// Starts a session with empty probed and staging devicegraphs.
    pub fn new(environment: Environment) -> Self {
        Self::with_probed(environment, Devicegraph::new())
    }

    /// Starts a session on an already known system. Staging starts out as a
    /// copy of `probed`.
    pub fn with_probed(environment: Environment, probed: Devicegraph) -> Self {
        Self {
            environment,
            staging: probed.clone(),
            probed,
            others: BTreeMap::new(),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn probed(&self) -> &Devicegraph {
        &self.probed
    }

    pub fn staging(&self) -> &Devicegraph {
        &self.staging
    }

    pub fn staging_mut(&mut self) -> &mut Devicegraph {
        &mut self.staging
    }

    fn is_reserved(name: &str) -> bool {
        name == PROBED || name == STAGING
    }

    pub fn devicegraph_exists(&self, name: &str) -> bool {
        Self::is_reserved(name) || self.others.contains_key(name)
    }

    /// Names of all devicegraphs, sorted.
    pub fn devicegraph_names(&self) -> Vec<String> {
        let mut names: Vec<_> = [PROBED, STAGING]
            .into_iter()
            .map(String::from)
            .chain(self.others.keys().cloned())
            .collect();
        names.sort();
        names
    }

    pub fn devicegraph(&self, name: &str) -> Result<&Devicegraph, StorageError> {
        match name {
            PROBED => Ok(&self.probed),
            STAGING => Ok(&self.staging),
            _ => self.others.get(name).ok_or_else(|| {
                StorageError::new(NotFoundError::DevicegraphNotFound { name: name.into() })
            }),
        }
    }

    pub fn devicegraph_mut(&mut self, name: &str) -> Result<&mut Devicegraph, StorageError> {
        match name {
            PROBED => Ok(&mut self.probed),
            STAGING => Ok(&mut self.staging),
            _ => self.others.get_mut(name).ok_or_else(|| {
                StorageError::new(NotFoundError::DevicegraphNotFound { name: name.into() })
            }),
        }
    }

    /// Adds an empty devicegraph.
    pub fn create_devicegraph(&mut self, name: &str) -> Result<&mut Devicegraph, StorageError> {
        if self.devicegraph_exists(name) {
            return Err(StorageError::new(InvalidInputError::DevicegraphExists {
                name: name.into(),
            }));
        }
        debug!("Creating devicegraph '{name}'");
        Ok(self.others.entry(name.into()).or_default())
    }

    /// Copies the devicegraph `source` to the new devicegraph `dest`.
    pub fn copy_devicegraph(&mut self, source: &str, dest: &str) -> Result<(), StorageError> {
        let copy = self.devicegraph(source)?.clone();
        self.create_devicegraph(dest)?;
        self.others.insert(dest.into(), copy);
        Ok(())
    }

    pub fn remove_devicegraph(&mut self, name: &str) -> Result<(), StorageError> {
        if Self::is_reserved(name) {
            return Err(StorageError::new(InvalidInputError::ReservedDevicegraph {
                name: name.into(),
            }));
        }
        self.others.remove(name).map(|_| ()).ok_or_else(|| {
            StorageError::new(NotFoundError::DevicegraphNotFound { name: name.into() })
        })
    }

    /// Replaces staging with a copy of the devicegraph `name`.
    pub fn restore_devicegraph(&mut self, name: &str) -> Result<(), StorageError> {
        if name == STAGING {
            return Ok(());
        }
        let graph = match name {
            PROBED => &self.probed,
            _ => self.others.get(name).ok_or_else(|| {
                StorageError::new(NotFoundError::DevicegraphNotFound { name: name.into() })
            })?,
        };
        graph.copy(&mut self.staging);
        Ok(())
    }

    /// Plans the transition from probed to staging.
    pub fn calculate_actiongraph(&self) -> Result<ActionGraph<'_>, StorageError> {
        ActionGraph::new(&self.probed, &self.staging)
    }

    pub fn commit_steps(&self) -> Result<Vec<String>, StorageError> {
        self.calculate_actiongraph()?.commit_steps()
    }

    /// Applies staging to the system. Afterwards probed is a copy of staging.
    pub fn commit(
        &mut self,
        runner: &mut dyn CommandRunner,
        callbacks: Option<&mut dyn CommitCallbacks>,
    ) -> Result<(), StorageError> {
        self.calculate_actiongraph()?
            .commit(&self.environment, runner, callbacks)?;

        info!("Commit finished, updating probed devicegraph");
        self.staging.copy(&mut self.probed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use osutils::testutils::RecordingRunner;
    use sysdefs::partition_tables::PtType;

    use crate::{devices::Disk, error::ErrorKind};

    use super::*;

    fn storage() -> Storage {
        let mut probed = Devicegraph::new();
        Disk::create(&mut probed, "/dev/sda", 1024 * 1024);
        Storage::with_probed(Environment::default(), probed)
    }

    #[test]
    fn test_devicegraph_management() {
        let mut storage = storage();
        assert_eq!(storage.devicegraph_names(), [PROBED, STAGING]);
        assert_eq!(storage.probed(), storage.staging());

        storage.create_devicegraph("empty").unwrap();
        assert!(storage.devicegraph("empty").unwrap().is_empty());
        let err = storage.create_devicegraph(STAGING).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidInput(InvalidInputError::DevicegraphExists { .. })
        ));

        storage.copy_devicegraph(PROBED, "backup").unwrap();
        assert_eq!(storage.devicegraph_names(), ["backup", "empty", PROBED, STAGING]);
        assert!(storage.copy_devicegraph("missing", "other").is_err());
        assert!(storage.copy_devicegraph(PROBED, "backup").is_err());

        storage.remove_devicegraph("empty").unwrap();
        assert!(!storage.devicegraph_exists("empty"));
        assert!(matches!(
            storage.remove_devicegraph("empty").unwrap_err().kind(),
            ErrorKind::NotFound(NotFoundError::DevicegraphNotFound { .. })
        ));
        assert!(matches!(
            storage.remove_devicegraph(PROBED).unwrap_err().kind(),
            ErrorKind::InvalidInput(InvalidInputError::ReservedDevicegraph { .. })
        ));
    }

    #[test]
    fn test_restore() {
        let mut storage = storage();
        storage.copy_devicegraph(STAGING, "backup").unwrap();

        let disk = storage.staging().devices().next().unwrap().sid();
        Disk::create_partition_table(storage.staging_mut(), disk, PtType::Gpt).unwrap();
        assert_eq!(storage.commit_steps().unwrap(), ["Creating GPT on /dev/sda"]);

        storage.restore_devicegraph("backup").unwrap();
        assert!(storage.commit_steps().unwrap().is_empty());

        Disk::create_partition_table(storage.staging_mut(), disk, PtType::Gpt).unwrap();
        storage.restore_devicegraph(PROBED).unwrap();
        assert_eq!(storage.probed(), storage.staging());
    }

    #[test]
    fn test_commit_updates_probed() {
        let mut storage = storage();
        let disk = storage.staging().devices().next().unwrap().sid();
        Disk::create_partition_table(storage.staging_mut(), disk, PtType::Gpt).unwrap();

        let mut runner = RecordingRunner::new();
        storage.commit(&mut runner, None).unwrap();
        assert_eq!(storage.probed(), storage.staging());
        assert!(storage.calculate_actiongraph().unwrap().is_empty());
    }

    #[test]
    fn test_failed_commit_keeps_probed() {
        let mut storage = storage();
        let disk = storage.staging().devices().next().unwrap().sid();
        Disk::create_partition_table(storage.staging_mut(), disk, PtType::Gpt).unwrap();

        let mut runner = RecordingRunner::new().fail_on("parted");
        assert!(storage.commit(&mut runner, None).is_err());
        assert_ne!(storage.probed(), storage.staging());
    }
}
