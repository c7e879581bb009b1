use log::{error, info, warn};

use osutils::{dependencies::Command, runner::CommandRunner};

use crate::{
    environment::Environment,
    error::{ExecutionError, ReportError, StorageError},
};

use super::{action::Action, ActionGraph};

/// Hooks the caller can use to follow and steer a commit.
pub trait CommitCallbacks {
    /// Progress message for the action about to be executed.
    fn message(&mut self, _message: &str) {}

    fn pre(&mut self, _action: &Action) {}

    fn post(&mut self, _action: &Action) {}

    /// Called when an action failed. Returning `true` continues with the
    /// next action, returning `false` aborts the commit.
    fn error(&mut self, _message: &str, _what: &str) -> bool {
        false
    }
}

/// Everything an action needs to apply itself to the system.
pub struct CommitContext<'r> {
    runner: &'r mut dyn CommandRunner,
    environment: &'r Environment,
}

impl<'r> CommitContext<'r> {
    pub fn new(runner: &'r mut dyn CommandRunner, environment: &'r Environment) -> Self {
        Self {
            runner,
            environment,
        }
    }

    pub fn environment(&self) -> &Environment {
        self.environment
    }

    pub fn run(&mut self, command: Command) -> Result<(), StorageError> {
        Ok(self.runner.run(&command)?)
    }
}

impl ActionGraph<'_> {
    /// Executes all actions in order.
    ///
    /// A failing action aborts the commit unless the callbacks acknowledge
    /// the failure. Actions after an aborting failure are not attempted.
    #[tracing::instrument(name = "actiongraph_commit", skip_all)]
    pub fn commit(
        &self,
        environment: &Environment,
        runner: &mut dyn CommandRunner,
        mut callbacks: Option<&mut dyn CommitCallbacks>,
    ) -> Result<(), StorageError> {
        if environment.read_only {
            return Err(StorageError::new(ExecutionError::ReadOnly));
        }

        let mut ctx = CommitContext::new(runner, environment);
        for index in self.order() {
            let action = self.action(*index);
            if action.is_nop() {
                continue;
            }

            let text = self.text(*index, true)?;
            info!("{text}");
            if let Some(callbacks) = callbacks.as_deref_mut() {
                callbacks.message(&text);
                callbacks.pre(action);
            }

            let result = self
                .device(action)
                .and_then(|dev| dev.kind().ops().commit(dev, action, &mut ctx));
            match result {
                Ok(()) => {
                    if let Some(callbacks) = callbacks.as_deref_mut() {
                        callbacks.post(action);
                    }
                }
                Err(err) => {
                    let what = err.to_string();
                    let acknowledged = callbacks
                        .as_deref_mut()
                        .is_some_and(|callbacks| callbacks.error(&text, &what));
                    if acknowledged {
                        warn!("Ignoring failure of '{text}': {what}");
                        continue;
                    }

                    error!("Aborting commit, '{text}' failed: {what}");
                    return Err(err).structured(ExecutionError::ActionFailed { action: text });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use osutils::testutils::RecordingRunner;
    use sysdefs::partition_tables::PtType;

    use crate::{
        devicegraph::Devicegraph,
        devices::{Disk, PartitionTable, Region},
        error::ErrorKind,
    };

    use super::*;

    #[derive(Default)]
    struct Recorder {
        messages: Vec<String>,
        errors: Vec<String>,
        posts: usize,
        keep_going: bool,
    }

    impl CommitCallbacks for Recorder {
        fn message(&mut self, message: &str) {
            self.messages.push(message.to_string());
        }

        fn post(&mut self, _action: &Action) {
            self.posts += 1;
        }

        fn error(&mut self, message: &str, _what: &str) -> bool {
            self.errors.push(message.to_string());
            self.keep_going
        }
    }

    fn graphs() -> (Devicegraph, Devicegraph) {
        let mut lhs = Devicegraph::new();
        let disk = Disk::create(&mut lhs, "/dev/sdc", 1024 * 1024);
        let mut rhs = lhs.clone();
        let pt = Disk::create_partition_table(&mut rhs, disk, PtType::Gpt).unwrap();
        PartitionTable::create_partition(&mut rhs, pt, "/dev/sdc1", Region::new(2048, 4096))
            .unwrap();
        (lhs, rhs)
    }

    #[test]
    fn test_read_only() {
        let (lhs, rhs) = graphs();
        let ag = ActionGraph::new(&lhs, &rhs).unwrap();
        let mut runner = RecordingRunner::new();
        let err = ag
            .commit(&Environment::new(true), &mut runner, None)
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Execution(ExecutionError::ReadOnly));
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn test_callbacks() {
        let (lhs, rhs) = graphs();
        let ag = ActionGraph::new(&lhs, &rhs).unwrap();
        let mut runner = RecordingRunner::new();
        let mut recorder = Recorder::default();
        ag.commit(&Environment::default(), &mut runner, Some(&mut recorder))
            .unwrap();

        assert_eq!(
            recorder.messages,
            [
                "Creating GPT on /dev/sdc",
                "Creating partition /dev/sdc1 (2.00 MiB)"
            ]
        );
        assert_eq!(recorder.posts, 2);
        assert!(recorder.errors.is_empty());
        assert_eq!(runner.commands()[0], "parted --script /dev/sdc mklabel gpt");
    }

    #[test]
    fn test_abort_and_continue() {
        let (lhs, rhs) = graphs();
        let ag = ActionGraph::new(&lhs, &rhs).unwrap();

        let mut runner = RecordingRunner::new().fail_on("mklabel");
        let mut recorder = Recorder::default();
        let err = ag
            .commit(&Environment::default(), &mut runner, Some(&mut recorder))
            .unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Execution(ExecutionError::ActionFailed {
                action: "Creating GPT on /dev/sdc".into()
            })
        );
        assert_eq!(recorder.errors, ["Creating GPT on /dev/sdc"]);
        assert_eq!(recorder.posts, 0);
        assert_eq!(runner.commands(), ["parted --script /dev/sdc mklabel gpt"]);

        let mut runner = RecordingRunner::new().fail_on("mklabel");
        let mut recorder = Recorder {
            keep_going: true,
            ..Default::default()
        };
        ag.commit(&Environment::default(), &mut runner, Some(&mut recorder))
            .unwrap();
        assert_eq!(recorder.errors.len(), 1);
        assert_eq!(recorder.posts, 1);
        assert!(runner.commands().len() > 1);
    }
}
