use log::debug;

use crate::dependencies::{Command, DependencyError};

/// Executes commands on behalf of the storage actions.
///
/// Actions never spawn processes themselves; they hand their commands to a
/// runner so that the caller decides whether they really hit the system.
pub trait CommandRunner {
    fn run(&mut self, command: &Command) -> Result<(), Box<DependencyError>>;
}

/// Runner that executes commands on the running system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, command: &Command) -> Result<(), Box<DependencyError>> {
        debug!("Running '{command}'");
        command.run_and_check()
    }
}
