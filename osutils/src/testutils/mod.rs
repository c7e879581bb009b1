use crate::{
    dependencies::{Command, DependencyError},
    runner::CommandRunner,
};

/// Runner that records every command instead of executing it. Commands whose
/// rendered form contains one of the configured patterns fail as if the
/// binary had exited with status 1.
#[derive(Debug, Default, Clone)]
pub struct RecordingRunner {
    commands: Vec<String>,
    failing: Vec<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command containing `pattern` fail.
    pub fn fail_on(mut self, pattern: impl Into<String>) -> Self {
        self.failing.push(pattern.into());
        self
    }

    /// Returns all commands attempted so far, failed ones included.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&mut self, command: &Command) -> Result<(), Box<DependencyError>> {
        let rendered = command.render();
        self.commands.push(rendered.clone());

        if self.failing.iter().any(|pattern| rendered.contains(pattern)) {
            return Err(Box::new(DependencyError::ExecutionFailed {
                dependency: command.dependency(),
                rendered_command: rendered,
                code: Some(1),
                signal: None,
                stdout: String::new(),
                stderr: "injected failure".into(),
                explanation: "exited with status: 1".into(),
                output: "stderr:\ninjected failure\n".into(),
            }));
        }

        Ok(())
    }
}
