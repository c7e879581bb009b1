use std::{
    ffi::{OsStr, OsString},
    io,
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{Command as StdCommand, Output},
};

use log::trace;
use strum_macros::IntoStaticStr;

#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Cannot find '{dependency}': {source}")]
    NotFound {
        dependency: Dependency,
        #[source]
        source: which::Error,
    },

    #[error("Cannot start '{dependency}': {inner}")]
    CouldNotExecute {
        dependency: Dependency,
        #[source]
        inner: io::Error,
    },

    #[error("'{rendered_command}' {explanation}\n{output}")]
    ExecutionFailed {
        dependency: Dependency,
        rendered_command: String,
        code: Option<i32>,
        signal: Option<i32>,
        stdout: String,
        stderr: String,
        explanation: String,
        output: String,
    },
}

impl DependencyError {
    /// Returns the dependency that caused the error.
    pub fn dependency(&self) -> Dependency {
        match self {
            Self::NotFound { dependency, .. }
            | Self::CouldNotExecute { dependency, .. }
            | Self::ExecutionFailed { dependency, .. } => *dependency,
        }
    }
}

/// Enum of the binaries used to realize storage actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Dependency {
    Btrfs,
    Fatlabel,
    Lvcreate,
    Lvremove,
    Lvresize,
    Mkdir,
    Mkfs,
    Mkswap,
    Mount,
    Parted,
    Sfdisk,
    Swaplabel,
    Swapoff,
    Swapon,
    Tune2fs,
    Udevadm,
    Umount,
    Vgcreate,
    Vgextend,
    Vgreduce,
    Vgremove,
    Wipefs,
    #[strum(serialize = "xfs_admin")]
    XfsAdmin,
    // Only used by the tests of this module
    #[cfg(test)]
    DoesNotExist,
    #[cfg(test)]
    Echo,
    #[cfg(test)]
    False,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

impl Dependency {
    /// Absolute location of binaries that are usually outside of $PATH.
    fn path_override(&self) -> Option<PathBuf> {
        match self {
            Self::XfsAdmin => Some(PathBuf::from("/usr/sbin/xfs_admin")),
            _ => None,
        }
    }

    /// Binary name, e.g. "vgcreate" for `Dependency::Vgcreate`.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn path(&self) -> Result<PathBuf, Box<DependencyError>> {
        let binary = self
            .path_override()
            .unwrap_or_else(|| PathBuf::from(self.name()));
        which::which(binary).map_err(|source| {
            Box::new(DependencyError::NotFound {
                dependency: *self,
                source,
            })
        })
    }

    /// Starts a command line for this binary without any arguments.
    pub fn cmd(&self) -> Command {
        Command {
            dependency: *self,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    dependency: Dependency,
    args: Vec<OsString>,
}

impl Command {
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn with_arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg.as_ref());
        }
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args(args);
        self
    }

    /// Returns the dependency this command runs.
    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    /// Runs the command and fails unless it exits with status 0.
    pub fn run_and_check(&self) -> Result<(), Box<DependencyError>> {
        self.output()?.check()
    }

    /// Renders the command line, quoting arguments that contain spaces.
    pub fn render(&self) -> String {
        let mut rendered = self.dependency.to_string();
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            rendered.push(' ');
            if arg.contains(' ') {
                rendered.push_str(&format!("'{arg}'"));
            } else {
                rendered.push_str(&arg);
            }
        }
        rendered
    }

    pub fn output(&self) -> Result<CommandOutput, Box<DependencyError>> {
        let rendered_command = self.render();
        trace!("Executing '{rendered_command}'");
        let inner = StdCommand::new(self.dependency.path()?)
            .args(&self.args)
            .output()
            .map_err(|inner| DependencyError::CouldNotExecute {
                dependency: self.dependency,
                inner,
            })?;
        let output = CommandOutput {
            rendered_command,
            dependency: self.dependency,
            inner,
        };
        trace!(
            "Executed '{}': {}\n{}",
            output.rendered_command,
            output.explain_exit(),
            output.report(),
        );
        Ok(output)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Result of a finished command.
#[derive(Debug)]
pub struct CommandOutput {
    rendered_command: String,
    dependency: Dependency,
    inner: Output,
}

impl CommandOutput {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.inner.stdout).into()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.inner.stderr).into()
    }

    /// Both output streams, labelled, skipping empty ones.
    pub fn report(&self) -> String {
        [("stdout", self.stdout()), ("stderr", self.stderr())]
            .into_iter()
            .filter(|(_, text)| !text.is_empty())
            .map(|(name, text)| format!("{name}:\n{text}\n"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn check(&self) -> Result<(), Box<DependencyError>> {
        if self.inner.status.success() {
            return Ok(());
        }

        let report = self.report();
        Err(Box::new(DependencyError::ExecutionFailed {
            dependency: self.dependency,
            rendered_command: self.rendered_command.clone(),
            code: self.inner.status.code(),
            signal: self.inner.status.signal(),
            stdout: self.stdout(),
            stderr: self.stderr(),
            explanation: self.explain_exit(),
            output: if report.is_empty() {
                "(no output collected)".into()
            } else {
                report
            },
        }))
    }

    fn explain_exit(&self) -> String {
        match (self.inner.status.code(), self.inner.status.signal()) {
            (Some(code), _) => format!("exited with status: {code}"),
            (None, Some(signal)) => format!("terminated by signal: {signal}"),
            (None, None) => "exited with unknown status".into(),
        }
    }
}
