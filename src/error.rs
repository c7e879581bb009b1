use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use osutils::dependencies::DependencyError;

use crate::sid::Sid;

/// A lookup did not find what it was asked for.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum NotFoundError {
    #[error("Device with sid {sid} not found")]
    DeviceNotFound { sid: Sid },
    #[error("Device with name '{name}' not found")]
    DeviceNameNotFound { name: String },
    #[error("Holder from sid {source_sid} to sid {target_sid} not found")]
    HolderNotFound { source_sid: Sid, target_sid: Sid },
    #[error("Device with sid {sid} is not a {expected}")]
    WrongDeviceType { sid: Sid, expected: &'static str },
    #[error("Devicegraph '{name}' not found")]
    DevicegraphNotFound { name: String },
}

/// A device graph violates one of its structural invariants.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ConsistencyError {
    #[error("Sid {0} is used by more than one device")]
    DuplicateSid(Sid),
    #[error("Holder from sid {source_sid} to sid {target_sid} is defined more than once")]
    DuplicateHolder { source_sid: Sid, target_sid: Sid },
    #[error("Device with sid {0} holds itself")]
    SelfLoop(Sid),
    #[error("Devicegraph has a cycle through the device with sid {sid}")]
    Cycle { sid: Sid },
    #[error("Index entry for sid {sid} does not point at the device with that sid")]
    IndexMismatch { sid: Sid },
}

/// Input provided by the caller was invalid.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidInputError {
    #[error("Devicegraph '{name}' already exists")]
    DevicegraphExists { name: String },
    #[error("Devicegraph '{name}' is managed by the storage session and cannot be removed")]
    ReservedDevicegraph { name: String },
    #[error("Label '{label}' is invalid for a {fs_type} filesystem: {reason}")]
    InvalidLabel {
        label: String,
        fs_type: String,
        reason: String,
    },
    #[error("Failed to load environment from '{path}'")]
    LoadEnvironment { path: String },
    #[error("Failed to parse environment")]
    ParseEnvironment,
}

/// The action graph could not be ordered.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingError {
    #[error("Action graph is not a DAG, cycle between: {}", .actions.join(", "))]
    NotADag { actions: Vec<String> },
}

/// Executing the plan on the system failed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionError {
    #[error("Action '{action}' failed")]
    ActionFailed { action: String },
    #[error("Refusing to commit in a read-only environment")]
    ReadOnly,
    #[error("Failed to find required binary '{binary}'")]
    MissingBinary { binary: &'static str },
    #[error("Failed to execute '{binary}'")]
    CommandCouldNotExecute { binary: &'static str },
    #[error("Command '{binary}' failed: {explanation}")]
    CommandFailed {
        binary: &'static str,
        explanation: String,
    },
}

/// Loading or saving a device graph failed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PersistenceError {
    #[error("Failed to load devicegraph from '{path}'")]
    Load { path: String },
    #[error("Failed to save devicegraph to '{path}'")]
    Save { path: String },
    #[error("Failed to parse devicegraph")]
    Parse,
    #[error("Failed to serialize devicegraph")]
    Serialize,
    #[error("Sid {sid} is out of range")]
    SidOutOfRange { sid: Sid },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// A lookup failed. Always recoverable by the caller.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// A device graph invariant was violated. This indicates a bug in
    /// whoever built the graph.
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    /// The caller provided invalid input.
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    /// The action graph could not be scheduled. Nothing was committed.
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    /// An action failed while committing. Actions before it have taken
    /// effect, actions after it have not run.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// A device graph could not be loaded or saved.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// A bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct StorageErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct StorageError(Box<StorageErrorInner>);
impl StorageError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        StorageError(Box::new(StorageErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn with_source(kind: impl Into<ErrorKind>, source: anyhow::Error) -> Self {
        StorageError(Box::new(StorageErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: Some(source),
            context: Vec::new(),
        }))
    }

    pub fn unstructured(self, context: impl Into<Cow<'static, str>>) -> anyhow::Error {
        match self.0.source {
            Some(source) => source.context(self.0.kind).context(context.into()),
            None => anyhow::Error::from(self.0.kind).context(context.into()),
        }
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Returns the underlying cause, if any.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.0.source.as_ref()
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.kind)?;
        if let Some(ref source) = self.0.source {
            write!(f, ": {source:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {}

pub trait ReportError<T, K> {
    /// Convert this error into a structured StorageError.
    fn structured(self, kind: K) -> Result<T, StorageError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, StorageError> {
        match self {
            Some(t) => Ok(t),
            None => Err(StorageError(Box::new(StorageErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: None,
                context: Vec::new(),
            }))),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, StorageError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(StorageError(Box::new(StorageErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait StorageResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, StorageError>;

    /// Convert the error into an unstructured error.
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}

impl<T> StorageResultExt<T> for Result<T, StorageError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, StorageError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl From<DependencyError> for StorageError {
    #[track_caller]
    fn from(value: DependencyError) -> Self {
        match value {
            DependencyError::NotFound { dependency, source } => StorageError::with_source(
                ExecutionError::MissingBinary {
                    binary: dependency.name(),
                },
                source.into(),
            ),
            DependencyError::CouldNotExecute { dependency, inner } => StorageError::with_source(
                ExecutionError::CommandCouldNotExecute {
                    binary: dependency.name(),
                },
                inner.into(),
            ),
            DependencyError::ExecutionFailed {
                dependency,
                explanation,
                output,
                rendered_command,
                ..
            } => StorageError::with_source(
                ExecutionError::CommandFailed {
                    binary: dependency.name(),
                    explanation,
                },
                anyhow::anyhow!("Cmdline: {rendered_command}\n{output}"),
            ),
        }
    }
}

impl From<Box<DependencyError>> for StorageError {
    #[track_caller]
    fn from(value: Box<DependencyError>) -> Self {
        (*value).into()
    }
}

impl Serialize for StorageError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("storage-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::NotFound(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Consistency(ref e) => state.serialize_field("error", e)?,
            ErrorKind::InvalidInput(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Scheduling(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Execution(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Persistence(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}
