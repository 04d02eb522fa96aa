use std::sync::Arc;

use thiserror::Error;

/// The error type shared by all fast-async crates.
///
/// Errors are cheap to clone: a failure captured on a task can be observed any
/// number of times and every observer receives the identical error.
#[derive(Debug, Clone, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

pub type StdErrorBoxed = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type StdErrorShared = Arc<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    pub fn unsupported_environment(reason: impl Into<String>) -> Error {
        Error(
            ErrorKind::UnsupportedEnvironment {
                reason: reason.into(),
            }
            .into(),
        )
    }

    /// Wraps a failure raised by a unit of work together with the work's name.
    pub fn task_failed(work_name: impl Into<String>, cause: impl Into<StdErrorBoxed>) -> Error {
        let cause: StdErrorBoxed = cause.into();
        Error::task_failed_shared(work_name, Arc::from(cause))
    }

    pub fn task_failed_shared(work_name: impl Into<String>, cause: StdErrorShared) -> Error {
        Error(
            ErrorKind::TaskFailed {
                work_name: work_name.into(),
                cause,
            }
            .into(),
        )
    }

    pub fn shut_down() -> Error {
        Error(ErrorKind::PoolShutDown.into())
    }

    /// Returns the name of the failed work if this error wraps a task failure.
    pub fn work_name(&self) -> Option<&str> {
        match self.kind() {
            ErrorKind::TaskFailed { work_name, .. } => Some(work_name),
            _ => None,
        }
    }

    /// Returns the original failure if this error wraps a task failure.
    pub fn cause(&self) -> Option<&StdErrorShared> {
        match self.kind() {
            ErrorKind::TaskFailed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    pub fn is_task_failure(&self) -> bool {
        matches!(self.kind(), ErrorKind::TaskFailed { .. })
    }
}

#[derive(Debug, Clone, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("unsupported environment: {reason}")]
    UnsupportedEnvironment { reason: String },

    #[error("an error occurred in '{work_name}': {cause}")]
    TaskFailed {
        work_name: String,
        #[source]
        cause: StdErrorShared,
    },

    #[error("the worker pool has been shut down")]
    PoolShutDown,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}
