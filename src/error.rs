use crate::device::Status;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to build program '{source_id}':\n{log}")]
    Build { source_id: String, log: String },

    #[error("kernel '{entry}' not found in program '{source_id}'")]
    KernelNotFound { source_id: String, entry: String },

    #[error("invalid kernel argument {index}: {reason} ({status})")]
    InvalidArgument {
        index: usize,
        status: Status,
        reason: String,
    },

    #[error("submission rejected: {reason} ({status})")]
    Submission { status: Status, reason: String },

    #[error("kernel execution failed: {0}")]
    Execution(String),

    #[error("failed to read program source '{path}': {source}")]
    Source {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("command queue is closed")]
    QueueClosed,

    #[error("executor error: {0}")]
    Executor(String),

    #[cfg(feature = "telemetry")]
    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn build<S: Into<String>, L: Into<String>>(source_id: S, log: L) -> Self {
        Error::Build {
            source_id: source_id.into(),
            log: log.into(),
        }
    }

    pub fn invalid_argument<S: Into<String>>(index: usize, status: Status, reason: S) -> Self {
        Error::InvalidArgument {
            index,
            status,
            reason: reason.into(),
        }
    }

    pub fn submission<S: Into<String>>(status: Status, reason: S) -> Self {
        Error::Submission {
            status,
            reason: reason.into(),
        }
    }

    pub fn execution<S: Into<String>>(msg: S) -> Self {
        Error::Execution(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }

    #[cfg(feature = "telemetry")]
    pub fn telemetry<S: Into<String>>(msg: S) -> Self {
        Error::Telemetry(msg.into())
    }

    /// Device status code associated with this error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Build { .. } => Some(Status::BuildProgramFailure),
            Error::KernelNotFound { .. } => Some(Status::InvalidKernelName),
            Error::InvalidArgument { status, .. } | Error::Submission { status, .. } => {
                Some(*status)
            }
            Error::Execution(_) => Some(Status::ExecStatusErrorForEventsInWaitList),
            Error::DeviceNotFound(_) => Some(Status::DeviceNotFound),
            Error::QueueClosed => Some(Status::InvalidCommandQueue),
            Error::Executor(_) => Some(Status::OutOfResources),
            _ => None,
        }
    }

    /// Compiler log for build failures.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            Error::Build { log, .. } => Some(log),
            _ => None,
        }
    }
}
