use crate::stage::StageId;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Invalid option `{option}` for stage {stage}: {reason}")]
    InvalidOption {
        stage: StageId,
        option: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing dependency for {capability}: {hint}")]
    MissingDependency {
        capability: &'static str,
        hint: &'static str,
    },

    #[error("Transform error in {stage} stage: {message}")]
    Transform { stage: StageId, message: String },

    #[error("Stage {0} is already closed")]
    AlreadyClosed(StageId),

    #[error("Operation succeeded but cleanup failed: {0}")]
    Cleanup(#[source] Box<StreamError>),
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// Coarse classification of a [`StreamError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    MissingDependency,
    Transform,
    Cleanup,
    Io,
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownStage(_)
            | Self::InvalidOption { .. }
            | Self::Config(_)
            | Self::Json(_) => ErrorKind::Configuration,
            Self::MissingDependency { .. } => ErrorKind::MissingDependency,
            Self::Transform { .. } => ErrorKind::Transform,
            Self::Cleanup(_) => ErrorKind::Cleanup,
            Self::Io(_) | Self::AlreadyClosed(_) => ErrorKind::Io,
        }
    }

    /// The one close-time condition that is safe to ignore
    pub fn is_already_closed(&self) -> bool {
        matches!(self, Self::AlreadyClosed(_))
    }

    pub fn transform(stage: StageId, message: impl Into<String>) -> Self {
        Self::Transform {
            stage,
            message: message.into(),
        }
    }

    /// Wrap as a cleanup failure, unless it already is one
    pub fn into_cleanup(self) -> Self {
        match self {
            Self::Cleanup(_) => self,
            other => Self::Cleanup(Box::new(other)),
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Self::Io(err) => err.kind(),
            Self::Transform { .. } => io::ErrorKind::InvalidData,
            Self::MissingDependency { .. } => io::ErrorKind::Unsupported,
            Self::UnknownStage(_)
            | Self::InvalidOption { .. }
            | Self::Config(_)
            | Self::Json(_) => io::ErrorKind::InvalidInput,
            Self::AlreadyClosed(_) | Self::Cleanup(_) => io::ErrorKind::Other,
        }
    }
}

// Typed errors travel through `Read`/`Write` as the payload of an io::Error
// and are unwrapped again on the way out.
impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        let wraps_stream = err
            .get_ref()
            .map_or(false, |inner| inner.is::<StreamError>());
        if !wraps_stream {
            return Self::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<StreamError>()) {
            Some(Ok(stream)) => *stream,
            Some(Err(other)) => Self::Io(io::Error::new(io::ErrorKind::Other, other)),
            None => Self::Io(io::Error::from(io::ErrorKind::Other)),
        }
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Io(inner) => inner,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}
