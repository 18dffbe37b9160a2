//! Error types for the mockfs engine

use std::fmt;
use std::io;

use crate::events::FileOperation;

/// Core filesystem error type
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("{message}")]
    InvalidArgument { message: String },
    #[error("Illegal characters in path.")]
    IllegalCharacters,
    #[error("The path is not of a legal form.")]
    NotLegalForm,
    #[error("Could not find file '{path}'.")]
    FileNotFound { path: String },
    #[error("Could not find a part of the path '{path}'.")]
    DirectoryNotFound { path: String },
    #[error("Cannot create '{path}' because a file or directory with the same name already exists.")]
    AlreadyExists { path: String },
    #[error("The directory is not empty: '{path}'.")]
    DirectoryNotEmpty { path: String },
    #[error("Source and destination path must have identical roots. Move will not work across different volumes.")]
    DifferentVolumes,
    #[error("The process cannot access the file '{path}' because it is being used by another process.")]
    SharingViolation { path: String, code: i32 },
    #[error("{message}")]
    Io { message: String },
    #[error("Access to the path '{path}' is denied.")]
    AccessDenied { path: String },
    #[error("{message}")]
    Unsupported { message: String },
    #[error("Too many levels of symbolic links resolving '{path}'.")]
    TooManyLinks { path: String },
    #[error("The path '{path}' is not a symbolic link.")]
    NotALink { path: String },
    #[error("The link target of '{path}' could not be found.")]
    LinkTargetNotFound { path: String },
    #[error("The operation {operation} on '{path}' was cancelled.")]
    Cancelled { operation: FileOperation, path: String },
    #[error("{message}")]
    InvalidState { message: String },
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

/// Broad classification of an [`FsError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    AccessDenied,
    Unsupported,
    LinkResolution,
    Cancelled,
    State,
    Aggregate,
    Custom,
}

impl FsError {
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn file_not_found<S: Into<String>>(path: S) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub fn directory_not_found<S: Into<String>>(path: S) -> Self {
        Self::DirectoryNotFound { path: path.into() }
    }

    pub fn already_exists<S: Into<String>>(path: S) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    pub fn directory_not_empty<S: Into<String>>(path: S) -> Self {
        Self::DirectoryNotEmpty { path: path.into() }
    }

    pub fn sharing_violation<S: Into<String>>(path: S, code: i32) -> Self {
        Self::SharingViolation {
            path: path.into(),
            code,
        }
    }

    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn access_denied<S: Into<String>>(path: S) -> Self {
        Self::AccessDenied { path: path.into() }
    }

    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Wrap an arbitrary error so it can be raised through the engine unchanged.
    pub fn custom<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Custom(Box::new(error))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::IllegalCharacters | Self::NotLegalForm => {
                ErrorKind::InvalidArgument
            }
            Self::FileNotFound { .. } | Self::DirectoryNotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. }
            | Self::DirectoryNotEmpty { .. }
            | Self::DifferentVolumes
            | Self::SharingViolation { .. }
            | Self::Io { .. } => ErrorKind::Conflict,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::TooManyLinks { .. } | Self::NotALink { .. } | Self::LinkTargetNotFound { .. } => {
                ErrorKind::LinkResolution
            }
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::InvalidState { .. } => ErrorKind::State,
            Self::Aggregate(_) => ErrorKind::Aggregate,
            Self::Custom(_) => ErrorKind::Custom,
        }
    }

    /// Native error code attached to sharing violations.
    pub fn raw_code(&self) -> Option<i32> {
        match self {
            Self::SharingViolation { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Ordered collection of errors raised by several event handlers during one dispatch.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<FsError>,
}

impl AggregateError {
    pub(crate) fn new(errors: Vec<FsError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[FsError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<FsError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} event handlers failed", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            write!(f, "; ({}) {}", i + 1, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Convert FsError to std::io::Error for callers that speak std::io.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        let kind = match &e {
            FsError::InvalidArgument { .. } | FsError::IllegalCharacters | FsError::NotLegalForm => {
                io::ErrorKind::InvalidInput
            }
            FsError::FileNotFound { .. } | FsError::DirectoryNotFound { .. } => io::ErrorKind::NotFound,
            FsError::AlreadyExists { .. } => io::ErrorKind::AlreadyExists,
            FsError::AccessDenied { .. } => io::ErrorKind::PermissionDenied,
            FsError::Unsupported { .. } => io::ErrorKind::Unsupported,
            FsError::Cancelled { .. } => io::ErrorKind::Interrupted,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// Error raised while loading an [`FsConfig`](crate::FsConfig).
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
