use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Title,
    Body,
    TriggerAt,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Title => "title",
            Field::Body => "body",
            Field::TriggerAt => "trigger_at",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: Field,
    pub message: String,
}

/// Field-level failures collected from one submission. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub(crate) fn from_errors(errors: Vec<FieldError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn for_field(&self, field: Field) -> Option<&str> {
        self.errors
            .iter()
            .find(|error| error.field == field)
            .map(|error| error.message.as_str())
    }

    pub fn has_field(&self, field: Field) -> bool {
        self.for_field(field).is_some()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(|error| format!("{}: {}", error.field, error.message))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "invalid submission: {joined}")
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("notification permission not granted")]
    PermissionDenied,
    #[error("no scheduled notification with identifier `{0}`")]
    NotFound(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("notification permission not granted")]
    PermissionDenied,
    #[error("failed to schedule notification: {0}")]
    Transport(#[source] TransportError),
    #[error("transport reused identifier `{0}`")]
    DuplicateIdentifier(String),
    #[error("failed to list scheduled notifications: {0}")]
    Listing(#[source] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancellationError {
    /// The transport has no record of the identifier. Treated as a soft
    /// failure: the notification cannot fire anymore.
    #[error("notification `{0}` is unknown to the transport")]
    NotFound(String),
    #[error("failed to cancel notification `{identifier}`: {source}")]
    Failed {
        identifier: String,
        #[source]
        source: TransportError,
    },
}

impl CancellationError {
    pub fn is_soft(&self) -> bool {
        matches!(self, CancellationError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error for key `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt value stored under `{key}`: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid storage key `{0}`")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    #[error(transparent)]
    Cancellation(#[from] CancellationError),
    #[error("notification `{0}` is not pending")]
    NotPending(String),
    #[error("notification state changed but could not be saved: {0}")]
    Persistence(#[from] StorageError),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
