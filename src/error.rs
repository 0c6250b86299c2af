//! Error taxonomy shared by the catalog, ledger and coordinator.

use std::fmt;

use thiserror::Error;
use ulid::Ulid;

use crate::oracle::Unavailable;

/// Stable classification of an [`Error`], suitable for mapping onto a
/// transport status by the request handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    Forbidden,
    Conflict,
    InUse,
    Transient,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InUse => "in_use",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Resource,
    Reservation,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Resource => f.write_str("resource"),
            Entity::Reservation => f.write_str("reservation"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: Ulid },
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("resource {resource_id} unavailable: {reason}")]
    Unavailable {
        resource_id: Ulid,
        reason: Unavailable,
    },
    #[error("resource name already in use: {0}")]
    DuplicateName(String),
    #[error("reservation {0} already exists with different contents")]
    AlreadyExists(Ulid),
    #[error("resource {resource_id} is referenced by {reservations} reservation(s)")]
    InUse { resource_id: Ulid, reservations: usize },
    #[error("timed out: {0}")]
    Timeout(&'static str),
    #[error("store error: {0}")]
    Store(String),
    #[error("ledger writer stopped")]
    WriterStopped,
    #[error("ledger inconsistency: {0}")]
    Inconsistent(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRequest(_) | Error::LimitExceeded(_) => ErrorKind::InvalidRequest,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::Unavailable { .. } | Error::DuplicateName(_) | Error::AlreadyExists(_) => {
                ErrorKind::Conflict
            }
            Error::InUse { .. } => ErrorKind::InUse,
            Error::Timeout(_) | Error::Store(_) => ErrorKind::Transient,
            Error::WriterStopped | Error::Inconsistent(_) => ErrorKind::Fatal,
        }
    }

    /// Only transient failures may be retried verbatim; commits are atomic so
    /// a retry never observes a half-applied attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidRequest(msg.into())
    }

    pub(crate) fn resource_not_found(id: Ulid) -> Self {
        Error::NotFound {
            entity: Entity::Resource,
            id,
        }
    }

    pub(crate) fn reservation_not_found(id: Ulid) -> Self {
        Error::NotFound {
            entity: Entity::Reservation,
            id,
        }
    }
}
