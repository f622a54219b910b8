//! Store error taxonomy shared by all repositories.
//!
//! SQLite failures are classified once, at the repository boundary, so that
//! services can decide retry vs. abort without inspecting engine codes.

use crate::db::DbError;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse error category used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Lock timeout, busy database, deadlock-like contention.
    Transient,
    /// Unique/check constraint rejected a write.
    ConstraintViolation,
    /// Any other engine failure.
    Storage,
    /// Persisted data does not map back to the model.
    InvalidData,
    /// Caller-supplied request was rejected before reaching storage.
    InvalidInput,
}

#[derive(Debug)]
pub enum StoreError {
    Transient(rusqlite::Error),
    ConstraintViolation(rusqlite::Error),
    Db(DbError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    InvalidData(String),
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            Self::Transient(_) => StoreErrorKind::Transient,
            Self::ConstraintViolation(_) => StoreErrorKind::ConstraintViolation,
            Self::Db(_) | Self::UninitializedConnection { .. } => StoreErrorKind::Storage,
            Self::InvalidData(_) => StoreErrorKind::InvalidData,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == StoreErrorKind::Transient
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(err) => write!(f, "transient store failure: {err}"),
            Self::ConstraintViolation(err) => write!(f, "constraint violation: {err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection is not initialized: expected schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted field data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transient(err) | Self::ConstraintViolation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::UninitializedConnection { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        let code = match &value {
            rusqlite::Error::SqliteFailure(failure, _) => Some(failure.code),
            _ => None,
        };
        match code {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Self::Transient(value),
            Some(ErrorCode::ConstraintViolation) => Self::ConstraintViolation(value),
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Db(other),
        }
    }
}
