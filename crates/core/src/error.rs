//! Error types for LatticeDB
//!
//! A single [`Error`] enum converges every failure the engine can surface.
//! We use `thiserror` for `Display`/`Error` derivation.
//!
//! Errors fall into four categories:
//!
//! - **Commit conflicts** (retryable): dirty select, namespace duplicate,
//!   row clash, dropped-modified. Surfaced from commit; the caller may
//!   retry the whole transaction.
//! - **Constraint violations** (non-retryable): NOT NULL, CHECK, UNIQUE,
//!   PRIMARY KEY, FOREIGN KEY. Carry the constraint name and offending row.
//! - **Storage errors**: I/O failures and corruption. Corruption marks the
//!   database unusable.
//! - **Programmer errors** (non-retryable): missing privilege, unknown
//!   object, mutation on a read-only view or a closed transaction.
//!
//! [`Error::code`] maps every variant onto the wire-layer [`ErrorCode`].

use crate::row::RowId;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Lattice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Constraint kind carried by a [`Error::ConstraintViolation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// A non-nullable column received NULL
    NotNull,
    /// A CHECK expression evaluated to FALSE
    Check,
    /// A UNIQUE key collided
    Unique,
    /// A PRIMARY KEY collided or was NULL
    PrimaryKey,
    /// A FOREIGN KEY referenced a missing parent, or a removed parent
    /// still has referencing children
    ForeignKey,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ViolationKind::NotNull => "NOT NULL",
            ViolationKind::Check => "CHECK",
            ViolationKind::Unique => "UNIQUE",
            ViolationKind::PrimaryKey => "PRIMARY KEY",
            ViolationKind::ForeignKey => "FOREIGN KEY",
        };
        f.write_str(s)
    }
}

/// Error type for the Lattice engine
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the paged store's backing file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Data integrity failure: bad magic, bad version, CRC mismatch,
    /// unreadable area. The database is unusable once this is raised.
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Named object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The session user lacks a privilege required for the operation
    #[error("privilege denied: user '{user}' lacks {privilege} on {object}")]
    PrivilegeDenied {
        /// Session user name
        user: String,
        /// Privilege that was required
        privilege: String,
        /// Qualified object name
        object: String,
    },

    /// A table this transaction read from was modified and committed by a
    /// concurrent transaction before this one committed
    #[error("dirty select on table '{table}'")]
    DirtySelect {
        /// Table that was read and concurrently modified
        table: String,
    },

    /// A concurrent commit created or dropped the same object name
    #[error("object '{name}' was concurrently {action}")]
    ObjectDuplicated {
        /// Qualified object name
        name: String,
        /// `"created"` or `"dropped"`
        action: &'static str,
    },

    /// Two transactions touched the same physical row with at least one
    /// remove/update; the later committer fails
    #[error("row conflict on table '{table}': row {row} was removed by a concurrent commit")]
    RowRemoveConflict {
        /// Table carrying the clash
        table: String,
        /// Physical row number both transactions touched
        row: u64,
    },

    /// A table this transaction wrote to was dropped by a concurrent commit
    #[error("table '{table}' written here was dropped by a concurrent commit")]
    NonCommittedConflict {
        /// The dropped table
        table: String,
    },

    /// A table this transaction drops was modified by a concurrent commit
    #[error("table '{table}' dropped here was modified by a concurrent commit")]
    DroppedModified {
        /// The modified table
        table: String,
    },

    /// A declarative constraint was violated
    #[error("constraint '{constraint}' ({kind}) violated at {row}")]
    ConstraintViolation {
        /// Constraint name from the table schema
        constraint: String,
        /// Which kind of constraint failed
        kind: ViolationKind,
        /// Offending row
        row: RowId,
    },

    /// Arithmetic division by zero during expression evaluation
    #[error("division by zero")]
    DivisionByZero,

    /// Arithmetic overflow during expression evaluation
    #[error("numeric overflow")]
    NumericOverflow,

    /// Operation not valid for the current state (closed transaction,
    /// sealed registry, double release, ...)
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Mutation attempted through a read-only transaction or view
    #[error("transaction is read-only")]
    ReadOnly,

    /// The lock manager gave up waiting for an incompatible holder
    #[error("lock wait timed out after {0:?}")]
    LockTimeout(Duration),
}

/// Wire-layer error codes.
///
/// The client protocol transports one of these discriminants next to the
/// error message; [`Error::code`] provides the total mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Retryable: a read table was concurrently modified
    DirtySelect,
    /// Retryable: concurrent DDL on the same object name
    NamespaceConflict,
    /// Retryable: concurrent writes clashed on a physical row
    RowConflict,
    /// Retryable: a dropped table was concurrently modified
    DroppedModifiedConflict,
    /// A declarative constraint failed
    ConstraintViolation,
    /// Unknown object
    NotFound,
    /// Missing privilege
    PrivilegeDenied,
    /// I/O failure in the paged store
    StoreIo,
    /// Data integrity failure
    Corruption,
    /// Operation invalid for the current session/transaction state
    InvalidState,
}

impl Error {
    /// Map this error onto its wire-layer code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Io(_) => ErrorCode::StoreIo,
            Error::Serialization(_) | Error::Corruption(_) => ErrorCode::Corruption,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::PrivilegeDenied { .. } => ErrorCode::PrivilegeDenied,
            Error::DirtySelect { .. } => ErrorCode::DirtySelect,
            Error::ObjectDuplicated { .. } => ErrorCode::NamespaceConflict,
            Error::RowRemoveConflict { .. } => ErrorCode::RowConflict,
            Error::NonCommittedConflict { .. } => ErrorCode::RowConflict,
            Error::DroppedModified { .. } => ErrorCode::DroppedModifiedConflict,
            Error::ConstraintViolation { .. }
            | Error::DivisionByZero
            | Error::NumericOverflow => ErrorCode::ConstraintViolation,
            Error::InvalidState(_) | Error::ReadOnly | Error::LockTimeout(_) => {
                ErrorCode::InvalidState
            }
        }
    }

    /// Check whether this error is a commit conflict.
    ///
    /// Commit conflicts are the only retryable failures: the caller may
    /// open a fresh transaction and replay its statements.
    pub fn is_commit_conflict(&self) -> bool {
        matches!(
            self,
            Error::DirtySelect { .. }
                | Error::ObjectDuplicated { .. }
                | Error::RowRemoveConflict { .. }
                | Error::NonCommittedConflict { .. }
                | Error::DroppedModified { .. }
        )
    }

    /// Check whether this error leaves the database unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::TableId;

    #[test]
    fn commit_conflicts_are_retryable() {
        let errs = [
            Error::DirtySelect {
                table: "t".into(),
            },
            Error::ObjectDuplicated {
                name: "app.t".into(),
                action: "created",
            },
            Error::RowRemoveConflict {
                table: "t".into(),
                row: 4,
            },
            Error::NonCommittedConflict { table: "t".into() },
            Error::DroppedModified { table: "t".into() },
        ];
        for e in errs {
            assert!(e.is_commit_conflict(), "{e}");
            assert!(!e.is_fatal());
        }
    }

    #[test]
    fn constraint_violation_is_not_retryable() {
        let e = Error::ConstraintViolation {
            constraint: "pk_t".into(),
            kind: ViolationKind::PrimaryKey,
            row: RowId::new(TableId(1), 0),
        };
        assert!(!e.is_commit_conflict());
        assert_eq!(e.code(), ErrorCode::ConstraintViolation);
        assert!(e.to_string().contains("pk_t"));
        assert!(e.to_string().contains("PRIMARY KEY"));
    }

    #[test]
    fn corruption_is_fatal() {
        let e = Error::Corruption("bad magic in state header".into());
        assert!(e.is_fatal());
        assert_eq!(e.code(), ErrorCode::Corruption);
    }

    #[test]
    fn wire_codes_cover_conflicts() {
        assert_eq!(
            Error::DirtySelect { table: "t".into() }.code(),
            ErrorCode::DirtySelect
        );
        assert_eq!(
            Error::ObjectDuplicated {
                name: "t".into(),
                action: "dropped"
            }
            .code(),
            ErrorCode::NamespaceConflict
        );
        assert_eq!(
            Error::DroppedModified { table: "t".into() }.code(),
            ErrorCode::DroppedModifiedConflict
        );
    }

    #[test]
    fn io_error_converts() {
        let e: Error = io::Error::new(io::ErrorKind::Other, "disk full").into();
        assert_eq!(e.code(), ErrorCode::StoreIo);
    }

    #[test]
    fn division_by_zero_maps_to_constraint_code() {
        assert_eq!(Error::DivisionByZero.code(), ErrorCode::ConstraintViolation);
    }
}
