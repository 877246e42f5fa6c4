//! Box operation errors
//!
//! Request and precondition failures stop an operation immediately.
//! Per-secret failures never do: they are collected as `SecretFailure`s
//! and returned together inside an `AggregateError`.

use std::fmt;
use thiserror::Error;

/// Step of the per-secret pipeline where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Resolve,
    Fetch,
    Decrypt,
    Encrypt,
    Store,
    Track,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Fetch => "fetch",
            Self::Decrypt => "decrypt",
            Self::Encrypt => "encrypt",
            Self::Store => "store",
            Self::Track => "track",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure tied to one secret id
#[derive(Debug, Error)]
#[error("{id}: {stage} failed: {source:#}")]
pub struct SecretFailure {
    /// Raw id for resolve failures, canonical id otherwise
    pub id: String,
    pub stage: Stage,
    #[source]
    pub source: anyhow::Error,
}

impl SecretFailure {
    pub fn new(id: impl Into<String>, stage: Stage, source: anyhow::Error) -> Self {
        Self {
            id: id.into(),
            stage,
            source,
        }
    }
}

/// Every per-secret failure of one operation
#[derive(Debug)]
pub struct AggregateError {
    failures: Vec<SecretFailure>,
}

impl AggregateError {
    /// Returns `None` when there is nothing to report
    pub fn from_failures(failures: Vec<SecretFailure>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { failures })
        }
    }

    pub fn failures(&self) -> &[SecretFailure] {
        &self.failures
    }

    /// Ids that failed, in the order they were recorded
    pub fn ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.id.as_str()).collect()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} secret(s) failed:", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

impl From<SecretFailure> for AggregateError {
    fn from(failure: SecretFailure) -> Self {
        Self {
            failures: vec![failure],
        }
    }
}

/// Result of a box operation
#[derive(Debug, Error)]
pub enum BoxError {
    /// Nothing left to process after id resolution
    #[error("no secrets to process")]
    NoSecrets,

    /// Shared material (keys, registry) could not be loaded
    #[error("could not load {what}: {source:#}")]
    Precondition {
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The registry could not be written back
    #[error("could not save {what}: {source:#}")]
    Persist {
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    /// One or more secrets failed
    #[error(transparent)]
    Failed(#[from] AggregateError),
}

impl BoxError {
    /// Shared material failed to load. Cancellation passes through as is.
    pub fn precondition(what: &'static str, source: anyhow::Error) -> Self {
        if is_cancellation(&source) {
            return Self::Cancelled;
        }
        Self::Precondition { what, source }
    }

    /// The registry failed to save. Cancellation passes through as is.
    pub fn persist(what: &'static str, source: anyhow::Error) -> Self {
        if is_cancellation(&source) {
            return Self::Cancelled;
        }
        Self::Persist { what, source }
    }

    /// A single per-secret failure
    pub fn single(failure: SecretFailure) -> Self {
        Self::Failed(failure.into())
    }

    /// Per-secret failures, empty for request level errors
    pub fn failures(&self) -> &[SecretFailure] {
        match self {
            Self::Failed(agg) => agg.failures(),
            _ => &[],
        }
    }
}

/// True when `err` is (or wraps) `BoxError::Cancelled`
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<BoxError>(), Some(BoxError::Cancelled)))
}
