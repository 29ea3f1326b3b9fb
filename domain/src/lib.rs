//! Domain library for the improvement store.
//!
//! This crate holds the domain records, the repository port (trait), and the
//! error definitions. Keep store adapters and IO concerns out of this crate;
//! the in-memory adapter under `adapters/` exists for tests and local demos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a stored improvement.
///
/// Global uniqueness is delegated to the store's primary-key constraint;
/// this type only rejects values that could never act as a key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImprovementId(String);

impl ImprovementId {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        if val.trim().is_empty() {
            return Err(CoreError::InvalidId("empty".into()));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The source item an improvement is derived from. Embedded in exactly one
/// [`Improvement`], never shared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Original {
    pub title: String,
    pub summary: String,
    pub link: String,
    /// Stored as whole epoch seconds UTC, so sub-second precision is lost
    /// on a store round trip.
    pub date: DateTime<Utc>,
    /// Absent when the source item carried no image.
    pub image_link: Option<String>,
}

/// A rewritten/enhanced version of an [`Original`], with its own identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Improvement {
    pub id: ImprovementId,
    pub title: String,
    pub summary: String,
    pub original: Original,
}

impl Improvement {
    /// Create a new improvement with a generated v4 UUID identifier.
    pub fn new<T: Into<String>, S: Into<String>>(title: T, summary: S, original: Original) -> Self {
        Self {
            id: ImprovementId(uuid::Uuid::new_v4().to_string()),
            title: title.into(),
            summary: summary.into(),
            original,
        }
    }

    /// Reconstruct an improvement that already has an identifier, e.g. when
    /// loading rows back from a store.
    pub fn with_id<T: Into<String>, S: Into<String>>(
        id: ImprovementId,
        title: T,
        summary: S,
        original: Original,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            summary: summary.into(),
            original,
        }
    }
}

/// Repository port for persisting and loading improvements.
///
/// Implementations issue a single store call per operation: no retries, no
/// caching, and no partial-failure handling for the batch variants beyond
/// whatever the store provides natively.
pub trait ImprovementRepository: Send + Sync {
    /// Insert a single improvement. Duplicate ids are rejected by the store's
    /// primary-key constraint, not checked here.
    fn add(&self, improvement: Improvement) -> Result<(), CoreError>;

    /// Insert a batch in one call. An empty batch succeeds without touching
    /// the store.
    fn add_all(&self, improvements: Vec<Improvement>) -> Result<(), CoreError>;

    /// Load the improvement with the given id.
    fn get(&self, id: &ImprovementId) -> Result<Improvement, CoreError>;

    /// Load improvements ordered by original date, newest first. `last_n`
    /// caps the count; `None` returns everything.
    fn get_all(&self, last_n: Option<usize>) -> Result<Vec<Improvement>, CoreError>;

    /// Delete the improvement with the given id and return it as the store
    /// saw it last.
    fn remove(&self, id: &ImprovementId) -> Result<Improvement, CoreError>;

    /// Delete a batch of ids in one call and return the deleted records.
    /// A delete that affects zero rows is an error.
    fn remove_all(&self, ids: &[ImprovementId]) -> Result<Vec<Improvement>, CoreError>;
}

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid improvement id: {0}")]
    InvalidId(String),
    #[error("invalid link: {0}")]
    InvalidLink(String),
    #[error("improvement not found: {0}")]
    NotFound(String),
    #[error("improvement already exists: {0}")]
    AlreadyExists(String),
    #[error("configuration error for {field}: {message}")]
    Config {
        field: &'static str,
        message: String,
    },
    #[error("repository error: {0}")]
    Repository(String),
}

pub mod adapters;
pub mod validate;
