//! Domain error taxonomy
//!
//! Every public inventory operation returns [`InventoryError`]. The variants
//! mirror the outcomes the REST layer distinguishes, so
//! [`InventoryError::status_code`] is all a router needs to pick a response.

use crate::executor::StoreError;
use std::fmt;

/// Errors surfaced by inventory operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// A referenced entity (shelf, position, module, container, job) is absent
    NotFound(String),
    /// A business rule was violated (capacity, owner/size class, occupancy, status)
    Validation(String),
    /// Required input was missing or malformed
    BadRequest(String),
    /// A concurrent writer claimed a shelf position first; the whole unit of work may be retried
    Conflict(String),
    /// Unclassified failure, carries the original error text
    Internal(String),
}

impl InventoryError {
    /// HTTP status code the REST layer answers with
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            InventoryError::NotFound(_) => 404,
            InventoryError::Validation(_) => 422,
            InventoryError::BadRequest(_) => 400,
            InventoryError::Conflict(_) => 409,
            InventoryError::Internal(_) => 500,
        }
    }

    /// Human readable detail without the variant prefix
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            InventoryError::NotFound(s)
            | InventoryError::Validation(s)
            | InventoryError::BadRequest(s)
            | InventoryError::Conflict(s)
            | InventoryError::Internal(s) => s,
        }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, InventoryError::Conflict(_))
    }
}

impl fmt::Display for InventoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryError::NotFound(s) => write!(f, "Not found: {s}"),
            InventoryError::Validation(s) => write!(f, "Validation error: {s}"),
            InventoryError::BadRequest(s) => write!(f, "Bad request: {s}"),
            InventoryError::Conflict(s) => write!(f, "Conflict: {s}"),
            InventoryError::Internal(s) => write!(f, "Internal error: {s}"),
        }
    }
}

impl std::error::Error for InventoryError {}

impl From<StoreError> for InventoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(s) => InventoryError::Conflict(s),
            other => InventoryError::Internal(other.to_string()),
        }
    }
}
