use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Domain error taxonomy for route planning operations.
///
/// Every variant is raised before any partial state change, except
/// [`Error::RouteComputation`] and [`Error::Storage`], which abort the
/// operation's transaction and leave the route as it was.
#[derive(Error, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    /// Malformed input: bad field values or non-existent identifiers.
    #[error("code: validation, description: {0}")]
    Validation(String),

    /// The stop is already part of the route.
    #[error("code: duplicate, description: {0}")]
    Duplicate(String),

    /// Reorder positions are equal or unoccupied.
    #[error("code: invalid_order, description: {0}")]
    InvalidOrder(String),

    /// A referenced route, stop, or link does not exist.
    #[error("code: not_found, description: {0}")]
    NotFound(String),

    /// The external route provider failed or returned a malformed payload.
    #[error("code: route_computation, description: {0}")]
    RouteComputation(String),

    /// The underlying store failed; always fatal to the current operation.
    #[error("code: storage, description: {0}")]
    Storage(String),
}

impl Error {
    /// Returns the stable error code.
    #[must_use]
    pub const fn code(&self) -> &str {
        match self {
            Self::Validation(_) => "validation",
            Self::Duplicate(_) => "duplicate",
            Self::InvalidOrder(_) => "invalid_order",
            Self::NotFound(_) => "not_found",
            Self::RouteComputation(_) => "route_computation",
            Self::Storage(_) => "storage",
        }
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> String {
        self.to_string()
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        let chain = err.chain().map(ToString::to_string).collect::<Vec<_>>().join(" -> ");

        // if the cause is already a domain error, keep its variant with the
        // accumulated context
        if let Some(inner) = err.downcast_ref::<Self>() {
            return match inner {
                Self::Validation(_) => Self::Validation(chain),
                Self::Duplicate(_) => Self::Duplicate(chain),
                Self::InvalidOrder(_) => Self::InvalidOrder(chain),
                Self::NotFound(_) => Self::NotFound(chain),
                Self::RouteComputation(_) => Self::RouteComputation(chain),
                Self::Storage(_) => Self::Storage(chain),
            };
        }

        Self::Storage(chain)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}
