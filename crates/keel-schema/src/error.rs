//! Error types for schema diffing and planning.

/// Errors raised while validating, diffing, planning or emitting a schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The computed diff needs an operation the dialect cannot express
    /// safely.
    #[error("Unsupported change on {object}: {reason}")]
    UnsupportedChange {
        /// Object the change applies to (table, column or enum type).
        object: String,
        /// Why the change was rejected.
        reason: String,
    },

    /// Create/drop operations could not be ordered.
    #[error("Cyclic dependency between tables: {}", tables.join(", "))]
    CyclicDependency {
        /// Tables participating in the cycle.
        tables: Vec<String>,
    },

    /// The schema description violates a model invariant.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
}

impl SchemaError {
    /// Shorthand for an [`SchemaError::UnsupportedChange`].
    pub fn unsupported(object: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedChange {
            object: object.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
