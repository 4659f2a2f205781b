use thiserror::Error;

/// Result type for AST construction and compilation.
pub type Result<T> = std::result::Result<T, SqlError>;

/// Errors raised while building or compiling a relation.
///
/// Both kinds are "bad query shape" failures, reported synchronously and
/// never coerced into execution errors. Anything the database itself
/// rejects surfaces as [`crate::engine::AdapterError`] instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SqlError {
    /// Malformed AST detected at construction time (operand from an
    /// unrelated relation tree, collection where a scalar was expected).
    #[error("query shape error: {0}")]
    Shape(String),

    /// Compilation failure (unresolvable attribute, missing table).
    #[error("compile error: {0}")]
    Compile(String),
}

impl SqlError {
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }
}
