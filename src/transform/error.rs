//! Transform error types

use thiserror::Error;

/// Errors raised while compiling or evaluating a transform
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// Malformed transform text; `position` is a byte offset into the source
    #[error("Syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    /// Call to a function the registry does not know
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Function called with the wrong number of arguments
    #[error("Function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    /// Operand of the wrong type at evaluation time
    #[error("Type error: {0}")]
    Type(String),

    /// Any other evaluation failure
    #[error("Evaluation error: {0}")]
    Eval(String),
}

impl TransformError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        TransformError::Syntax {
            position,
            message: message.into(),
        }
    }
}

/// Result type for transform operations
pub type TransformResult<T> = Result<T, TransformError>;
