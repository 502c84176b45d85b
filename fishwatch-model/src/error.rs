use thiserror::Error;

/// Errors raised while interpreting model values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown action kind: {0}")]
    UnknownAction(String),
    #[error("unknown fact type: {0}")]
    UnknownFactType(String),
}
