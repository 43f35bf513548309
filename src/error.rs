//! Errors reported by model construction, node lookup and sampling.

use thiserror::Error;

use crate::node::Shape;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ModelError {
    #[error("no node is bound to `{name}`")]
    NotFound { name: String },

    #[error("node `{name}` holds a {found} value, but a {expected} handle was requested")]
    TypeMismatch {
        name: String,
        expected: Shape,
        found: Shape,
    },

    #[error("a node is already bound to `{name}`")]
    DuplicateBinding { name: String },

    #[error("node `{name}`: {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("node `{name}` must hold at least one element")]
    EmptyValue { name: String },

    #[error("invalid sampling configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = ModelError> = std::result::Result<T, E>;
