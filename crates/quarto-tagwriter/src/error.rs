/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for tag dispatch and token evaluation.

use thiserror::Error;

/// Errors that can occur while driving a tag or evaluating its body.
#[derive(Debug, Error)]
pub enum TagError {
    /// The tag asked for a buffered body but cannot hold one.
    #[error("Buffered body content is only allowed for body tags (tag: {tag})")]
    BufferingUnsupported { tag: String },

    /// A lifecycle hook (start, after-body, end, init-body) failed.
    #[error("Tag '{tag}' failed in {hook}: {message}")]
    Lifecycle {
        tag: String,
        hook: String,
        message: String,
    },

    /// The tag's catch hook itself failed. The failure it was handling is not kept.
    #[error("Error handler of tag '{tag}' failed: {source}")]
    ErrorHandling {
        tag: String,
        #[source]
        source: Box<TagError>,
    },

    /// An accessor chain could not be resolved.
    #[error("Evaluation error in ${{{path}}}: {cause}")]
    EvaluationError {
        path: String,
        #[source]
        cause: AccessError,
    },

    /// A variable lookup was given a name no scope can hold.
    #[error("Invalid attribute name: {name:?}")]
    InvalidAttributeName { name: String },

    /// The after-body hook kept asking for another pass past the configured limit.
    #[error("Tag '{tag}' exceeded the maximum of {max_iterations} body evaluations")]
    IterationLimit { tag: String, max_iterations: usize },
}

impl TagError {
    /// Build a lifecycle failure for `hook` of `tag`.
    pub fn lifecycle(
        tag: impl Into<String>,
        hook: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        TagError::Lifecycle {
            tag: tag.into(),
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// Whether this is a configuration problem rather than a runtime failure.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, TagError::BufferingUnsupported { .. })
    }
}

/// Reasons an accessor invocation can fail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccessError {
    /// The value's type declares no such accessor.
    #[error("{type_name} has no accessor {accessor}()")]
    NoSuchAccessor { type_name: String, accessor: String },

    /// The accessor exists but is not accessible.
    #[error("{type_name}.{accessor}() is not accessible")]
    AccessDenied { type_name: String, accessor: String },

    /// The accessor ran and raised.
    #[error("{type_name}.{accessor}() failed: {message}")]
    AccessorFailed {
        type_name: String,
        accessor: String,
        message: String,
    },
}

/// Result type for tag operations.
pub type TagResult<T> = Result<T, TagError>;
