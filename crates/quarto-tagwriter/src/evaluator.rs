/*
 * evaluator.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Token substitution for tag bodies.
//!
//! Body text may contain tokens of the form `${path}` where `path` is a
//! dot-separated list of names:
//!
//! ```text
//! ${customer}             -> context variable `customer`
//! ${customer.name}        -> customer.getName()
//! ${customer.address.zip} -> customer.getAddress().getZip()
//! ```
//!
//! An unset value anywhere along the chain renders the token as the empty
//! string. An accessor that does not exist, is not accessible, or fails is an
//! error for the whole evaluation.

use regex::Regex;
use std::sync::LazyLock;

use crate::context::TagContext;
use crate::error::{TagError, TagResult};
use crate::value::{Accessor, TagValue};

/// Pattern for body tokens: `${path}`
///
/// Matches:
/// - Opening `${`
/// - The path (captured group 1) - one or more characters except `}`
/// - Closing `}`
static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("Invalid regex pattern for tokens"));

/// Replace every token in `text` with its resolved value.
///
/// Literal text between tokens is copied unchanged. Returns the first
/// accessor failure as [`TagError::EvaluationError`].
pub fn evaluate(context: &dyn TagContext, text: &str) -> TagResult<String> {
    let mut result = String::with_capacity(text.len());
    let mut last_end = 0;

    for caps in TOKEN_PATTERN.captures_iter(text) {
        let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
            continue;
        };

        result.push_str(&text[last_end..whole.start()]);
        let value = resolve_path(context, path.as_str())?;
        result.push_str(&value.render());
        last_end = whole.end();
    }

    result.push_str(&text[last_end..]);
    Ok(result)
}

/// Check if `text` contains any tokens.
///
/// Useful to skip evaluation of bodies that are pure literal text.
pub fn has_tokens(text: &str) -> bool {
    TOKEN_PATTERN.is_match(text)
}

/// Resolve a dotted path against the context.
///
/// Returns [`TagValue::Null`] when the variable or any intermediate value is
/// unset.
pub fn resolve_path(context: &dyn TagContext, path: &str) -> TagResult<TagValue> {
    let segments = split_path(path);
    let Some((first, rest)) = segments.split_first() else {
        return Ok(TagValue::Null);
    };

    let mut value = match context.find_attribute(first) {
        Ok(found) => found.unwrap_or_default(),
        Err(e) => {
            // A lookup that cannot succeed is the same as an unset variable here.
            tracing::trace!(name = %first, error = %e, "Variable lookup failed; treating as unset");
            TagValue::Null
        }
    };

    for segment in rest {
        if value.is_null() {
            break;
        }

        let accessor = Accessor::for_segment(segment);
        value = value
            .invoke(&accessor)
            .map_err(|cause| TagError::EvaluationError {
                path: path.to_string(),
                cause,
            })?;
    }

    Ok(value)
}

/// Split a path on `.`, dropping trailing empty segments (`a.b.` is `a.b`).
fn split_path(path: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = path.split('.').collect();
    while segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }
    segments
}
