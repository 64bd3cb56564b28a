/*
 * context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The context a tag runs against.
//!
//! A context answers two questions for the dispatcher and the token
//! evaluator: "what is the value of this variable?" and "where does output
//! go right now?". [`TagContext`] is the interface the crate consumes;
//! [`PageContext`] is an in-memory implementation suitable for tests and
//! programmatic rendering.

use std::collections::HashMap;
use std::fmt;

use crate::error::{TagError, TagResult};
use crate::value::TagValue;

/// A text buffer that receives tag output.
///
/// The context's output target is a `BodyContent`, and buffering tags are
/// handed one of their own to capture their body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyContent {
    buffer: String,
}

impl BodyContent {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text to the buffer.
    pub fn append(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// The buffered text.
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Discard everything buffered so far.
    pub fn clear_body(&mut self) {
        self.buffer.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Copy the buffered text into another output target.
    pub fn write_out(&self, out: &mut BodyContent) {
        out.append(&self.buffer);
    }

    /// Consume the buffer and return its text.
    pub fn into_string(self) -> String {
        self.buffer
    }
}

impl fmt::Write for BodyContent {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append(s);
        Ok(())
    }
}

impl fmt::Display for BodyContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buffer)
    }
}

/// The host surface a tag is dispatched against.
pub trait TagContext {
    /// Find a variable by name, searching outward through nested scopes.
    ///
    /// Returns `Ok(None)` when no scope holds the name. Implementations may
    /// reject degenerate names with an error.
    fn find_attribute(&self, name: &str) -> TagResult<Option<TagValue>>;

    /// Set a variable in the innermost scope.
    fn set_attribute(&mut self, name: &str, value: TagValue);

    /// Remove a variable from every scope.
    fn remove_attribute(&mut self, name: &str);

    /// The current output target.
    fn out(&mut self) -> &mut BodyContent;

    /// Redirect output to a fresh buffer, saving the current target.
    fn push_body(&mut self);

    /// Restore the output target saved by the matching [`TagContext::push_body`],
    /// returning the buffer that was being written to.
    fn pop_body(&mut self) -> Option<BodyContent>;
}

/// Attribute scopes, in the order [`PageContext`] lookups searches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Page,
    Request,
    Session,
    Application,
}

impl Scope {
    /// All scopes from innermost to outermost.
    pub const ALL: [Scope; 4] = [
        Scope::Page,
        Scope::Request,
        Scope::Session,
        Scope::Application,
    ];
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "page" => Ok(Scope::Page),
            "request" => Ok(Scope::Request),
            "session" => Ok(Scope::Session),
            "application" => Ok(Scope::Application),
            other => Err(format!("unknown scope: {}", other)),
        }
    }
}

/// An in-memory [`TagContext`] with four attribute scopes and an output stack.
#[derive(Debug)]
pub struct PageContext {
    scopes: HashMap<Scope, HashMap<String, TagValue>>,

    /// Base output followed by any pushed bodies; the last entry is current.
    writers: Vec<BodyContent>,
}

impl PageContext {
    /// Create a context with empty scopes and an empty output.
    pub fn new() -> Self {
        Self {
            scopes: HashMap::new(),
            writers: vec![BodyContent::new()],
        }
    }

    /// Insert a page-scoped variable.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<TagValue>) {
        self.insert_in(name, value, Scope::Page);
    }

    /// Insert a variable in the given scope.
    pub fn insert_in(
        &mut self,
        name: impl Into<String>,
        value: impl Into<TagValue>,
        scope: Scope,
    ) {
        self.scopes
            .entry(scope)
            .or_default()
            .insert(name.into(), value.into());
    }

    /// Get a variable from one scope only.
    pub fn get_in(&self, name: &str, scope: Scope) -> Option<&TagValue> {
        self.scopes.get(&scope).and_then(|vars| vars.get(name))
    }

    /// Text written to the base output so far.
    pub fn output(&self) -> &str {
        self.writers.first().map_or("", BodyContent::as_str)
    }

    /// Number of bodies currently pushed on top of the base output.
    pub fn body_depth(&self) -> usize {
        self.writers.len().saturating_sub(1)
    }
}

impl Default for PageContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TagContext for PageContext {
    fn find_attribute(&self, name: &str) -> TagResult<Option<TagValue>> {
        if name.is_empty() {
            return Err(TagError::InvalidAttributeName {
                name: name.to_string(),
            });
        }

        Ok(Scope::ALL
            .iter()
            .find_map(|scope| self.get_in(name, *scope))
            .cloned())
    }

    fn set_attribute(&mut self, name: &str, value: TagValue) {
        self.insert_in(name, value, Scope::Page);
    }

    fn remove_attribute(&mut self, name: &str) {
        for vars in self.scopes.values_mut() {
            vars.remove(name);
        }
    }

    fn out(&mut self) -> &mut BodyContent {
        if self.writers.is_empty() {
            self.writers.push(BodyContent::new());
        }
        let last = self.writers.len() - 1;
        &mut self.writers[last]
    }

    fn push_body(&mut self) {
        self.writers.push(BodyContent::new());
    }

    fn pop_body(&mut self) -> Option<BodyContent> {
        // The base output is never popped.
        if self.writers.len() > 1 {
            self.writers.pop()
        } else {
            None
        }
    }
}
