/*
 * value.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Values stored in a tag context and the accessors they expose.
//!
//! A token such as `${order.customer.name}` looks up `order` in the context
//! and then invokes `getCustomer` and `getName` on the resulting values.
//! Accessors are declared statically: maps expose one accessor per key, and
//! host types implement [`Accessible`] to answer the accessor names they
//! support. Nothing is discovered at runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::AccessError;

/// The name of a no-argument accessor, derived from a path segment.
///
/// The segment `customer` becomes the accessor `getCustomer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accessor {
    segment: String,
    name: String,
}

impl Accessor {
    /// Derive the accessor for a path segment.
    pub fn for_segment(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            name: accessor_name(segment),
        }
    }

    /// The path segment this accessor was derived from (`customer`).
    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// The accessor name (`getCustomer`).
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Build the accessor name for a path segment: `"get"` followed by the
/// segment with its first character upper-cased.
pub fn accessor_name(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => format!("get{}{}", first.to_uppercase(), chars.as_str()),
        None => "get".to_string(),
    }
}

/// A host type whose accessors can be reached from a token path.
///
/// Implementations match on [`Accessor::name`] and return the accessor's
/// result. Unknown names must produce [`AccessError::NoSuchAccessor`], never
/// [`TagValue::Null`]: a null result means "the property is unset", which
/// renders as an empty string.
///
/// ```ignore
/// #[derive(Debug)]
/// struct Customer { name: Option<String> }
///
/// impl Accessible for Customer {
///     fn type_name(&self) -> &str { "Customer" }
///
///     fn invoke(&self, accessor: &Accessor) -> Result<TagValue, AccessError> {
///         match accessor.name() {
///             "getName" => Ok(self.name.clone().into()),
///             _ => Err(self.no_such_accessor(accessor)),
///         }
///     }
/// }
/// ```
pub trait Accessible: fmt::Debug {
    /// Type name used in error messages.
    fn type_name(&self) -> &str;

    /// Invoke the named no-argument accessor.
    fn invoke(&self, accessor: &Accessor) -> Result<TagValue, AccessError>;

    /// Canonical string representation used when the object itself is the
    /// final value of a token.
    fn render(&self) -> String {
        format!("{:?}", self)
    }

    /// Convenience for the fallthrough arm of [`Accessible::invoke`].
    fn no_such_accessor(&self, accessor: &Accessor) -> AccessError {
        AccessError::NoSuchAccessor {
            type_name: self.type_name().to_string(),
            accessor: accessor.name().to_string(),
        }
    }

    /// Convenience for accessors that exist but must not be called.
    fn access_denied(&self, accessor: &Accessor) -> AccessError {
        AccessError::AccessDenied {
            type_name: self.type_name().to_string(),
            accessor: accessor.name().to_string(),
        }
    }
}

/// A value held by a tag context.
#[derive(Debug, Clone, Default)]
pub enum TagValue {
    /// An unset value. Renders as the empty string.
    #[default]
    Null,

    /// A string value.
    String(String),

    /// A boolean value.
    Bool(bool),

    /// An integer value.
    Int(i64),

    /// A floating point value.
    Float(f64),

    /// A list of values.
    List(Vec<TagValue>),

    /// Named fields, each reachable through its derived accessor.
    Map(BTreeMap<String, TagValue>),

    /// A host object with statically declared accessors.
    Object(Rc<dyn Accessible>),
}

impl TagValue {
    /// Wrap a host object.
    pub fn object(value: impl Accessible + 'static) -> Self {
        TagValue::Object(Rc::new(value))
    }

    /// Whether this value counts as absent during path resolution.
    pub fn is_null(&self) -> bool {
        matches!(self, TagValue::Null)
    }

    /// Type name used in error messages.
    pub fn type_name(&self) -> &str {
        match self {
            TagValue::Null => "Null",
            TagValue::String(_) => "String",
            TagValue::Bool(_) => "Bool",
            TagValue::Int(_) => "Int",
            TagValue::Float(_) => "Float",
            TagValue::List(_) => "List",
            TagValue::Map(_) => "Map",
            TagValue::Object(obj) => obj.type_name(),
        }
    }

    /// Invoke an accessor on this value.
    ///
    /// - Map: the accessor for `segment` reads the key `segment`. A missing
    ///   key has no accessor; a key holding `Null` is an unset property.
    /// - Object: delegates to [`Accessible::invoke`].
    /// - Scalars and lists declare no accessors.
    pub fn invoke(&self, accessor: &Accessor) -> Result<TagValue, AccessError> {
        match self {
            TagValue::Map(fields) => {
                fields
                    .get(accessor.segment())
                    .cloned()
                    .ok_or_else(|| AccessError::NoSuchAccessor {
                        type_name: self.type_name().to_string(),
                        accessor: accessor.name().to_string(),
                    })
            }
            TagValue::Object(obj) => obj.invoke(accessor),
            _ => Err(AccessError::NoSuchAccessor {
                type_name: self.type_name().to_string(),
                accessor: accessor.name().to_string(),
            }),
        }
    }

    /// Render this value as a string for output.
    ///
    /// - String: returned as-is
    /// - Bool: "true" or "false"
    /// - Int / Float: decimal representation
    /// - List: `[a, b, c]`
    /// - Map: `{key=value, ...}` in key order
    /// - Object: [`Accessible::render`]
    /// - Null: ""
    pub fn render(&self) -> String {
        match self {
            TagValue::Null => String::new(),
            TagValue::String(s) => s.clone(),
            TagValue::Bool(b) => b.to_string(),
            TagValue::Int(i) => i.to_string(),
            TagValue::Float(f) => f.to_string(),
            TagValue::List(items) => {
                let parts: Vec<String> = items.iter().map(render_nested).collect();
                format!("[{}]", parts.join(", "))
            }
            TagValue::Map(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, render_nested(v)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            TagValue::Object(obj) => obj.render(),
        }
    }
}

// Nulls nested inside containers are shown, not hidden.
fn render_nested(value: &TagValue) -> String {
    match value {
        TagValue::Null => "null".to_string(),
        other => other.render(),
    }
}

impl PartialEq for TagValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TagValue::Null, TagValue::Null) => true,
            (TagValue::String(a), TagValue::String(b)) => a == b,
            (TagValue::Bool(a), TagValue::Bool(b)) => a == b,
            (TagValue::Int(a), TagValue::Int(b)) => a == b,
            (TagValue::Float(a), TagValue::Float(b)) => a == b,
            (TagValue::List(a), TagValue::List(b)) => a == b,
            (TagValue::Map(a), TagValue::Map(b)) => a == b,
            (TagValue::Object(a), TagValue::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::String(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::String(s)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Bool(b)
    }
}

impl From<i64> for TagValue {
    fn from(i: i64) -> Self {
        TagValue::Int(i)
    }
}

impl From<f64> for TagValue {
    fn from(f: f64) -> Self {
        TagValue::Float(f)
    }
}

impl<T: Into<TagValue>> From<Option<T>> for TagValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(TagValue::Null, Into::into)
    }
}

impl<T: Into<TagValue>> From<Vec<T>> for TagValue {
    fn from(items: Vec<T>) -> Self {
        TagValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for TagValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => TagValue::Null,
            serde_json::Value::Bool(b) => TagValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => TagValue::Int(i),
                None => n.as_f64().map_or(TagValue::Null, TagValue::Float),
            },
            serde_json::Value::String(s) => TagValue::String(s),
            serde_json::Value::Array(items) => {
                TagValue::List(items.into_iter().map(TagValue::from).collect())
            }
            serde_json::Value::Object(fields) => TagValue::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, TagValue::from(v)))
                    .collect(),
            ),
        }
    }
}
