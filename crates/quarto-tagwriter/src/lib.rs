/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Drive template tags outside of a hosting template engine.
//!
//! Custom template tags normally run inside a container that calls their
//! lifecycle hooks in a fixed order. This crate performs that sequence
//! directly, which makes tags usable from unit tests and from programmatic
//! rendering:
//!
//! - [`TagWriter`] / [`dispatch`]: the lifecycle state machine (start, body
//!   include/buffer/iterate, end, catch, finally, release)
//! - [`evaluate`]: `${path}` token substitution in tag bodies, resolving
//!   dotted paths through statically declared accessors
//!
//! # Example
//!
//! ```ignore
//! use quarto_tagwriter::{PageContext, StartResult, Tag, TagContext, TagResult, dispatch_with_body};
//!
//! struct Shout;
//!
//! impl Tag for Shout {
//!     fn name(&self) -> &str { "shout" }
//!
//!     fn do_start_tag(&mut self, _ctx: &mut dyn TagContext) -> TagResult<StartResult> {
//!         Ok(StartResult::EvalBodyInclude)
//!     }
//! }
//!
//! let mut ctx = PageContext::new();
//! ctx.insert("name", "World");
//! dispatch_with_body(&mut Shout, &mut ctx, "Hello, ${name}!")?;
//! assert_eq!(ctx.output(), "Hello, World!");
//! ```

pub mod context;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod tag;
pub mod value;

// Re-export main types at crate root
pub use context::{BodyContent, PageContext, Scope, TagContext};
pub use dispatch::{DispatchOptions, DispatchOutcome, TagWriter, dispatch, dispatch_with_body};
pub use error::{AccessError, TagError, TagResult};
pub use evaluator::{evaluate, has_tokens, resolve_path};
pub use tag::{
    AfterBody, BodyTag, BodyTagSupport, EndResult, IterationTag, StartResult, Tag, TagSupport,
    TryCatchFinally,
};
pub use value::{Accessible, Accessor, TagValue, accessor_name};
