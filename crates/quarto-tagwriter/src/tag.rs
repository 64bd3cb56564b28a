/*
 * tag.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The tag abstraction driven by the dispatcher.
//!
//! Every tag implements [`Tag`]. Optional capabilities are separate traits,
//! and a tag opts into one by overriding the matching narrowing method:
//!
//! | Capability          | Trait               | Narrowing method                 |
//! |---------------------|---------------------|----------------------------------|
//! | Repeated body       | [`IterationTag`]    | [`Tag::as_iteration_tag`]        |
//! | Buffered body       | [`BodyTag`]         | [`Tag::as_body_tag`]             |
//! | Catch / finally     | [`TryCatchFinally`] | [`Tag::as_try_catch_finally`]    |
//!
//! A buffering tag is also an iterating tag, so a [`BodyTag`] implementation
//! should return itself from both `as_body_tag` and `as_iteration_tag`.

use crate::context::{BodyContent, TagContext};
use crate::error::{TagError, TagResult};

/// What the start hook asks the dispatcher to do with the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartResult {
    /// Evaluate the body and write it straight to the current output.
    EvalBodyInclude,
    /// Evaluate the body into the tag's own [`BodyContent`].
    EvalBodyBuffered,
    /// Do not evaluate the body.
    SkipBody,
}

/// What the after-body hook asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterBody {
    /// Evaluate the body once more.
    EvalBodyAgain,
    /// Stop iterating.
    SkipBody,
}

/// What the end hook asks of the rest of the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndResult {
    /// Continue with the rest of the page.
    #[default]
    EvalPage,
    /// Skip the rest of the page.
    SkipPage,
}

/// A template tag.
pub trait Tag {
    /// Human-readable name for this tag.
    ///
    /// Used for logging and error messages.
    fn name(&self) -> &str;

    /// Set (or clear) the enclosing tag.
    fn set_parent(&mut self, _parent: Option<&str>) {}

    /// Called once before the body is processed.
    fn do_start_tag(&mut self, ctx: &mut dyn TagContext) -> TagResult<StartResult>;

    /// Called once after the body has been processed.
    fn do_end_tag(&mut self, _ctx: &mut dyn TagContext) -> TagResult<EndResult> {
        Ok(EndResult::EvalPage)
    }

    /// Release any state held by the tag. Always the last call of a dispatch.
    fn release(&mut self) {}

    fn as_iteration_tag(&mut self) -> Option<&mut dyn IterationTag> {
        None
    }

    fn as_body_tag(&mut self) -> Option<&mut dyn BodyTag> {
        None
    }

    fn as_try_catch_finally(&mut self) -> Option<&mut dyn TryCatchFinally> {
        None
    }
}

/// A tag that can evaluate its body more than once.
pub trait IterationTag {
    /// Called after each body evaluation.
    fn do_after_body(&mut self, ctx: &mut dyn TagContext) -> TagResult<AfterBody>;
}

/// A tag that captures its body into a buffer instead of the page output.
pub trait BodyTag: IterationTag {
    /// Hand the tag the buffer its body will be captured into.
    fn set_body_content(&mut self, content: BodyContent);

    /// The buffer handed over by [`BodyTag::set_body_content`], if any.
    fn body_content_mut(&mut self) -> Option<&mut BodyContent>;

    /// Called once before the first buffered body evaluation.
    fn do_init_body(&mut self, _ctx: &mut dyn TagContext) -> TagResult<()> {
        Ok(())
    }
}

/// A tag that wants to observe failures and always clean up.
pub trait TryCatchFinally {
    /// Called with a failure raised by the start, body, or end step.
    ///
    /// Returning an error replaces the original failure.
    fn do_catch(&mut self, error: &TagError) -> TagResult<()>;

    /// Called after every dispatch, whether it failed or not.
    fn do_finally(&mut self);
}

/// Common tag state: the enclosing tag's name.
///
/// Tag implementations can embed this and forward [`Tag::set_parent`] to it.
#[derive(Debug, Clone, Default)]
pub struct TagSupport {
    parent: Option<String>,
}

impl TagSupport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_parent(&mut self, parent: Option<&str>) {
        self.parent = parent.map(str::to_string);
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn release(&mut self) {
        self.parent = None;
    }
}

/// Common state for buffering tags: [`TagSupport`] plus the body buffer.
#[derive(Debug, Clone, Default)]
pub struct BodyTagSupport {
    pub tag: TagSupport,
    body_content: Option<BodyContent>,
}

impl BodyTagSupport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_body_content(&mut self, content: BodyContent) {
        self.body_content = Some(content);
    }

    pub fn body_content(&self) -> Option<&BodyContent> {
        self.body_content.as_ref()
    }

    pub fn body_content_mut(&mut self) -> Option<&mut BodyContent> {
        self.body_content.as_mut()
    }

    /// Remove and return the captured body.
    pub fn take_body_content(&mut self) -> Option<BodyContent> {
        self.body_content.take()
    }

    pub fn release(&mut self) {
        self.tag.release();
        self.body_content = None;
    }
}
