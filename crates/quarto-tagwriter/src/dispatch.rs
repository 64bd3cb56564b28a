/*
 * dispatch.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tag lifecycle dispatch.
//!
//! [`TagWriter::write`] drives a tag through the same sequence of calls a
//! hosting template engine would make:
//!
//! ```text
//! set_parent(None)
//! do_start_tag
//!   EvalBodyInclude  -> evaluate body -> out        (repeat while do_after_body says again)
//!   EvalBodyBuffered -> push_body, set_body_content, do_init_body,
//!                       evaluate body -> out -> body content
//!                       (repeat while do_after_body says again),
//!                       pop_body -> body content
//!   SkipBody         -> nothing
//! do_end_tag
//! on failure: do_catch
//! always:     do_finally, release
//! ```
//!
//! A failure handled by `do_catch` does not fail the dispatch. It is reported
//! in [`DispatchOutcome::recovered`] instead, unless strict mode is on, in
//! which case it is returned as the error after cleanup.

use std::borrow::Cow;

use crate::context::{BodyContent, TagContext};
use crate::error::{TagError, TagResult};
use crate::evaluator::{evaluate, has_tokens};
use crate::tag::{AfterBody, BodyTag, EndResult, StartResult, Tag};

/// Configuration for [`TagWriter`].
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Return failures handled by `do_catch` as errors instead of reporting
    /// them in the outcome.
    pub strict_mode: bool,

    /// Maximum number of body evaluations per dispatch. `None` is unbounded.
    pub max_iterations: Option<usize>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable strict mode.
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Cap the number of body evaluations.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }
}

/// The result of a completed dispatch.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// What the end hook returned. `None` when a failure cut the lifecycle short.
    pub end: Option<EndResult>,

    /// A failure that the tag's `do_catch` handled.
    pub recovered: Option<TagError>,
}

impl DispatchOutcome {
    /// Whether the lifecycle ran to completion without a handled failure.
    pub fn is_clean(&self) -> bool {
        self.recovered.is_none()
    }

    /// Whether the end hook asked to skip the rest of the page.
    pub fn skip_page(&self) -> bool {
        self.end == Some(EndResult::SkipPage)
    }
}

/// Drives tags through their lifecycle.
#[derive(Debug, Clone, Default)]
pub struct TagWriter {
    options: DispatchOptions,
}

impl TagWriter {
    /// Create a writer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: DispatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Run the full lifecycle of `tag` against `ctx`.
    ///
    /// `body` is the tag body text. It is evaluated for tokens each time the
    /// tag asks for its body; without it, the start result is ignored and the
    /// end hook follows directly.
    ///
    /// # Errors
    ///
    /// - [`TagError::BufferingUnsupported`] if the tag asks for a buffered body
    ///   but is not a [`BodyTag`]. `do_catch` is not called for this.
    /// - [`TagError::ErrorHandling`] if `do_catch` fails.
    /// - Any lifecycle failure, if the tag does not implement
    ///   [`crate::tag::TryCatchFinally`] or strict mode is on.
    ///
    /// `do_finally` (when implemented) and `release` run on every path.
    pub fn write(
        &self,
        tag: &mut dyn Tag,
        ctx: &mut dyn TagContext,
        body: Option<&str>,
    ) -> TagResult<DispatchOutcome> {
        tag.set_parent(None);
        tracing::debug!(tag = tag.name(), has_body = body.is_some(), "Dispatching tag");

        let outcome = match self.run(tag, ctx, body) {
            Ok(end) => Ok(DispatchOutcome {
                end: Some(end),
                recovered: None,
            }),
            Err(e) if e.is_configuration_error() => Err(e),
            Err(e) => self.handle_failure(tag, e),
        };

        if let Some(tcf) = tag.as_try_catch_finally() {
            tcf.do_finally();
        }
        tag.release();

        outcome
    }

    fn run(
        &self,
        tag: &mut dyn Tag,
        ctx: &mut dyn TagContext,
        body: Option<&str>,
    ) -> TagResult<EndResult> {
        let start = tag.do_start_tag(ctx)?;
        tracing::trace!(tag = tag.name(), ?start, "Start tag returned");

        if let Some(body) = body {
            match start {
                StartResult::EvalBodyInclude => self.include_body(tag, ctx, body)?,
                StartResult::EvalBodyBuffered => self.buffer_body(tag, ctx, body)?,
                StartResult::SkipBody => {}
            }
        }

        tag.do_end_tag(ctx)
    }

    /// Evaluate the body straight into the current output.
    fn include_body(
        &self,
        tag: &mut dyn Tag,
        ctx: &mut dyn TagContext,
        body: &str,
    ) -> TagResult<()> {
        let name = tag.name().to_string();
        let literal = !has_tokens(body);
        let mut passes = 0;

        loop {
            self.count_pass(&name, &mut passes)?;
            let text = render_body(ctx, body, literal)?;
            ctx.out().append(&text);

            // Tags without iteration get exactly one pass.
            let Some(iteration) = tag.as_iteration_tag() else {
                break;
            };
            if iteration.do_after_body(ctx)? != AfterBody::EvalBodyAgain {
                break;
            }
        }

        tracing::trace!(tag = %name, passes, "Included body");
        Ok(())
    }

    /// Evaluate the body into the tag's own buffer, with the context's output
    /// redirected for the duration.
    ///
    /// Everything written to the redirected output, by the evaluated body or
    /// by the tag's hooks through `ctx.out()`, ends up in the tag's
    /// [`BodyContent`] in the order it was written.
    fn buffer_body(
        &self,
        tag: &mut dyn Tag,
        ctx: &mut dyn TagContext,
        body: &str,
    ) -> TagResult<()> {
        let name = tag.name().to_string();
        let Some(body_tag) = tag.as_body_tag() else {
            return Err(TagError::BufferingUnsupported { tag: name });
        };

        ctx.push_body();
        let result = self.fill_buffer(&name, body_tag, ctx, body);
        // Restored on failure too.
        match ctx.pop_body() {
            Some(rest) => capture(body_tag, rest),
            None => tracing::warn!(tag = %name, "Context had no pushed body to restore"),
        }
        result
    }

    fn fill_buffer(
        &self,
        name: &str,
        body_tag: &mut dyn BodyTag,
        ctx: &mut dyn TagContext,
        body: &str,
    ) -> TagResult<()> {
        body_tag.set_body_content(BodyContent::new());
        body_tag.do_init_body(ctx)?;

        let literal = !has_tokens(body);
        let mut passes = 0;
        loop {
            self.count_pass(name, &mut passes)?;
            let text = render_body(ctx, body, literal)?;
            ctx.out().append(&text);
            // The tag sees this pass, and anything its hooks wrote, before
            // deciding whether to go again.
            capture(body_tag, std::mem::take(ctx.out()));

            if body_tag.do_after_body(ctx)? != AfterBody::EvalBodyAgain {
                break;
            }
        }

        tracing::trace!(tag = name, passes, "Buffered body");
        Ok(())
    }

    fn count_pass(&self, name: &str, passes: &mut usize) -> TagResult<()> {
        *passes += 1;
        match self.options.max_iterations {
            Some(max) if *passes > max => Err(TagError::IterationLimit {
                tag: name.to_string(),
                max_iterations: max,
            }),
            _ => Ok(()),
        }
    }

    /// Route a lifecycle failure to the tag's catch hook, if it has one.
    fn handle_failure(&self, tag: &mut dyn Tag, error: TagError) -> TagResult<DispatchOutcome> {
        let name = tag.name().to_string();
        let Some(tcf) = tag.as_try_catch_finally() else {
            tracing::debug!(tag = %name, error = %error, "Tag failed");
            return Err(error);
        };

        if let Err(handler_error) = tcf.do_catch(&error) {
            tracing::debug!(tag = %name, error = %handler_error, "Catch hook failed");
            return Err(TagError::ErrorHandling {
                tag: name,
                source: Box::new(handler_error),
            });
        }

        if self.options.strict_mode {
            return Err(error);
        }

        tracing::warn!(tag = %name, error = %error, "Tag failure handled by catch hook");
        Ok(DispatchOutcome {
            end: None,
            recovered: Some(error),
        })
    }
}

/// One pass of body text. Bodies without tokens are copied as is.
fn render_body<'a>(
    ctx: &dyn TagContext,
    body: &'a str,
    literal: bool,
) -> TagResult<Cow<'a, str>> {
    if literal {
        Ok(Cow::Borrowed(body))
    } else {
        evaluate(ctx, body).map(Cow::Owned)
    }
}

/// Move redirected output into the tag's body content.
fn capture(body_tag: &mut dyn BodyTag, pending: BodyContent) {
    if pending.is_empty() {
        return;
    }
    match body_tag.body_content_mut() {
        Some(content) => content.append(pending.as_str()),
        // The tag took its buffer mid-body; start it a new one.
        None => body_tag.set_body_content(pending),
    }
}

/// Dispatch a tag without a body.
pub fn dispatch(tag: &mut dyn Tag, ctx: &mut dyn TagContext) -> TagResult<DispatchOutcome> {
    TagWriter::new().write(tag, ctx, None)
}

/// Dispatch a tag with body text to evaluate for tokens.
pub fn dispatch_with_body(
    tag: &mut dyn Tag,
    ctx: &mut dyn TagContext,
    body: &str,
) -> TagResult<DispatchOutcome> {
    TagWriter::new().write(tag, ctx, Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PageContext;
    use crate::tag::{BodyTagSupport, IterationTag, TryCatchFinally};
    use pretty_assertions::assert_eq;

    /// A tag whose behavior is configured per test and which records every
    /// hook call in order.
    #[derive(Default)]
    struct ScriptedTag {
        start: Option<StartResult>,
        again: usize,
        fail_in: Option<&'static str>,
        catch_fails: bool,
        iterates: bool,
        buffers: bool,
        catches: bool,
        after_body_output: Option<&'static str>,
        support: BodyTagSupport,
        events: Vec<String>,
    }

    impl ScriptedTag {
        fn new(start: StartResult) -> Self {
            Self {
                start: Some(start),
                ..Self::default()
            }
        }

        fn hook(&mut self, name: &str) -> TagResult<()> {
            self.events.push(name.to_string());
            if self.fail_in == Some(name) {
                Err(TagError::lifecycle("scripted", name, "scripted failure"))
            } else {
                Ok(())
            }
        }

        fn count(&self, event: &str) -> usize {
            self.events.iter().filter(|e| *e == event).count()
        }

        fn called(&self, event: &str) -> bool {
            self.count(event) > 0
        }
    }

    impl Tag for ScriptedTag {
        fn name(&self) -> &str {
            "scripted"
        }

        fn set_parent(&mut self, parent: Option<&str>) {
            self.events.push("set_parent".to_string());
            self.support.tag.set_parent(parent);
        }

        fn do_start_tag(&mut self, _ctx: &mut dyn TagContext) -> TagResult<StartResult> {
            self.hook("do_start_tag")?;
            Ok(self.start.unwrap_or(StartResult::SkipBody))
        }

        fn do_end_tag(&mut self, ctx: &mut dyn TagContext) -> TagResult<EndResult> {
            self.hook("do_end_tag")?;
            if let Some(content) = self.support.body_content() {
                content.write_out(ctx.out());
            }
            Ok(EndResult::EvalPage)
        }

        fn release(&mut self) {
            self.events.push("release".to_string());
        }

        fn as_iteration_tag(&mut self) -> Option<&mut dyn IterationTag> {
            if self.iterates || self.buffers {
                Some(self)
            } else {
                None
            }
        }

        fn as_body_tag(&mut self) -> Option<&mut dyn BodyTag> {
            if self.buffers { Some(self) } else { None }
        }

        fn as_try_catch_finally(&mut self) -> Option<&mut dyn TryCatchFinally> {
            if self.catches { Some(self) } else { None }
        }
    }

    impl IterationTag for ScriptedTag {
        fn do_after_body(&mut self, ctx: &mut dyn TagContext) -> TagResult<AfterBody> {
            self.hook("do_after_body")?;
            if let Some(text) = self.after_body_output {
                ctx.out().append(text);
            }
            if self.again > 0 {
                self.again -= 1;
                Ok(AfterBody::EvalBodyAgain)
            } else {
                Ok(AfterBody::SkipBody)
            }
        }
    }

    impl BodyTag for ScriptedTag {
        fn set_body_content(&mut self, content: BodyContent) {
            self.events.push("set_body_content".to_string());
            self.support.set_body_content(content);
        }

        fn body_content_mut(&mut self) -> Option<&mut BodyContent> {
            self.support.body_content_mut()
        }

        fn do_init_body(&mut self, _ctx: &mut dyn TagContext) -> TagResult<()> {
            self.hook("do_init_body")
        }
    }

    impl TryCatchFinally for ScriptedTag {
        fn do_catch(&mut self, _error: &TagError) -> TagResult<()> {
            self.events.push("do_catch".to_string());
            if self.catch_fails {
                Err(TagError::lifecycle("scripted", "do_catch", "handler failure"))
            } else {
                Ok(())
            }
        }

        fn do_finally(&mut self) {
            self.events.push("do_finally".to_string());
        }
    }

    #[test]
    fn test_plain_tag_without_body() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyInclude);
        let mut ctx = PageContext::new();

        let outcome = dispatch(&mut tag, &mut ctx).unwrap();

        assert!(outcome.is_clean());
        assert_eq!(outcome.end, Some(EndResult::EvalPage));
        assert_eq!(
            tag.events,
            vec!["set_parent", "do_start_tag", "do_end_tag", "release"]
        );
        assert_eq!(ctx.output(), "");
    }

    #[test]
    fn test_parent_is_cleared() {
        let mut tag = ScriptedTag::new(StartResult::SkipBody);
        tag.support.tag.set_parent(Some("stale"));
        let mut ctx = PageContext::new();

        dispatch(&mut tag, &mut ctx).unwrap();
        assert_eq!(tag.support.tag.parent(), None);
    }

    #[test]
    fn test_include_body_once_without_iteration() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyInclude);
        tag.again = 3;
        let mut ctx = PageContext::new();
        ctx.insert("name", "World");

        dispatch_with_body(&mut tag, &mut ctx, "Hello, ${name}!").unwrap();

        assert_eq!(ctx.output(), "Hello, World!");
        assert!(!tag.called("do_after_body"));
    }

    #[test]
    fn test_include_body_iterates() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyInclude);
        tag.iterates = true;
        tag.again = 2;
        let mut ctx = PageContext::new();
        ctx.insert("x", "ab");

        dispatch_with_body(&mut tag, &mut ctx, "[${x}]").unwrap();

        assert_eq!(ctx.output(), "[ab][ab][ab]");
        assert_eq!(tag.count("do_after_body"), 3);
    }

    #[test]
    fn test_skip_body_never_evaluates() {
        let mut tag = ScriptedTag::new(StartResult::SkipBody);
        tag.iterates = true;
        let mut ctx = PageContext::new();
        ctx.insert("broken", "text");

        // Evaluating this body would fail, so success proves it was skipped
        let outcome = dispatch_with_body(&mut tag, &mut ctx, "${broken.value}").unwrap();

        assert!(outcome.is_clean());
        assert_eq!(ctx.output(), "");
        assert_eq!(
            tag.events,
            vec!["set_parent", "do_start_tag", "do_end_tag", "release"]
        );
    }

    #[test]
    fn test_buffered_body() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyBuffered);
        tag.buffers = true;
        tag.again = 1;
        let mut ctx = PageContext::new();
        ctx.insert("n", 7i64);

        dispatch_with_body(&mut tag, &mut ctx, "<${n}>").unwrap();

        assert_eq!(
            tag.support.body_content().map(BodyContent::as_str),
            Some("<7><7>")
        );
        // The end hook copied the buffer to the restored page output
        assert_eq!(ctx.output(), "<7><7>");
        assert_eq!(ctx.body_depth(), 0);
        assert_eq!(
            tag.events,
            vec![
                "set_parent",
                "do_start_tag",
                "set_body_content",
                "do_init_body",
                "do_after_body",
                "do_after_body",
                "do_end_tag",
                "release",
            ]
        );
    }

    #[test]
    fn test_buffered_hook_output_lands_in_body_content() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyBuffered);
        tag.buffers = true;
        tag.again = 1;
        tag.after_body_output = Some("|sep|");
        let mut ctx = PageContext::new();

        dispatch_with_body(&mut tag, &mut ctx, "b").unwrap();

        assert_eq!(
            tag.support.body_content().map(BodyContent::as_str),
            Some("b|sep|b|sep|")
        );
        assert_eq!(ctx.output(), "b|sep|b|sep|");
        assert_eq!(ctx.body_depth(), 0);
    }

    #[test]
    fn test_buffered_failure_keeps_output_out_of_page() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyBuffered);
        tag.buffers = true;
        tag.catches = true;
        tag.fail_in = Some("do_after_body");
        let mut ctx = PageContext::new();

        let outcome = dispatch_with_body(&mut tag, &mut ctx, "partial").unwrap();

        assert!(outcome.recovered.is_some());
        assert_eq!(
            tag.support.body_content().map(BodyContent::as_str),
            Some("partial")
        );
        assert_eq!(ctx.body_depth(), 0);
        assert_eq!(ctx.output(), "");
    }

    /// A host whose output stack never gives a pushed body back.
    struct UnbalancedContext(PageContext);

    impl TagContext for UnbalancedContext {
        fn find_attribute(&self, name: &str) -> TagResult<Option<crate::TagValue>> {
            self.0.find_attribute(name)
        }

        fn set_attribute(&mut self, name: &str, value: crate::TagValue) {
            self.0.set_attribute(name, value);
        }

        fn remove_attribute(&mut self, name: &str) {
            self.0.remove_attribute(name);
        }

        fn out(&mut self) -> &mut BodyContent {
            self.0.out()
        }

        fn push_body(&mut self) {
            self.0.push_body();
        }

        fn pop_body(&mut self) -> Option<BodyContent> {
            None
        }
    }

    #[test]
    fn test_unbalanced_pop_keeps_captured_body() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyBuffered);
        tag.buffers = true;
        let mut ctx = UnbalancedContext(PageContext::new());

        let outcome = dispatch_with_body(&mut tag, &mut ctx, "b").unwrap();

        assert!(outcome.is_clean());
        assert_eq!(tag.support.body_content().map(BodyContent::as_str), Some("b"));
    }

    #[test]
    fn test_buffered_body_requires_body_tag() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyBuffered);
        tag.iterates = true;
        tag.catches = true;
        let mut ctx = PageContext::new();

        let err = dispatch_with_body(&mut tag, &mut ctx, "body").unwrap_err();

        assert!(matches!(err, TagError::BufferingUnsupported { .. }));
        assert!(!tag.called("do_end_tag"));
        assert!(!tag.called("do_catch"));
        assert!(tag.called("do_finally"));
        assert_eq!(tag.count("release"), 1);
        assert_eq!(ctx.output(), "");
    }

    #[test]
    fn test_failure_without_catch_propagates() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyInclude);
        tag.fail_in = Some("do_start_tag");
        let mut ctx = PageContext::new();

        let err = dispatch_with_body(&mut tag, &mut ctx, "body").unwrap_err();

        assert!(matches!(err, TagError::Lifecycle { ref hook, .. } if hook == "do_start_tag"));
        assert!(!tag.called("do_end_tag"));
        assert_eq!(tag.count("release"), 1);
    }

    #[test]
    fn test_failure_handled_by_catch() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyInclude);
        tag.catches = true;
        tag.fail_in = Some("do_end_tag");
        let mut ctx = PageContext::new();

        let outcome = dispatch_with_body(&mut tag, &mut ctx, "text").unwrap();

        assert!(!outcome.is_clean());
        assert_eq!(outcome.end, None);
        assert!(matches!(
            outcome.recovered,
            Some(TagError::Lifecycle { ref hook, .. }) if hook == "do_end_tag"
        ));
        assert_eq!(ctx.output(), "text");
        assert_eq!(
            tag.events,
            vec![
                "set_parent",
                "do_start_tag",
                "do_end_tag",
                "do_catch",
                "do_finally",
                "release",
            ]
        );
    }

    #[test]
    fn test_catch_failure_is_wrapped() {
        let mut tag = ScriptedTag::new(StartResult::SkipBody);
        tag.catches = true;
        tag.catch_fails = true;
        tag.fail_in = Some("do_start_tag");
        let mut ctx = PageContext::new();

        let err = dispatch(&mut tag, &mut ctx).unwrap_err();

        match err {
            TagError::ErrorHandling { tag: name, source } => {
                assert_eq!(name, "scripted");
                assert!(matches!(*source, TagError::Lifecycle { ref hook, .. } if hook == "do_catch"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(tag.called("do_finally"));
        assert_eq!(tag.count("release"), 1);
    }

    #[test]
    fn test_strict_mode_reraises_handled_failure() {
        let mut tag = ScriptedTag::new(StartResult::SkipBody);
        tag.catches = true;
        tag.fail_in = Some("do_start_tag");
        let mut ctx = PageContext::new();

        let writer = TagWriter::with_options(DispatchOptions::new().with_strict_mode(true));
        let err = writer.write(&mut tag, &mut ctx, None).unwrap_err();

        assert!(matches!(err, TagError::Lifecycle { .. }));
        assert_eq!(
            tag.events,
            vec!["set_parent", "do_start_tag", "do_catch", "do_finally", "release"]
        );
    }

    #[test]
    fn test_evaluation_error_reaches_catch() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyInclude);
        tag.catches = true;
        let mut ctx = PageContext::new();
        ctx.insert("name", "text");

        let outcome = dispatch_with_body(&mut tag, &mut ctx, "${name.first}").unwrap();

        assert!(matches!(
            outcome.recovered,
            Some(TagError::EvaluationError { .. })
        ));
        assert!(!tag.called("do_end_tag"));
        assert!(tag.called("do_catch"));
    }

    #[test]
    fn test_buffered_failure_restores_output() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyBuffered);
        tag.buffers = true;
        tag.fail_in = Some("do_after_body");
        let mut ctx = PageContext::new();

        let err = dispatch_with_body(&mut tag, &mut ctx, "body").unwrap_err();

        assert!(matches!(err, TagError::Lifecycle { .. }));
        assert_eq!(ctx.body_depth(), 0);
        assert_eq!(tag.count("release"), 1);
    }

    #[test]
    fn test_iteration_limit() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyInclude);
        tag.iterates = true;
        tag.again = usize::MAX;
        let mut ctx = PageContext::new();

        let writer = TagWriter::with_options(DispatchOptions::new().with_max_iterations(3));
        let err = writer.write(&mut tag, &mut ctx, Some("x")).unwrap_err();

        assert!(matches!(
            err,
            TagError::IterationLimit {
                max_iterations: 3,
                ..
            }
        ));
        assert_eq!(ctx.output(), "xxx");
    }

    #[test]
    fn test_no_body_ignores_start_result() {
        let mut tag = ScriptedTag::new(StartResult::EvalBodyBuffered);
        let mut ctx = PageContext::new();

        // No body text, so the missing buffering capability never matters
        let outcome = dispatch(&mut tag, &mut ctx).unwrap();
        assert!(outcome.is_clean());
        assert!(tag.called("do_end_tag"));
    }
}
