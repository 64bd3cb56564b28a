//! tagwriter - evaluate tag bodies from the command line

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quarto_tagwriter::{
    AfterBody, BodyContent, BodyTag, BodyTagSupport, DispatchOptions, EndResult, IterationTag,
    PageContext, Scope, StartResult, Tag, TagContext, TagResult, TagValue, TagWriter, evaluate,
};

#[derive(Parser)]
#[command(name = "tagwriter")]
#[command(version)]
#[command(about = "Evaluate template tag bodies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Substitute ${path} tokens in TEXT (or stdin)
    Eval {
        /// Text to evaluate; read from stdin when omitted
        text: Option<String>,

        #[command(flatten)]
        vars: VarArgs,
    },

    /// Run TEXT (or stdin) as the body of a tag through the full lifecycle
    Write {
        /// Body text; read from stdin when omitted
        text: Option<String>,

        /// What the tag's start hook returns
        #[arg(short, long, value_enum, default_value_t = BodyMode::Include)]
        mode: BodyMode,

        /// Number of times the body is evaluated
        #[arg(short = 'n', long, default_value_t = 1)]
        times: usize,

        /// Fail instead of reporting failures the tag recovered from
        #[arg(long)]
        strict: bool,

        #[command(flatten)]
        vars: VarArgs,
    },
}

#[derive(clap::Args)]
struct VarArgs {
    /// JSON file whose top-level object fields become variables
    #[arg(long)]
    vars: Option<PathBuf>,

    /// Variable (KEY=VALUE)
    #[arg(short = 'D', long = "var")]
    var: Vec<String>,

    /// Scope the variables are set in
    #[arg(long, default_value = "request")]
    scope: Scope,
}

#[derive(Clone, Copy, ValueEnum)]
enum BodyMode {
    Include,
    Buffered,
    Skip,
}

impl From<BodyMode> for StartResult {
    fn from(mode: BodyMode) -> Self {
        match mode {
            BodyMode::Include => StartResult::EvalBodyInclude,
            BodyMode::Buffered => StartResult::EvalBodyBuffered,
            BodyMode::Skip => StartResult::SkipBody,
        }
    }
}

/// A body tag that repeats its body a fixed number of times and, when
/// buffered, flushes the captured body in its end hook.
struct RepeatTag {
    start: StartResult,
    remaining: usize,
    support: BodyTagSupport,
}

impl Tag for RepeatTag {
    fn name(&self) -> &str {
        "repeat"
    }

    fn set_parent(&mut self, parent: Option<&str>) {
        self.support.tag.set_parent(parent);
    }

    fn do_start_tag(&mut self, _ctx: &mut dyn TagContext) -> TagResult<StartResult> {
        Ok(self.start)
    }

    fn do_end_tag(&mut self, ctx: &mut dyn TagContext) -> TagResult<EndResult> {
        if let Some(content) = self.support.take_body_content() {
            content.write_out(ctx.out());
        }
        Ok(EndResult::EvalPage)
    }

    fn release(&mut self) {
        self.support.release();
    }

    fn as_iteration_tag(&mut self) -> Option<&mut dyn IterationTag> {
        Some(self)
    }

    fn as_body_tag(&mut self) -> Option<&mut dyn BodyTag> {
        Some(self)
    }
}

impl IterationTag for RepeatTag {
    fn do_after_body(&mut self, _ctx: &mut dyn TagContext) -> TagResult<AfterBody> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            Ok(AfterBody::EvalBodyAgain)
        } else {
            Ok(AfterBody::SkipBody)
        }
    }
}

impl BodyTag for RepeatTag {
    fn set_body_content(&mut self, content: BodyContent) {
        self.support.set_body_content(content);
    }

    fn body_content_mut(&mut self) -> Option<&mut BodyContent> {
        self.support.body_content_mut()
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quarto_tagwriter=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Eval { text, vars } => {
            let ctx = build_context(&vars)?;
            let text = read_text(text)?;
            let output = evaluate(&ctx, &text)?;
            print!("{}", output);
        }
        Commands::Write {
            text,
            mode,
            times,
            strict,
            vars,
        } => {
            if times == 0 {
                bail!("--times must be at least 1");
            }
            let mut ctx = build_context(&vars)?;
            let text = read_text(text)?;

            let mut tag = RepeatTag {
                start: mode.into(),
                remaining: times,
                support: BodyTagSupport::new(),
            };
            let writer = TagWriter::with_options(DispatchOptions::new().with_strict_mode(strict));
            let outcome = writer.write(&mut tag, &mut ctx, Some(&text))?;
            if let Some(error) = outcome.recovered {
                tracing::warn!(error = %error, "Tag recovered from a failure");
            }
            print!("{}", ctx.output());
        }
    }

    Ok(())
}

fn read_text(text: Option<String>) -> Result<String> {
    match text {
        Some(text) => Ok(text),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read text from stdin")?;
            Ok(buf)
        }
    }
}

fn build_context(args: &VarArgs) -> Result<PageContext> {
    let mut ctx = PageContext::new();

    if let Some(path) = &args.vars {
        for (name, value) in load_vars(path)? {
            ctx.insert_in(name, value, args.scope);
        }
    }

    for entry in &args.var {
        let Some((name, value)) = entry.split_once('=') else {
            bail!("Invalid variable '{}': expected KEY=VALUE", entry);
        };
        ctx.insert_in(name, value, args.scope);
    }

    Ok(ctx)
}

fn load_vars(path: &Path) -> Result<Vec<(String, TagValue)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read variables from {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;

    let serde_json::Value::Object(fields) = json else {
        bail!("{} must contain a JSON object", path.display());
    };

    Ok(fields
        .into_iter()
        .map(|(name, value)| (name, TagValue::from(value)))
        .collect())
}
