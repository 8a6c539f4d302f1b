//! Run command - one query against a local orchestrator.
//!
//! Events are printed as they are broadcast. Ctrl-C cancels the run and the
//! command exits once the cancelled event arrives.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Args;
use console::Style;
use superagent_agent::{CallerContext, QueueChannel};
use superagent_types::{ConversationId, Event, EventKind};

use super::{Context, build_orchestrator};

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Conversation id
    pub conversation: String,

    /// The question or task
    #[arg(required = true)]
    pub query: String,

    /// Caller identity; selects the file-tool workspace
    #[arg(long)]
    pub user: Option<String>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub headed: bool,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let conversation_id = ConversationId::parse(&args.conversation)?;
    let orchestrator = build_orchestrator(ctx.config())?;

    let (channel, mut rx) = QueueChannel::bounded(ctx.config().orchestrator().channel_capacity);
    orchestrator.subscribe(&conversation_id, Arc::new(channel));

    let mut caller = match args.user {
        Some(user) => CallerContext::for_user(user),
        None => CallerContext::anonymous(),
    };
    if args.headed {
        caller = caller.with_headless(false);
    }

    let handle = orchestrator.start_as(&caller, conversation_id.clone(), args.query, Vec::new())?;
    if ctx.verbose {
        let dim = Style::new().dim();
        eprintln!("{}", dim.apply_to(format!("Run {} started", handle.run_id)));
    }

    let mut printer = Printer::new(ctx.json_output);
    let mut interrupted = false;
    let outcome = loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                orchestrator.cancel(&conversation_id);
                continue;
            }
        };
        let Some(event) = event else {
            break None;
        };
        printer.print(&event)?;
        if event.is_terminal() {
            break Some(event.kind);
        }
    };

    orchestrator.shutdown().await;

    match outcome {
        Some(EventKind::Error { message }) => bail!(message),
        Some(EventKind::Cancelled { .. }) if interrupted => bail!("interrupted"),
        Some(_) => Ok(()),
        None => bail!("event stream closed before the run finished"),
    }
}

/// Renders events for a terminal, or as JSON lines.
struct Printer {
    json: bool,
    dim: Style,
    red: Style,
    /// Whether partial text is pending a newline.
    mid_line: bool,
}

impl Printer {
    fn new(json: bool) -> Self {
        Self {
            json,
            dim: Style::new().dim(),
            red: Style::new().red(),
            mid_line: false,
        }
    }

    fn print(&mut self, event: &Event) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(event)?);
            return Ok(());
        }

        match &event.kind {
            EventKind::Status { role, message, .. } => {
                self.end_line();
                println!("{}", self.dim.apply_to(format!("[{role}] {message}")));
            }
            EventKind::Message {
                content,
                partial: true,
                ..
            } => {
                print!("{}", self.dim.apply_to(content));
                std::io::stdout().flush()?;
                self.mid_line = true;
            }
            EventKind::Message { content, .. } => {
                self.end_line();
                println!("{content}");
            }
            EventKind::ToolResult { tool, result, .. } => {
                self.end_line();
                let status = match result.error_kind() {
                    None => "done".to_string(),
                    Some(kind) => format!("failed: {kind}"),
                };
                println!("{}", self.dim.apply_to(format!("[{tool}: {status}]")));
            }
            EventKind::Error { message } => {
                self.end_line();
                eprintln!("{} {message}", self.red.apply_to("Error:"));
            }
            EventKind::Cancelled { reason } => {
                self.end_line();
                eprintln!("{}", self.dim.apply_to(format!("[cancelled: {reason}]")));
            }
        }
        Ok(())
    }

    fn end_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}
