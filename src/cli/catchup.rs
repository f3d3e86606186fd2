use std::io;

use anyhow::Result;
use clap::Args;
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::orchestrator::BleOrchestrator;
use crate::terminal::TerminalClient;

use super::ui::{CatchupView, Painter};

/// Arguments for the `catchup` command.
#[derive(Debug, Args)]
pub struct CatchupArgs {
    /// Only return records at or after this Unix time in milliseconds.
    #[arg(long)]
    since: Option<i64>,
}

impl CatchupArgs {
    #[must_use]
    pub fn new(since: Option<i64>) -> Self {
        Self { since }
    }
}

/// Executes the `catchup` command. The log is cleared afterwards.
#[instrument(
    skip(orchestrator, out, terminal_client),
    level = "info",
    fields(?output_format)
)]
pub(crate) fn run<W>(
    orchestrator: &BleOrchestrator,
    args: &CatchupArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let records = orchestrator.catchup(args.since)?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", CatchupView::new(&records, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &records)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
