use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::cli::command::parse_duration;
use crate::context::{CallbackContext, CallbackEvent};
use crate::error::BleError;
use crate::hw::FoundDevice;
use crate::orchestrator::BleOrchestrator;
use crate::session::ScanOptions;
use crate::terminal::TerminalClient;

use super::link;
use super::ui::{DeviceView, Painter, ScanResultView, Spinner, StopReason, SummaryView};

/// Advertisement filters shared by both scan commands.
#[derive(Debug, Clone, Default, Args)]
pub struct ScanFilterArgs {
    /// Advertised service UUID to require; repeat to accept any of several.
    #[arg(long = "service")]
    services: Vec<String>,
    /// Exact advertised local name.
    #[arg(long)]
    name: Option<String>,
    /// Case-sensitive local name prefix.
    #[arg(long)]
    name_prefix: Option<String>,
}

impl ScanFilterArgs {
    /// Creates filter arguments directly without CLI parsing.
    #[must_use]
    pub fn new(services: Vec<String>, name: Option<String>, name_prefix: Option<String>) -> Self {
        Self {
            services,
            name,
            name_prefix,
        }
    }

    fn options(&self) -> ScanOptions {
        ScanOptions::builder()
            .services(self.services.clone())
            .maybe_name(self.name.clone())
            .maybe_name_prefix(self.name_prefix.clone())
            .build()
    }
}

/// Arguments for the `scan` command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    #[command(flatten)]
    filter: ScanFilterArgs,
    /// Report every advertisement instead of once per device.
    #[arg(long)]
    allow_duplicates: bool,
    /// Stop after this long (e.g. `10s`). If omitted, scan until Ctrl+C.
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,
}

impl ScanArgs {
    #[must_use]
    pub fn new(filter: ScanFilterArgs, allow_duplicates: bool, duration: Option<Duration>) -> Self {
        Self {
            filter,
            allow_duplicates,
            duration,
        }
    }
}

/// Arguments for the `request-device` command.
#[derive(Debug, Args)]
pub struct RequestDeviceArgs {
    #[command(flatten)]
    filter: ScanFilterArgs,
    /// Give up after this long (e.g. `5s`); capped at 30 seconds.
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,
}

impl RequestDeviceArgs {
    #[must_use]
    pub fn new(filter: ScanFilterArgs, duration: Option<Duration>) -> Self {
        Self { filter, duration }
    }
}

/// Executes the `scan` command.
#[instrument(
    skip(orchestrator, out, terminal_client),
    level = "info",
    fields(?output_format)
)]
pub(crate) async fn run_scan<W>(
    orchestrator: &BleOrchestrator,
    args: &ScanArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let (_started, mut events) = link::resolve_with_events(|ctx| {
        orchestrator.request_scan(args.filter.options(), args.allow_duplicates, ctx)
    })
    .await?;

    let deadline = wait_for(args.duration);
    tokio::pin!(deadline);
    let mut reported = 0_usize;
    let stop_reason = loop {
        tokio::select! {
            () = &mut deadline => break StopReason::DurationElapsed,
            _ = tokio::signal::ctrl_c() => break StopReason::Interrupted,
            event = events.recv() => match event {
                Some(CallbackEvent::ScanResult(result)) => {
                    reported += 1;
                    match output_format {
                        OutputFormat::Pretty => {
                            writeln!(out, "{}", ScanResultView::new(&result, &painter))?;
                        }
                        OutputFormat::Json => {
                            serde_json::to_writer(&mut *out, &result)?;
                            writeln!(out)?;
                        }
                    }
                }
                Some(CallbackEvent::Fail(error)) => return Err(error.into()),
                Some(_) => {}
                None => break StopReason::StreamClosed,
            },
        }
    };
    orchestrator.stop_scan().await?;

    if output_format == OutputFormat::Pretty {
        writeln!(out)?;
        writeln!(
            out,
            "{}",
            SummaryView::new("advertisement", reported, &stop_reason, &painter)
        )?;
    }
    Ok(())
}

/// Executes the `request-device` command.
#[instrument(
    skip(orchestrator, out, terminal_client),
    level = "info",
    fields(?output_format)
)]
pub(crate) async fn run_request_device<W>(
    orchestrator: &BleOrchestrator,
    args: &RequestDeviceArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let spinner = Spinner::new(terminal_client.stderr_is_terminal());
    let found = spinner
        .run("Scanning for a matching device...", || {
            request_device(orchestrator, args)
        })
        .await?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", painter.heading("Found device:"))?;
            writeln!(out, "{}", DeviceView::new(&found, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &found)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

async fn request_device(
    orchestrator: &BleOrchestrator,
    args: &RequestDeviceArgs,
) -> Result<FoundDevice> {
    let (ctx, mut events) = CallbackContext::recording();
    orchestrator
        .request_device(args.filter.options(), args.duration, ctx)
        .await;
    while let Some(event) = events.recv().await {
        match event {
            CallbackEvent::Device(found) => return Ok(found),
            CallbackEvent::Fail(error) => return Err(error.into()),
            _ => {}
        }
    }
    Err(BleError::ScanStopped.into())
}

async fn wait_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
