use std::io;
use std::sync::Arc;

use anyhow::{Result, bail};
use bon::Builder;
use tracing::{info, instrument};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::config::OrchestratorConfig;
use crate::hw::{BlePlatform, BtleplugPlatform, FakePlatform};
use crate::notification::NotificationLog;
use crate::orchestrator::{BleOrchestrator, InitStatus};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Creates a platform backed by the host Bluetooth stack.
#[must_use]
pub fn real_platform() -> Arc<dyn BlePlatform> {
    Arc::new(BtleplugPlatform::new())
}

/// Creates a platform backed by fake fixtures.
#[must_use]
pub fn fake_platform(fake_args: FakeArgs) -> Arc<dyn BlePlatform> {
    Arc::new(FakePlatform::new(fake_args.into_platform_config()))
}

/// Telemetry and rendering settings for one CLI run.
#[derive(Debug, Clone, Copy, Default, Builder)]
pub struct RunOptions {
    log_level: Option<LogLevel>,
    #[builder(default)]
    output_format: OutputFormat,
}

/// Runs the CLI command against the given platform.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = blesession::Args::try_parse_from([
///     "blesession",
///     "--fake",
///     "--fake-scan",
///     "AA:BB:CC:DD:EE:01|Pump-01|-48",
///     "request-device",
///     "--name-prefix",
///     "Pump-",
/// ])?;
/// let config = args.orchestrator_config();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let platform = match maybe_fake_args {
///     Some(fake_args) => blesession::fake_platform(fake_args),
///     None => blesession::real_platform(),
/// };
/// let mut out = Vec::new();
/// blesession::run(command, &mut out, platform, config).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the adapter is not
/// ready, a BLE request fails, or output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    platform: Arc<dyn BlePlatform>,
    config: OrchestratorConfig,
) -> Result<()>
where
    W: io::Write,
{
    run_with_options(command, out, platform, config, RunOptions::default()).await
}

/// Runs the CLI command with explicit telemetry and output settings.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the adapter is not
/// ready, a BLE request fails, or output writing fails.
pub async fn run_with_options<W>(
    command: Command,
    out: &mut W,
    platform: Arc<dyn BlePlatform>,
    config: OrchestratorConfig,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(
        command,
        out,
        &SystemTerminalClient,
        platform,
        config,
        options,
    )
    .await
}

/// Runs the CLI command with injected clients.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl blesession::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = blesession::Args::try_parse_from([
///     "blesession",
///     "--notification-log",
///     "/tmp/blesession-doc.jsonl",
///     "catchup",
/// ])?;
/// let config = args.orchestrator_config();
/// let (command, _) = args.into_command_and_fake_args()?;
/// let options = blesession::RunOptions::builder()
///     .output_format(blesession::OutputFormat::Json)
///     .build();
/// let mut out = Vec::new();
/// blesession::run_with_clients(
///     command,
///     &mut out,
///     &FakeTerminal,
///     blesession::real_platform(),
///     config,
///     options,
/// ).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the adapter is not
/// ready, a BLE request fails, or output writing fails.
#[instrument(
    skip(out, terminal_client, platform, config),
    level = "info",
    fields(command = %command.name(), log_level = ?options.log_level)
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    platform: Arc<dyn BlePlatform>,
    config: OrchestratorConfig,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "blesession",
        terminal_client.stderr_is_terminal(),
        options.log_level.map(LogLevel::as_level_filter),
    )?;
    tracing::Span::current().pb_set_message(&format!("Running {}", command.name()));

    let log = NotificationLog::open(&config.notification_log_path())?;
    let orchestrator = BleOrchestrator::new(platform, log, config);
    let output_format = options.output_format;

    // Catch-up only touches the log, so it works without an adapter.
    if let Command::Catchup(args) = &command {
        return crate::cli::catchup::run(&orchestrator, args, out, terminal_client, output_format);
    }

    let status = orchestrator.initialize().await;
    info!(%status, "adapter initialised");
    if status != InitStatus::Ready {
        orchestrator.shutdown().await;
        bail!("{status}");
    }

    let result = match &command {
        Command::Scan(args) => {
            crate::cli::scan::run_scan(&orchestrator, args, out, terminal_client, output_format)
                .await
        }
        Command::RequestDevice(args) => {
            crate::cli::scan::run_request_device(
                &orchestrator,
                args,
                out,
                terminal_client,
                output_format,
            )
            .await
        }
        Command::Inspect(args) => {
            crate::cli::inspect::run(&orchestrator, args, out, terminal_client, output_format)
                .await
        }
        Command::Read(args) => {
            crate::cli::gatt::run_read(&orchestrator, args, out, terminal_client, output_format)
                .await
        }
        Command::Write(args) => {
            crate::cli::gatt::run_write(&orchestrator, args, out, terminal_client, output_format)
                .await
        }
        Command::Listen(args) => {
            crate::cli::listen::run(&orchestrator, args, out, terminal_client, output_format)
                .await
        }
        Command::Catchup(args) => {
            crate::cli::catchup::run(&orchestrator, args, out, terminal_client, output_format)
        }
    };
    orchestrator.shutdown().await;
    result
}
