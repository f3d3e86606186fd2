use std::io;

use anyhow::Result;
use clap::Args;
use serde_json::json;
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::orchestrator::BleOrchestrator;
use crate::protocol::{self, CharacteristicAddress, WriteMode};
use crate::session::OperationValue;
use crate::terminal::TerminalClient;

use super::link;
use super::ui::{Painter, Spinner, ValueView};

/// Device and characteristic selected on the command line.
#[derive(Debug, Clone, Args)]
pub struct CharacteristicArgs {
    /// Device identifier (MAC address or platform UUID).
    device_id: String,
    /// Service UUID, short (`180f`) or full.
    service: String,
    /// Characteristic UUID, short (`2a19`) or full.
    characteristic: String,
}

impl CharacteristicArgs {
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        service: impl Into<String>,
        characteristic: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            service: service.into(),
            characteristic: characteristic.into(),
        }
    }

    pub(crate) fn device_id(&self) -> &str {
        &self.device_id
    }

    pub(crate) fn service(&self) -> &str {
        &self.service
    }

    pub(crate) fn characteristic(&self) -> &str {
        &self.characteristic
    }

    pub(crate) fn address(&self) -> Result<CharacteristicAddress> {
        Ok(CharacteristicAddress::parse(
            &self.service,
            &self.characteristic,
        )?)
    }
}

/// Arguments for the `read` command.
#[derive(Debug, Args)]
pub struct ReadArgs {
    #[command(flatten)]
    target: CharacteristicArgs,
}

impl ReadArgs {
    #[must_use]
    pub fn new(target: CharacteristicArgs) -> Self {
        Self { target }
    }
}

/// Arguments for the `write` command.
#[derive(Debug, Args)]
pub struct WriteArgs {
    #[command(flatten)]
    target: CharacteristicArgs,
    /// Value to write as hexadecimal (e.g. `01ff`).
    value: String,
    /// Write without waiting for a response from the peripheral.
    #[arg(long)]
    without_response: bool,
}

impl WriteArgs {
    #[must_use]
    pub fn new(target: CharacteristicArgs, value: impl Into<String>, without_response: bool) -> Self {
        Self {
            target,
            value: value.into(),
            without_response,
        }
    }

    fn mode(&self) -> WriteMode {
        if self.without_response {
            WriteMode::WithoutResponse
        } else {
            WriteMode::WithResponse
        }
    }
}

/// Executes the `read` command.
#[instrument(
    skip(orchestrator, out, terminal_client),
    level = "info",
    fields(?output_format)
)]
pub(crate) async fn run_read<W>(
    orchestrator: &BleOrchestrator,
    args: &ReadArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let target = &args.target;
    let address = target.address()?;
    let device_id = target.device_id();
    let spinner = Spinner::new(terminal_client.stderr_is_terminal());
    let value = spinner
        .run("Reading characteristic...", || async {
            link::connect(orchestrator, device_id).await?;
            let value = link::resolve(|ctx| {
                orchestrator.read(device_id, target.service(), target.characteristic(), None, ctx)
            })
            .await;
            link::disconnect(orchestrator, device_id).await;
            value
        })
        .await?;
    let bytes = match value {
        OperationValue::Bytes(bytes) => bytes,
        _other => Vec::new(),
    };

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(
                out,
                "{}",
                ValueView::new(device_id, &address, &bytes, &painter)
            )?;
        }
        OutputFormat::Json => {
            let body = json!({
                "device_id": device_id,
                "service": address.service(),
                "characteristic": address.characteristic(),
                "value": protocol::encode_value(&bytes),
            });
            serde_json::to_writer_pretty(&mut *out, &body)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Executes the `write` command.
#[instrument(
    skip(orchestrator, out, terminal_client),
    level = "info",
    fields(?output_format)
)]
pub(crate) async fn run_write<W>(
    orchestrator: &BleOrchestrator,
    args: &WriteArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let target = &args.target;
    let address = target.address()?;
    let value = protocol::decode_value(&args.value)?;
    let device_id = target.device_id();
    let mode = args.mode();
    let spinner = Spinner::new(terminal_client.stderr_is_terminal());
    spinner
        .run("Writing characteristic...", || async {
            link::connect(orchestrator, device_id).await?;
            let written = link::resolve(|ctx| {
                orchestrator.write(
                    device_id,
                    target.service(),
                    target.characteristic(),
                    value.clone(),
                    mode,
                    None,
                    ctx,
                )
            })
            .await;
            link::disconnect(orchestrator, device_id).await;
            written
        })
        .await?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(
                out,
                "{} {} {}",
                painter.success("Wrote"),
                painter.value(format!("{} byte(s)", value.len())),
                painter.muted(format!("to {address} ({mode})"))
            )?;
        }
        OutputFormat::Json => {
            let body = json!({
                "device_id": device_id,
                "service": address.service(),
                "characteristic": address.characteristic(),
                "value": protocol::encode_value(&value),
                "mode": mode.to_string(),
            });
            serde_json::to_writer_pretty(&mut *out, &body)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
