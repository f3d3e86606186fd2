use std::io;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::cli::OutputFormat;
use crate::hw::ServiceInfo;
use crate::orchestrator::BleOrchestrator;
use crate::session::OperationValue;
use crate::terminal::TerminalClient;

use super::link;
use super::ui::{InspectView, Painter, Spinner};

/// Arguments for the `inspect` command.
#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Device identifier (MAC address or platform UUID).
    device_id: String,
}

impl InspectArgs {
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }
}

/// Connection facts gathered by `inspect`.
#[derive(Debug, Serialize)]
pub(crate) struct InspectReport {
    device_id: String,
    mtu: u16,
    rssi: Option<i16>,
    services: Vec<ServiceInfo>,
}

impl InspectReport {
    pub(crate) fn new(
        device_id: String,
        mtu: u16,
        rssi: Option<i16>,
        services: Vec<ServiceInfo>,
    ) -> Self {
        Self {
            device_id,
            mtu,
            rssi,
            services,
        }
    }

    pub(crate) fn device_id(&self) -> &str {
        &self.device_id
    }

    pub(crate) fn mtu(&self) -> u16 {
        self.mtu
    }

    pub(crate) fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    pub(crate) fn services(&self) -> &[ServiceInfo] {
        &self.services
    }
}

/// Executes the `inspect` command.
#[instrument(
    skip(orchestrator, out, terminal_client),
    level = "info",
    fields(?output_format)
)]
pub(crate) async fn run<W>(
    orchestrator: &BleOrchestrator,
    args: &InspectArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let device_id = args.device_id.as_str();
    let spinner = Spinner::new(terminal_client.stderr_is_terminal());
    let report = spinner
        .run("Connecting and discovering services...", || async {
            link::connect(orchestrator, device_id).await?;
            let report = inspect_connected(orchestrator, device_id).await;
            link::disconnect(orchestrator, device_id).await;
            report
        })
        .await?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", InspectView::new(&report, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

async fn inspect_connected(orchestrator: &BleOrchestrator, device_id: &str) -> Result<InspectReport> {
    link::resolve(|ctx| orchestrator.discover_services(device_id, None, ctx)).await?;
    let services = orchestrator.get_services(device_id)?;
    let mtu = orchestrator.get_mtu(device_id)?;
    let rssi = match link::resolve(|ctx| orchestrator.read_rssi(device_id, None, ctx)).await {
        Ok(OperationValue::Rssi(rssi)) => Some(rssi),
        Ok(_other) => None,
        Err(error) => {
            debug!(%error, "RSSI read failed during inspect");
            None
        }
    };
    Ok(InspectReport::new(device_id.to_string(), mtu, rssi, services))
}
