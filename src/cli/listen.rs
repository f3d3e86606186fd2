use std::io;

use anyhow::Result;
use clap::Args;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, instrument};

use crate::cli::OutputFormat;
use crate::context::{CallbackContext, CallbackEvent, Notification, NotifyValue};
use crate::orchestrator::BleOrchestrator;
use crate::protocol;
use crate::terminal::TerminalClient;

use super::gatt::CharacteristicArgs;
use super::link;
use super::ui::{ListenReadyView, NotificationView, Painter, StopReason, SummaryView};

/// Arguments for the `listen` command.
#[derive(Debug, Args)]
pub struct ListenArgs {
    #[command(flatten)]
    target: CharacteristicArgs,
    /// Stop after this many notifications. If omitted, listen until Ctrl+C.
    #[arg(long)]
    max_notifications: Option<usize>,
}

impl ListenArgs {
    /// Creates listen arguments with an optional notification limit.
    #[must_use]
    pub fn new(target: CharacteristicArgs, max_notifications: Option<usize>) -> Self {
        Self {
            target,
            max_notifications,
        }
    }
}

/// Executes the `listen` command.
#[instrument(
    skip(orchestrator, out, terminal_client),
    level = "info",
    fields(?output_format)
)]
pub(crate) async fn run<W>(
    orchestrator: &BleOrchestrator,
    args: &ListenArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let target = &args.target;
    let address = target.address()?;
    let device_id = target.device_id();

    let mut link_events = link::connect(orchestrator, device_id).await?;
    let (ctx, mut notifications) = CallbackContext::recording();
    orchestrator
        .start_notifications(
            device_id,
            target.service(),
            target.characteristic(),
            None,
            ctx,
        )
        .await;
    if let Err(error) = link::next_result(&mut notifications).await {
        link::disconnect(orchestrator, device_id).await;
        return Err(error);
    }

    if output_format == OutputFormat::Pretty {
        writeln!(out, "{}", ListenReadyView::new(device_id, &address, &painter))?;
    }

    let listened = listen(
        &mut notifications,
        &mut link_events,
        args.max_notifications,
        |index, notification| match output_format {
            OutputFormat::Pretty => {
                writeln!(out, "{}", NotificationView::new(index, notification, &painter))
            }
            OutputFormat::Json => write_json_line(out, notification),
        },
    )
    .await;

    if !matches!(listened, Ok((_, StopReason::Disconnected))) {
        let stopped = link::resolve(|ctx| {
            orchestrator.stop_notifications(
                device_id,
                target.service(),
                target.characteristic(),
                None,
                ctx,
            )
        })
        .await;
        if let Err(error) = stopped {
            debug!(%error, "failed to stop notifications cleanly");
        }
        link::disconnect(orchestrator, device_id).await;
    }

    let (received, stop_reason) = listened?;
    if output_format == OutputFormat::Pretty {
        writeln!(out)?;
        writeln!(
            out,
            "{}",
            SummaryView::new("notification", received, &stop_reason, &painter)
        )?;
    }
    Ok(())
}

async fn listen<F>(
    notifications: &mut UnboundedReceiver<CallbackEvent>,
    link_events: &mut UnboundedReceiver<CallbackEvent>,
    max_notifications: Option<usize>,
    mut on_notification: F,
) -> Result<(usize, StopReason)>
where
    F: FnMut(usize, &Notification) -> io::Result<()>,
{
    let mut received = 0_usize;
    loop {
        if let Some(limit) = max_notifications
            && received >= limit
        {
            return Ok((received, StopReason::ReachedLimit(limit)));
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok((received, StopReason::Interrupted)),
            event = link_events.recv() => {
                if matches!(event, Some(CallbackEvent::Disconnect(_)) | None) {
                    return Ok((received, StopReason::Disconnected));
                }
            }
            event = notifications.recv() => match event {
                Some(CallbackEvent::Notify(notification)) => {
                    received += 1;
                    on_notification(received, &notification)?;
                }
                Some(_) => {}
                None => return Ok((received, StopReason::StreamClosed)),
            },
        }
    }
}

fn write_json_line<W: io::Write>(out: &mut W, notification: &Notification) -> io::Result<()> {
    let value = match notification.value() {
        NotifyValue::Bytes(bytes) => json!(protocol::encode_value(bytes)),
        NotifyValue::Enabled(enabled) => json!(enabled),
    };
    let line = json!({
        "key": notification.key(),
        "timestamp_ms": notification.timestamp_ms(),
        "value": value,
    });
    serde_json::to_writer(&mut *out, &line)?;
    writeln!(out)
}
