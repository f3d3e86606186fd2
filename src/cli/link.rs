use std::future::Future;

use anyhow::{Result, bail};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::context::{CallbackContext, CallbackEvent};
use crate::orchestrator::BleOrchestrator;
use crate::session::OperationValue;

/// Starts one callback-style request and waits for its success or failure.
pub(crate) async fn resolve<F, Fut>(start: F) -> Result<OperationValue>
where
    F: FnOnce(CallbackContext) -> Fut,
    Fut: Future<Output = ()>,
{
    let (value, _events) = resolve_with_events(start).await?;
    Ok(value)
}

/// Like [`resolve`], but hands back the event stream for later events on
/// the same context.
pub(crate) async fn resolve_with_events<F, Fut>(
    start: F,
) -> Result<(OperationValue, UnboundedReceiver<CallbackEvent>)>
where
    F: FnOnce(CallbackContext) -> Fut,
    Fut: Future<Output = ()>,
{
    let (ctx, mut events) = CallbackContext::recording();
    start(ctx).await;
    let value = next_result(&mut events).await?;
    Ok((value, events))
}

/// Waits for the next success or failure event, skipping anything else.
pub(crate) async fn next_result(
    events: &mut UnboundedReceiver<CallbackEvent>,
) -> Result<OperationValue> {
    while let Some(event) = events.recv().await {
        match event {
            CallbackEvent::Success(value) => return Ok(value),
            CallbackEvent::Fail(error) => return Err(error.into()),
            other => debug!(?other, "ignoring event while waiting for a result"),
        }
    }
    bail!("request was dropped without a result")
}

/// Connects and returns the connect context's events, which later carry
/// link loss.
pub(crate) async fn connect(
    orchestrator: &BleOrchestrator,
    device_id: &str,
) -> Result<UnboundedReceiver<CallbackEvent>> {
    let (_value, events) =
        resolve_with_events(|ctx| orchestrator.connect(device_id, None, ctx)).await?;
    Ok(events)
}

/// Disconnects, logging rather than failing when the link is already gone.
pub(crate) async fn disconnect(orchestrator: &BleOrchestrator, device_id: &str) {
    if let Err(error) = resolve(|ctx| orchestrator.disconnect(device_id, None, ctx)).await {
        warn!(device_id, error = %error, "failed to disconnect cleanly");
    }
}
