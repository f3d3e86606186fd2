use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use parking_lot::Mutex;
use strum_macros::Display;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::config::DuplicateFilter;
use crate::context::CallbackContext;
use crate::error::BleError;
use crate::hw::{BlePlatform, ScanFilter, ScanResult, ScanStream};
use crate::protocol::{DeviceIdentifier, parse_uuid};

/// Lifecycle of one scan session.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum ScanState {
    Scanning,
    Stopped,
    TimedOut,
}

/// How a scan session resolves.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ScanMode {
    /// Pick-one scan: resolves with the first acceptable device or `NoDeviceFound`.
    Bounded { duration: Duration },
    /// Streams results until stopped.
    Continuous { allow_duplicates: bool },
}

/// Caller-supplied scan criteria.
///
/// ```
/// let options = blesession::ScanOptions::builder()
///     .services(vec!["180d".to_string()])
///     .name_prefix("Pump-")
///     .build();
/// assert_eq!(Some("Pump-"), options.name_prefix());
/// ```
#[derive(Debug, Clone, Default, Builder)]
pub struct ScanOptions {
    #[builder(default)]
    services: Vec<String>,
    #[builder(into)]
    name: Option<String>,
    #[builder(into)]
    name_prefix: Option<String>,
}

impl ScanOptions {
    #[must_use]
    pub fn services(&self) -> &[String] {
        &self.services
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Case-sensitive prefix applied after the platform filter.
    #[must_use]
    pub fn name_prefix(&self) -> Option<&str> {
        self.name_prefix.as_deref()
    }

    /// Builds the platform filter, rejecting malformed service UUIDs.
    pub(crate) fn filter(&self) -> Result<ScanFilter, BleError> {
        let services = self
            .services
            .iter()
            .map(|service| {
                parse_uuid(service).ok_or_else(|| BleError::InvalidFilter {
                    reason: "Invalid service UUID.".to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ScanFilter::new(services, self.name.clone()))
    }

    fn accepts(&self, result: &ScanResult) -> bool {
        self.name_prefix
            .as_deref()
            .is_none_or(|prefix| result.device().name_starts_with(prefix))
    }
}

/// One running platform scan.
pub(crate) struct ScanSession {
    mode: ScanMode,
    state: Arc<Mutex<ScanState>>,
    cancel: CancellationToken,
}

impl ScanSession {
    /// Spawns the task that consumes `stream` and reports through `ctx`.
    pub(crate) fn spawn(
        platform: Arc<dyn BlePlatform>,
        stream: ScanStream,
        mode: ScanMode,
        options: ScanOptions,
        duplicate_filter: DuplicateFilter,
        ctx: Arc<CallbackContext>,
        cancel: CancellationToken,
    ) -> Self {
        let state = Arc::new(Mutex::new(ScanState::Scanning));
        let run = ScanRun {
            platform,
            options,
            ctx,
            state: Arc::clone(&state),
            cancel: cancel.clone(),
        };
        match mode {
            ScanMode::Bounded { duration } => {
                tokio::spawn(
                    run.bounded(stream, duration)
                        .instrument(info_span!("bounded_scan", ?duration)),
                );
            }
            ScanMode::Continuous { allow_duplicates } => {
                let seen = (!allow_duplicates).then(|| Seen::new(duplicate_filter));
                tokio::spawn(
                    run.continuous(stream, seen)
                        .instrument(info_span!("continuous_scan", allow_duplicates)),
                );
            }
        }

        Self {
            mode,
            state,
            cancel,
        }
    }

    pub(crate) fn mode(&self) -> ScanMode {
        self.mode
    }

    pub(crate) fn state(&self) -> ScanState {
        *self.state.lock()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state() == ScanState::Scanning && !self.cancel.is_cancelled()
    }

    /// Ends the session after the platform scan was stopped.
    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }
}

struct ScanRun {
    platform: Arc<dyn BlePlatform>,
    options: ScanOptions,
    ctx: Arc<CallbackContext>,
    state: Arc<Mutex<ScanState>>,
    cancel: CancellationToken,
}

impl ScanRun {
    /// Moves out of `Scanning`, returning whether this call made the transition.
    fn finish(&self, next: ScanState) -> bool {
        let mut state = self.state.lock();
        if *state == ScanState::Scanning {
            *state = next;
            true
        } else {
            false
        }
    }

    async fn stop_platform_scan(&self) {
        if let Err(error) = self.platform.stop_scan().await {
            warn!(%error, "failed to stop platform scan");
        }
    }

    async fn bounded(self, mut stream: ScanStream, duration: Duration) {
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        let mut stream_open = true;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    if self.finish(ScanState::Stopped) {
                        self.ctx.fail(&BleError::ScanStopped);
                    }
                    return;
                }
                () = &mut deadline => {
                    if self.finish(ScanState::TimedOut) {
                        self.stop_platform_scan().await;
                        debug!("no acceptable device before deadline");
                        self.ctx.fail(&BleError::NoDeviceFound);
                    }
                    return;
                }
                next = stream.next(), if stream_open => match next {
                    Some(result) if self.options.accepts(&result) => {
                        if self.finish(ScanState::Stopped) {
                            self.stop_platform_scan().await;
                            debug!(device_id = %result.device().device_id(), "picked device");
                            self.ctx.device(result.device().clone());
                        }
                        return;
                    }
                    Some(_) => {}
                    None => stream_open = false,
                },
            }
        }
    }

    async fn continuous(self, mut stream: ScanStream, mut seen: Option<Seen>) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(result) => {
                        if !self.options.accepts(&result) {
                            continue;
                        }
                        if seen.as_mut().is_some_and(|seen| !seen.first_sighting(&result)) {
                            continue;
                        }
                        self.ctx.scan_result(result);
                    }
                    None => break,
                },
            }
        }
        self.finish(ScanState::Stopped);
        debug!("continuous scan ended");
    }
}

/// Duplicate suppression for continuous scans.
enum Seen {
    Devices(HashSet<DeviceIdentifier>),
    Advertisements(HashSet<u64>),
}

impl Seen {
    fn new(filter: DuplicateFilter) -> Self {
        match filter {
            DuplicateFilter::PerDevice => Self::Devices(HashSet::new()),
            DuplicateFilter::PerAdvertisement => Self::Advertisements(HashSet::new()),
        }
    }

    fn first_sighting(&mut self, result: &ScanResult) -> bool {
        match self {
            Self::Devices(seen) => seen.insert(result.device().device_id().clone()),
            Self::Advertisements(seen) => seen.insert(result.advertisement_fingerprint()),
        }
    }
}
