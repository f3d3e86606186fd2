use std::future::Future;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

const TICK_INTERVAL: Duration = Duration::from_millis(120);

/// Shows an elapsed-time spinner on stderr while a BLE request is pending.
#[derive(Debug)]
pub(crate) struct Spinner {
    enabled: bool,
}

impl Spinner {
    /// `enabled` is normally whether stderr is a terminal.
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub(crate) async fn run<F, Fut, T>(&self, message: &'static str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.enabled {
            return operation().await;
        }

        let bar = ProgressBar::new_spinner()
            .with_style(pending_style())
            .with_message(message);
        bar.enable_steady_tick(TICK_INTERVAL);
        let output = operation().await;
        bar.finish_and_clear();
        output
    }
}

fn pending_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::error::BleError;

    use super::*;

    #[rstest]
    #[case::plain(false)]
    #[case::interactive(true)]
    #[tokio::test]
    async fn pending_request_result_is_passed_through(#[case] enabled: bool) {
        let spinner = Spinner::new(enabled);

        let rssi = spinner.run("Reading RSSI...", || async { -48_i16 }).await;
        let failure: Result<(), BleError> = spinner
            .run("Connecting...", || async { Err(BleError::AdapterUnavailable) })
            .await;

        assert_eq!(-48, rssi);
        assert_eq!(Err(BleError::AdapterUnavailable), failure);
    }
}
