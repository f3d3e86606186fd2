use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::catchup::CatchupArgs;
use crate::cli::gatt::{ReadArgs, WriteArgs};
use crate::cli::inspect::InspectArgs;
use crate::cli::listen::ListenArgs;
use crate::cli::scan::{RequestDeviceArgs, ScanArgs};
use crate::config::OrchestratorConfig;
use crate::error::{CliConfigError, FixtureError};
use crate::hw::{FakePlatformConfig, NotificationScript, ScanFixture};

/// Command-line options for the BLE session tool.
#[derive(Debug, Parser)]
#[command(
    name = "blesession",
    about = "Scan, connect to and exchange data with BLE peripherals."
)]
pub struct Args {
    /// Log level; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format. Defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output_format: Option<OutputFormat>,
    /// Notification log file. Defaults to the per-user state directory.
    #[arg(long, global = true)]
    notification_log: Option<PathBuf>,
    /// Connect deadline (e.g. `10s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    connect_timeout: Option<Duration>,
    /// Deadline for every other device operation (e.g. `5s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    timeout: Option<Duration>,
    /// Uses the fake BLE platform with fixture-driven discovery.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `device_id|name|rssi[|service,...];...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Values raised after notifications are enabled, as comma-separated hex.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationScript>,
    /// Artificial fake scan delay (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use blesession::{Args, CatchupArgs, Command};
    ///
    /// let args = Args::new(Command::Catchup(CatchupArgs::new(None)));
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output_format: None,
            notification_log: None,
            connect_timeout: None,
            timeout: None,
            fake: false,
            fake_scan: None,
            fake_notifications: None,
            fake_discovery_delay: None,
            command,
        }
    }

    /// Enables fake platform mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            notifications,
            discovery_delay,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_notifications = notifications;
        self.fake_discovery_delay = Some(discovery_delay);
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output_format
    }

    /// Builds orchestrator settings from the global flags.
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::builder()
            .maybe_connect_timeout(self.connect_timeout)
            .maybe_operation_timeout(self.timeout)
            .maybe_notification_log_path(self.notification_log.clone())
            .build()
    }

    /// Splits parsed CLI arguments into command and optional fake-platform settings.
    ///
    /// # Errors
    ///
    /// Returns an error if fake mode is enabled without a scan fixture.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_notifications,
            fake_discovery_delay,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                notifications: fake_notifications,
                discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake platform arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationScript>,
    #[builder(default)]
    discovery_delay: Duration,
}

impl FakeArgs {
    pub(crate) fn into_platform_config(self) -> FakePlatformConfig {
        let Self {
            scan_fixture,
            notifications,
            discovery_delay,
        } = self;

        FakePlatformConfig::builder()
            .scan_fixture(scan_fixture)
            .maybe_notifications(notifications)
            .discovery_delay(discovery_delay)
            .build()
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Rendering used for command output.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured tables for people.
    #[default]
    Pretty,
    /// JSON for scripts.
    Json,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan continuously and print every advertisement that passes the filters.
    Scan(ScanArgs),
    /// Scan until the first matching device is found.
    RequestDevice(RequestDeviceArgs),
    /// Connect, discover services and print the GATT topology.
    Inspect(InspectArgs),
    /// Connect and read one characteristic.
    Read(ReadArgs),
    /// Connect and write one characteristic.
    Write(WriteArgs),
    /// Connect, enable notifications and print values as they arrive.
    Listen(ListenArgs),
    /// Print and clear the buffered notification log.
    Catchup(CatchupArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan(_args) => "scan",
            Self::RequestDevice(_args) => "request-device",
            Self::Inspect(_args) => "inspect",
            Self::Read(_args) => "read",
            Self::Write(_args) => "write",
            Self::Listen(_args) => "listen",
            Self::Catchup(_args) => "catchup",
        }
    }
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    const FIXTURE: &str = "AA:BB:CC:DD:EE:01|Pump-01|-48";

    #[test]
    fn fake_mode_requires_scan_fixture() {
        let result = Args::try_parse_from(["blesession", "--fake", "catchup"]);

        let error = result.expect_err("missing --fake-scan should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[rstest]
    #[case::scan(&["blesession", "--fake-scan", FIXTURE, "catchup"])]
    #[case::notifications(&["blesession", "--fake-notifications", "0048", "catchup"])]
    fn fake_fixture_flags_require_fake_mode(#[case] argv: &[&str]) {
        let error = Args::try_parse_from(argv).expect_err("fake flags should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_settings() {
        let cli = Args::try_parse_from([
            "blesession",
            "--fake",
            "--fake-scan",
            FIXTURE,
            "request-device",
            "--name-prefix",
            "Pump-",
        ])
        .expect("valid fake arguments should parse");

        let (command, fake_args) = cli
            .into_command_and_fake_args()
            .expect("valid fake arguments should resolve fake settings");
        assert_matches!(command, Command::RequestDevice(_));
        assert_matches!(fake_args, Some(_));
    }

    #[test]
    fn global_flags_map_onto_orchestrator_config() {
        let cli = Args::try_parse_from([
            "blesession",
            "--connect-timeout",
            "3s",
            "--timeout",
            "750ms",
            "--notification-log",
            "/tmp/log.jsonl",
            "catchup",
        ])
        .expect("global flags should parse");

        let config = cli.orchestrator_config();
        assert_eq!(Duration::from_secs(3), config.connect_timeout());
        assert_eq!(Duration::from_millis(750), config.operation_timeout());
        assert_eq!(PathBuf::from("/tmp/log.jsonl"), config.notification_log_path());
    }

    #[rstest]
    #[case("debug", LevelFilter::DEBUG)]
    #[case("warn", LevelFilter::WARN)]
    fn log_level_maps_to_filter(#[case] raw: &str, #[case] expected: LevelFilter) {
        let cli = Args::try_parse_from(["blesession", "--log-level", raw, "catchup"])
            .expect("log level should parse");

        assert_eq!(Some(expected), cli.log_level().map(LogLevel::as_level_filter));
    }
}
