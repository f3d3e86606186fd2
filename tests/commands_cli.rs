use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use pretty_assertions::assert_eq;

const FIXTURE: &str = "AA:BB:CC:DD:EE:02|Scale-7|-70;AA:BB:CC:DD:EE:01|Pump-01|-48|180d";
const PUMP: &str = "AA:BB:CC:DD:EE:01";

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl blesession::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

fn temp_log_path() -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!(
        "blesession-cli-{}-{nanos}-{}.jsonl",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

async fn run_with_parsed_args(
    args: blesession::Args,
    output_format: blesession::OutputFormat,
) -> anyhow::Result<String> {
    let mut output = Vec::new();
    let config = args.orchestrator_config();
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let platform = match maybe_fake_args {
        Some(fake_args) => blesession::fake_platform(fake_args),
        None => blesession::real_platform(),
    };
    let options = blesession::RunOptions::builder()
        .output_format(output_format)
        .build();
    blesession::run_with_clients(
        command,
        &mut output,
        &FakeTerminalClient,
        platform,
        config,
        options,
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_with_argv(
    argv: &[&str],
    output_format: blesession::OutputFormat,
) -> anyhow::Result<String> {
    let parsed_args = blesession::Args::try_parse_from(argv)?;
    run_with_parsed_args(parsed_args, output_format).await
}

fn fake_argv<'a>(log: &'a str, rest: &[&'a str]) -> Vec<&'a str> {
    let mut argv = vec![
        "blesession",
        "--notification-log",
        log,
        "--fake",
        "--fake-scan",
        FIXTURE,
    ];
    argv.extend_from_slice(rest);
    argv
}

#[tokio::test]
async fn request_device_prints_first_matching_device() -> anyhow::Result<()> {
    let log = temp_log_path();
    let log = log.to_string_lossy();

    let stdout = run_with_argv(
        &fake_argv(&log, &["request-device", "--name-prefix", "Pump-"]),
        blesession::OutputFormat::Pretty,
    )
    .await?;

    assert!(stdout.contains("Found device:"));
    assert!(stdout.contains(PUMP));
    assert!(stdout.contains("(Heart Rate)"));
    assert!(!stdout.contains("Scale-7"));
    Ok(())
}

#[tokio::test]
async fn request_device_without_a_match_reports_no_device_found() {
    let log = temp_log_path();
    let log = log.to_string_lossy();

    let error = run_with_argv(
        &fake_argv(
            &log,
            &["request-device", "--name-prefix", "Lamp-", "--duration", "100ms"],
        ),
        blesession::OutputFormat::Pretty,
    )
    .await
    .expect_err("no fixture device carries the prefix");

    assert_eq!("No device found.", error.to_string());
}

#[tokio::test]
async fn scan_streams_matching_advertisements_as_json_lines() -> anyhow::Result<()> {
    let log = temp_log_path();
    let log = log.to_string_lossy();

    let stdout = run_with_argv(
        &fake_argv(&log, &["scan", "--duration", "200ms"]),
        blesession::OutputFormat::Json,
    )
    .await?;

    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(2, lines.len());
    assert!(stdout.contains("Pump-01"));
    assert!(stdout.contains("Scale-7"));
    Ok(())
}

#[tokio::test]
async fn scan_applies_the_service_filter() -> anyhow::Result<()> {
    let log = temp_log_path();
    let log = log.to_string_lossy();

    let stdout = run_with_argv(
        &fake_argv(&log, &["scan", "--service", "180d", "--duration", "200ms"]),
        blesession::OutputFormat::Pretty,
    )
    .await?;

    assert!(stdout.contains(PUMP));
    assert!(!stdout.contains("Scale-7"));
    assert!(stdout.contains("scan duration elapsed - received 1 advertisement(s)"));
    Ok(())
}

#[tokio::test]
async fn inspect_prints_link_facts_and_services() -> anyhow::Result<()> {
    let log = temp_log_path();
    let log = log.to_string_lossy();

    let stdout = run_with_argv(
        &fake_argv(&log, &["inspect", PUMP]),
        blesession::OutputFormat::Pretty,
    )
    .await?;

    assert!(stdout.contains("247"));
    assert!(stdout.contains("-48 dBm"));
    assert!(stdout.contains("(Heart Rate Measurement)"));
    assert!(stdout.contains("(Nordic UART TX)"));
    Ok(())
}

#[tokio::test]
async fn inspect_of_an_unknown_device_fails() {
    let log = temp_log_path();
    let log = log.to_string_lossy();

    let result = run_with_argv(
        &fake_argv(&log, &["inspect", "AA:BB:CC:DD:EE:99"]),
        blesession::OutputFormat::Pretty,
    )
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn read_prints_the_value_as_json() -> anyhow::Result<()> {
    let log = temp_log_path();
    let log = log.to_string_lossy();

    let stdout = run_with_argv(
        &fake_argv(&log, &["read", PUMP, "180d", "2a38"]),
        blesession::OutputFormat::Json,
    )
    .await?;

    let body: serde_json::Value = serde_json::from_str(&stdout)?;
    assert_eq!(serde_json::json!("01"), body["value"]);
    assert_eq!(serde_json::json!(PUMP), body["device_id"]);
    Ok(())
}

#[tokio::test]
async fn write_reports_the_bytes_written() -> anyhow::Result<()> {
    let log = temp_log_path();
    let log = log.to_string_lossy();

    let stdout = run_with_argv(
        &fake_argv(
            &log,
            &[
                "write",
                PUMP,
                "6e400001-b5a3-f393-e0a9-e50e24dcca9e",
                "6e400002-b5a3-f393-e0a9-e50e24dcca9e",
                "01ff",
                "--without-response",
            ],
        ),
        blesession::OutputFormat::Pretty,
    )
    .await?;

    assert!(stdout.contains("Wrote 2 byte(s)"));
    assert!(stdout.contains("without_response"));
    Ok(())
}

#[tokio::test]
async fn write_rejects_a_value_that_is_not_hex() {
    let log = temp_log_path();
    let log = log.to_string_lossy();

    let result = run_with_argv(
        &fake_argv(&log, &["write", PUMP, "180d", "2a38", "zz"]),
        blesession::OutputFormat::Pretty,
    )
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn listened_notifications_are_returned_by_catchup() -> anyhow::Result<()> {
    let log = temp_log_path();
    let fake = blesession::FakeArgs::builder()
        .scan_fixture(FIXTURE)?
        .notifications("0048,0050,0052")?
        .build();
    let mut listen = blesession::Args::try_parse_from([
        "blesession",
        "--notification-log",
        &log.to_string_lossy(),
        "listen",
        PUMP,
        "180d",
        "2a37",
        "--max-notifications",
        "2",
    ])?;
    listen = listen.with_fake(fake);

    let stdout = run_with_parsed_args(listen, blesession::OutputFormat::Pretty).await?;
    assert!(stdout.contains("(Heart Rate Measurement)"));
    assert!(stdout.contains("raw=00 48"));
    assert!(stdout.contains("raw=00 50"));
    assert!(stdout.contains("reached max notifications (2) - received 2 notification(s)"));

    let catchup = blesession::Args::try_parse_from([
        "blesession",
        "--notification-log",
        &log.to_string_lossy(),
        "catchup",
    ])?;
    let stdout = run_with_parsed_args(catchup, blesession::OutputFormat::Json).await?;
    let records: Vec<serde_json::Value> = serde_json::from_str(&stdout)?;
    let values: Vec<&str> = records
        .iter()
        .filter_map(|record| record["value"].as_str())
        .collect();
    assert_eq!(vec!["0048", "0050"], values[..2].to_vec());

    let catchup = blesession::Args::try_parse_from([
        "blesession",
        "--notification-log",
        &log.to_string_lossy(),
        "catchup",
    ])?;
    let stdout = run_with_parsed_args(catchup, blesession::OutputFormat::Pretty).await?;
    assert_eq!("No buffered notifications.", stdout.trim_end());

    Ok(())
}

#[test]
fn fake_scan_fixture_must_be_well_formed() {
    let result = blesession::FakeArgs::builder().scan_fixture("invalid-record");
    assert!(matches!(
        result,
        Err(blesession::FixtureError::InvalidRecordFieldCount)
    ));
}

#[test]
fn fake_notifications_must_be_hex() {
    let result = blesession::FakeArgs::builder()
        .scan_fixture(FIXTURE)
        .map(|builder| builder.notifications("00,zz"));
    assert!(matches!(
        result,
        Ok(Err(blesession::FixtureError::InvalidNotification { .. }))
    ));
}
