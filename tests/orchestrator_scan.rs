use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::rstest;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use blesession::{
    BleError, BleOrchestrator, CallbackContext, CallbackEvent, FakePlatform, FakePlatformConfig,
    InitStatus, NotificationLog, OperationValue, OrchestratorConfig, ScanOptions, ScanState,
};

const FIXTURE: &str = "AA:BB:CC:DD:EE:02|Scale-7|-70;AA:BB:CC:DD:EE:01|Pump-01|-48|180d";

async fn ready(fixture: &str) -> (FakePlatform, BleOrchestrator) {
    let platform = FakePlatform::new(
        FakePlatformConfig::builder()
            .scan_fixture(fixture.parse().expect("fixture should parse"))
            .build(),
    );
    let orchestrator = BleOrchestrator::new(
        Arc::new(platform.clone()),
        NotificationLog::in_memory(),
        OrchestratorConfig::default(),
    );
    assert_eq!(InitStatus::Ready, orchestrator.initialize().await);
    (platform, orchestrator)
}

fn prefixed(prefix: &str) -> ScanOptions {
    ScanOptions::builder().name_prefix(prefix).build()
}

async fn drain_results(events: &mut UnboundedReceiver<CallbackEvent>) -> Vec<String> {
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CallbackEvent::ScanResult(result) = event {
            names.push(result.device().device_id().to_string());
        }
    }
    names
}

#[tokio::test(start_paused = true)]
async fn bounded_scan_reports_the_first_prefixed_device() {
    let (platform, orchestrator) = ready(FIXTURE).await;

    let (ctx, mut events) = CallbackContext::recording();
    orchestrator
        .request_device(prefixed("Pump-"), None, ctx)
        .await;

    let found = match events.recv().await {
        Some(CallbackEvent::Device(found)) => found,
        other => panic!("expected a device, got {other:?}"),
    };
    assert_eq!(Some("Pump-01"), found.name());
    assert_eq!(Some(ScanState::Stopped), orchestrator.scan_state().await);
    assert!(!platform.scan_active());
}

#[tokio::test(start_paused = true)]
async fn bounded_scan_without_a_match_times_out() {
    let (platform, orchestrator) = ready(FIXTURE).await;

    let (ctx, mut events) = CallbackContext::recording();
    orchestrator
        .request_device(prefixed("Lamp-"), Some(Duration::from_millis(30_000)), ctx)
        .await;

    let error = match events.recv().await {
        Some(CallbackEvent::Fail(error)) => error,
        other => panic!("expected a failure, got {other:?}"),
    };
    assert_eq!(BleError::NoDeviceFound, error);
    assert_eq!("No device found.", error.to_string());
    assert_eq!(Some(ScanState::TimedOut), orchestrator.scan_state().await);
    assert!(!platform.scan_active());
}

#[tokio::test(start_paused = true)]
async fn bounded_scan_duration_is_capped() {
    let (_platform, orchestrator) = ready(FIXTURE).await;
    let started = Instant::now();

    let (ctx, mut events) = CallbackContext::recording();
    orchestrator
        .request_device(prefixed("Lamp-"), Some(Duration::from_secs(120)), ctx)
        .await;

    assert_eq!(
        Some(CallbackEvent::Fail(BleError::NoDeviceFound)),
        events.recv().await
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(30));
    assert!(elapsed < Duration::from_secs(31));
}

#[tokio::test(start_paused = true)]
async fn stopping_a_bounded_scan_reports_scan_stopped() {
    let (_platform, orchestrator) = ready(FIXTURE).await;

    let (ctx, mut events) = CallbackContext::recording();
    orchestrator
        .request_device(prefixed("Lamp-"), None, ctx)
        .await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    orchestrator.stop_scan().await.expect("stop succeeds");

    assert_eq!(
        Some(CallbackEvent::Fail(BleError::ScanStopped)),
        events.recv().await
    );
}

#[rstest]
#[case::once_per_device(false, 2)]
#[case::every_advertisement(true, 3)]
#[tokio::test(start_paused = true)]
async fn continuous_scan_filters_duplicates(
    #[case] allow_duplicates: bool,
    #[case] expected: usize,
) {
    let fixture = "AA:BB:CC:DD:EE:01|Pump-01|-48;AA:BB:CC:DD:EE:01|Pump-01|-50;AA:BB:CC:DD:EE:02|Scale-7|-70";
    let (_platform, orchestrator) = ready(fixture).await;

    let (ctx, mut events) = CallbackContext::recording();
    orchestrator
        .request_scan(ScanOptions::default(), allow_duplicates, ctx)
        .await;

    assert_eq!(
        Some(CallbackEvent::Success(OperationValue::None)),
        events.recv().await
    );
    assert_eq!(expected, drain_results(&mut events).await.len());
    assert_eq!(Some(ScanState::Scanning), orchestrator.scan_state().await);
}

#[tokio::test(start_paused = true)]
async fn continuous_scan_applies_the_name_prefix() {
    let (_platform, orchestrator) = ready(FIXTURE).await;

    let (ctx, mut events) = CallbackContext::recording();
    orchestrator.request_scan(prefixed("Scale-"), false, ctx).await;

    assert_eq!(
        Some(CallbackEvent::Success(OperationValue::None)),
        events.recv().await
    );
    assert_eq!(
        vec!["AA:BB:CC:DD:EE:02".to_string()],
        drain_results(&mut events).await
    );
}

#[tokio::test(start_paused = true)]
async fn a_new_scan_replaces_the_running_one() {
    let (_platform, orchestrator) = ready(FIXTURE).await;

    let (first, mut first_events) = CallbackContext::recording();
    orchestrator
        .request_scan(ScanOptions::default(), false, first)
        .await;
    let (second, mut second_events) = CallbackContext::recording();
    orchestrator
        .request_scan(ScanOptions::default(), false, second)
        .await;

    assert_eq!(
        Some(CallbackEvent::Success(OperationValue::None)),
        second_events.recv().await
    );
    drain_results(&mut first_events).await;
    assert_eq!(None, first_events.recv().await);
}

#[tokio::test(start_paused = true)]
async fn failed_stop_of_the_running_scan_fails_the_new_request() {
    let (platform, orchestrator) = ready(FIXTURE).await;

    let (first, _first_events) = CallbackContext::recording();
    orchestrator
        .request_scan(ScanOptions::default(), false, first)
        .await;
    platform.reject_stop_scan(true);

    let (second, mut second_events) = CallbackContext::recording();
    orchestrator
        .request_device(prefixed("Pump-"), None, second)
        .await;

    assert_eq!(
        Some(CallbackEvent::Fail(BleError::PlatformRejected {
            reason: "stopScan rejected by platform".to_string()
        })),
        second_events.recv().await
    );
    assert_eq!(Some(ScanState::Scanning), orchestrator.scan_state().await);
    assert!(orchestrator.stop_scan().await.is_err());

    platform.reject_stop_scan(false);
    orchestrator.stop_scan().await.expect("stop succeeds");
    assert_eq!(None, orchestrator.scan_state().await);
    assert!(!platform.scan_active());
}

#[tokio::test(start_paused = true)]
async fn malformed_service_filter_is_rejected() {
    let (platform, orchestrator) = ready(FIXTURE).await;
    let options = ScanOptions::builder()
        .services(vec!["not-a-uuid".to_string()])
        .build();

    let (ctx, mut events) = CallbackContext::recording();
    orchestrator.request_scan(options, false, ctx).await;

    assert_eq!(
        Some(CallbackEvent::Fail(BleError::InvalidFilter {
            reason: "Invalid service UUID.".to_string()
        })),
        events.recv().await
    );
    assert!(!platform.scan_active());
}

#[tokio::test(start_paused = true)]
async fn stopping_without_a_scan_succeeds() {
    let (_platform, orchestrator) = ready(FIXTURE).await;

    assert_eq!(Ok(()), orchestrator.stop_scan().await);
    assert_eq!(None, orchestrator.scan_state().await);
}
