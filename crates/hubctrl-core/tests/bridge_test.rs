//! GpioBridge Receive Loop Tests
//!
//! Tests the control loop including:
//! - Processing a payload stream in order
//! - Error isolation between messages
//! - Shutdown and handle release

use futures::stream;
use hubctrl_core::pin::recording::{PinCall, RecordingPinControl};
use hubctrl_core::{DispatchOptions, GpioBridge, PinLevel, PinMode, StopReason};
use std::sync::Arc;
use std::time::Duration;

fn payloads(items: &[&str]) -> Vec<Vec<u8>> {
    items.iter().map(|s| s.as_bytes().to_vec()).collect()
}

#[tokio::test]
async fn test_open_calls_backend() {
    let control = RecordingPinControl::new();
    let bridge = GpioBridge::open(Arc::new(control.clone()), DispatchOptions::default())
        .await
        .unwrap();

    assert_eq!(control.calls(), vec![PinCall::Open]);
    assert_eq!(bridge.stats().received, 0);
}

#[tokio::test]
async fn test_run_until_stream_ends() {
    let control = RecordingPinControl::new();
    let bridge = GpioBridge::open(Arc::new(control.clone()), DispatchOptions::default())
        .await
        .unwrap();

    let input = payloads(&[
        r#"{"Type":"GPIOLevel","GPIO":4,"Level":"High"}"#,
        r#"not json"#,
        r#"{"Type":"GPIOSetMode","GPIO":4,"Mode":"Output"}"#,
        r#"{"Type":"Reboot"}"#,
        r#"{"Type":"GPIOLevel","GPIO":4,"Level":"High"}"#,
        r#"{"Type":"GPIOLevel","GPIO":4,"Level":"Bright"}"#,
    ]);

    let reason = bridge
        .run(stream::iter(input), futures::future::pending())
        .await;
    assert_eq!(reason, StopReason::StreamEnded);

    let stats = bridge.stats();
    assert_eq!(stats.received, 6);
    assert_eq!(stats.applied, 2);
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.rejected, 3);
    assert_eq!(stats.failed, 0);
    assert!(stats.last_activity > 0);

    assert_eq!(
        control.physical_calls(),
        vec![PinCall::ConfigureOutput(4), PinCall::DriveHigh(4)]
    );

    let states = bridge.pin_states().await;
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].mode, Some(PinMode::Output));
    assert_eq!(states[0].level, Some(PinLevel::High));
}

#[tokio::test]
async fn test_backend_fault_counts_as_failed() {
    let control = RecordingPinControl::new();
    let bridge = GpioBridge::open(Arc::new(control.clone()), DispatchOptions::default())
        .await
        .unwrap();
    control.fail_pin(3);

    bridge
        .process(br#"{"Type":"GPIOSetMode","GPIO":3,"Mode":"Output"}"#)
        .await
        .unwrap_err();
    bridge
        .process(br#"{"Type":"GPIOSetMode","GPIO":2,"Mode":"Output"}"#)
        .await
        .unwrap();

    let stats = bridge.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.applied, 1);
}

#[tokio::test]
async fn test_shutdown_future_stops_loop() {
    let control = RecordingPinControl::new();
    let bridge = GpioBridge::open(Arc::new(control.clone()), DispatchOptions::default())
        .await
        .unwrap();

    let (tx, rx) = futures::channel::mpsc::unbounded::<Vec<u8>>();
    tx.unbounded_send(br#"{"Type":"GPIOSetMode","GPIO":17,"Mode":"Output"}"#.to_vec())
        .unwrap();

    let reason = bridge
        .run(rx, tokio::time::sleep(Duration::from_millis(50)))
        .await;
    assert_eq!(reason, StopReason::Shutdown);
    assert_eq!(bridge.stats().received, 1);
    drop(tx);
}

#[tokio::test]
async fn test_shutdown_releases_handles_then_closes() {
    let control = RecordingPinControl::new();
    let bridge = GpioBridge::open(Arc::new(control.clone()), DispatchOptions::default())
        .await
        .unwrap();
    for pin in [22, 17] {
        bridge
            .process(format!(r#"{{"Type":"GPIOSetMode","GPIO":{pin},"Mode":"Output"}}"#).as_bytes())
            .await
            .unwrap();
    }

    bridge.shutdown().await.unwrap();

    let calls = control.calls();
    let tail = &calls[calls.len() - 3..];
    assert_eq!(
        tail,
        &[PinCall::Release(17), PinCall::Release(22), PinCall::Close]
    );
}
