//! Uptime reporting and the periodic stats task

mod test_helpers;

use homie_device::{spawn_stats_reporter, DeviceError, DeviceHandlers, TransportError};
use std::time::Duration;
use test_helpers::mock_device;

#[tokio::test]
async fn test_uptime_is_non_decreasing() {
    let (device, transport) = mock_device(DeviceHandlers::default());
    device.connect().await.unwrap();

    device.publish_stats().await.unwrap();
    device.publish_stats().await.unwrap();

    let reported: Vec<u64> = transport
        .payloads_for("home/sensor1/$stats/uptime")
        .iter()
        .map(|v| v.parse().unwrap())
        .collect();
    assert_eq!(reported.len(), 3);
    assert!(reported.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_publish_stats_while_disconnected() {
    let (device, transport) = mock_device(DeviceHandlers::default());

    let error = device.publish_stats().await.unwrap_err();

    assert!(matches!(
        error,
        DeviceError::Transport(TransportError::NotConnected)
    ));
    assert!(transport.published_messages().is_empty());
}

#[tokio::test]
async fn test_startup_time_precedes_connect_time() {
    let (device, _transport) = mock_device(DeviceHandlers::default());
    device.connect().await.unwrap();

    let stats = device.stats();
    assert!(stats.startup_time() <= stats.connect_time().unwrap());
}

#[tokio::test]
async fn test_reporter_publishes_periodically() {
    let (device, transport) = mock_device(DeviceHandlers::default());
    device.connect().await.unwrap();

    let reporter = spawn_stats_reporter(device.clone(), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(200)).await;
    reporter.abort();

    // Bootstrap published one, the reporter the rest
    assert!(transport.payloads_for("home/sensor1/$stats/uptime").len() >= 3);
}

#[tokio::test]
async fn test_reporter_idles_while_disconnected() {
    let (device, transport) = mock_device(DeviceHandlers::default());

    let reporter = spawn_stats_reporter(device.clone(), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(100)).await;
    reporter.abort();

    assert!(transport.published_messages().is_empty());
}
