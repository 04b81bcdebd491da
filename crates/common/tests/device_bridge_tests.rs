//! Device Bridge Integration Tests
//!
//! Tests for the channel pair between the USB/IP server and the emulation
//! thread.
//!
//! # Test Scenarios
//! - Command ordering from the server to the device
//! - IN data from a blocking thread to the async side
//! - Shutdown and disconnect of either end
//! - Back-pressure on the bounded command queue
//!
//! Run with: `cargo test -p common --test device_bridge_tests`

use common::channel::COMMAND_QUEUE_CAPACITY;
use common::test_utils::{DEFAULT_TEST_TIMEOUT, RecordingDevice, with_timeout};
use common::{DeviceCommand, DeviceEvent, create_device_bridge};
use protocol::SetupPacket;
use std::thread;
use std::time::Duration;

// ============================================================================
// Server → Device
// ============================================================================

#[tokio::test]
async fn test_commands_arrive_in_order() {
    let (bridge, link) = create_device_bridge();
    let device = RecordingDevice::spawn(link);

    let setup = SetupPacket::from_bytes([0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);
    let sent = vec![
        DeviceCommand::BusReset(true),
        DeviceCommand::BusReset(false),
        DeviceCommand::Setup(setup),
        DeviceCommand::OutData {
            ep: 2,
            data: vec![1, 2, 3],
        },
    ];
    for cmd in &sent {
        bridge.send_command(cmd.clone()).await.unwrap();
    }
    bridge.send_command(DeviceCommand::Shutdown).await.unwrap();

    let mut received = device.join();
    assert_eq!(received.pop(), Some(DeviceCommand::Shutdown));
    assert_eq!(received, sent);
}

#[tokio::test]
async fn test_send_fails_after_device_gone() {
    let (bridge, link) = create_device_bridge();
    drop(link);

    assert!(bridge.send_command(DeviceCommand::SetPresent(true)).await.is_err());
}

#[test]
fn test_command_queue_is_bounded() {
    let (bridge, _link) = create_device_bridge();

    for _ in 0..COMMAND_QUEUE_CAPACITY {
        bridge
            .try_send_command(DeviceCommand::SetPresent(true))
            .unwrap();
    }
    assert!(
        bridge
            .try_send_command(DeviceCommand::SetPresent(false))
            .is_err()
    );
}

// ============================================================================
// Device → Server
// ============================================================================

#[tokio::test]
async fn test_in_data_from_emulation_thread() {
    let (bridge, link) = create_device_bridge();

    let handle = thread::spawn(move || {
        for ep in 1..=3u32 {
            link.send_in_data(ep, vec![ep as u8; ep as usize]).unwrap();
        }
    });

    for ep in 1..=3u32 {
        let event = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.recv_event())
            .await
            .expect("timed out")
            .expect("bridge closed");
        assert_eq!(
            event,
            DeviceEvent::InData {
                ep,
                data: vec![ep as u8; ep as usize]
            }
        );
    }

    handle.join().unwrap();
}

#[tokio::test]
async fn test_recv_event_fails_when_device_gone() {
    let (bridge, link) = create_device_bridge();
    drop(link);

    let result = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.recv_event())
        .await
        .expect("timed out");
    assert!(result.is_err());
}

#[test]
fn test_send_in_data_never_blocks() {
    let (_bridge, link) = create_device_bridge();

    // Far more than the command capacity; the event queue is unbounded.
    for i in 0..(COMMAND_QUEUE_CAPACITY * 4) {
        link.send_in_data(1, vec![i as u8]).unwrap();
    }
}

// ============================================================================
// RecordingDevice
// ============================================================================

#[tokio::test]
async fn test_recording_device_wait_for() {
    let (bridge, link) = create_device_bridge();
    let device = RecordingDevice::spawn(link);

    let sender = bridge.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = sender.send_command(DeviceCommand::BusReset(true)).await;
    });

    assert!(
        device
            .wait_for(DEFAULT_TEST_TIMEOUT, |cmd| *cmd == DeviceCommand::BusReset(true))
            .await
    );
    assert!(
        !device
            .wait_for(Duration::from_millis(20), |cmd| *cmd
                == DeviceCommand::SetPresent(true))
            .await
    );

    drop(bridge);
    device.join();
}
