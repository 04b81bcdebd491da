//! Server-side adapter for the emulated calculator
//!
//! Wraps the [`DeviceBridge`] with the operations the connection manager and
//! session need: presence and reset pulses, setup packets and OUT data.
//! Delivery failures mean the emulator has gone away; they are logged and
//! never abort a session.

use common::{DeviceBridge, DeviceCommand, DeviceEvent};
use protocol::SetupPacket;
use std::time::Duration;
use tracing::{debug, warn};

/// Default length of the presence pulse issued when the server starts
pub const DEFAULT_PRESENT_PULSE: Duration = Duration::from_millis(100);

/// Default length of the bus reset issued for every new client
pub const DEFAULT_RESET_PULSE: Duration = Duration::from_millis(50);

/// Handle to the emulated device as seen from the server
#[derive(Clone)]
pub struct EmulatedDevice {
    bridge: DeviceBridge,
    present_pulse: Duration,
    reset_pulse: Duration,
}

impl EmulatedDevice {
    pub fn new(bridge: DeviceBridge, present_pulse: Duration, reset_pulse: Duration) -> Self {
        Self {
            bridge,
            present_pulse,
            reset_pulse,
        }
    }

    /// Drive the presence line
    pub async fn set_present(&self, present: bool) {
        self.send(DeviceCommand::SetPresent(present)).await;
    }

    /// Drop the presence line without waiting for queue space
    ///
    /// Used on shutdown, where a stalled emulator must not hold up `stop()`.
    pub fn try_set_present(&self, present: bool) {
        if let Err(e) = self.bridge.try_send_command(DeviceCommand::SetPresent(present)) {
            debug!("Could not signal presence={} to device: {}", present, e);
        }
    }

    /// Signal presence, then absence once the pulse has elapsed
    ///
    /// Mimics a hot-plug so the emulated OS re-enumerates right away. The
    /// trailing edge is sent from a detached task.
    pub async fn present_pulse(&self) {
        self.set_present(true).await;

        let device = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(device.present_pulse).await;
            device.set_present(false).await;
        });
    }

    /// Assert bus reset, hold it for the reset pulse, then release it
    pub async fn bus_reset_pulse(&self) {
        self.send(DeviceCommand::BusReset(true)).await;
        tokio::time::sleep(self.reset_pulse).await;
        self.send(DeviceCommand::BusReset(false)).await;
    }

    /// Hand the setup stage of a control transfer to the device
    pub async fn deliver_setup(&self, setup: SetupPacket) {
        self.send(DeviceCommand::Setup(setup)).await;
    }

    /// Hand OUT data for `ep` to the device
    pub async fn deliver_out(&self, ep: u32, data: Vec<u8>) {
        self.send(DeviceCommand::OutData { ep, data }).await;
    }

    /// Next IN data produced by the device
    pub async fn recv_event(&self) -> common::Result<DeviceEvent> {
        self.bridge.recv_event().await
    }

    async fn send(&self, cmd: DeviceCommand) {
        if let Err(e) = self.bridge.send_command(cmd).await {
            warn!("Emulated device unavailable: {}", e);
        }
    }
}
