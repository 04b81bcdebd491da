//! Async channel bridge between the USB/IP server and the emulated device
//!
//! The emulator drives its USB controller from its own thread; the server
//! runs on Tokio. Neither side calls into the other directly: commands flow
//! server → device over a bounded queue, and IN data flows device → server
//! over an unbounded one so the emulation thread never blocks on the network.

use async_channel::{Receiver, Sender, TryRecvError, bounded, unbounded};
use protocol::SetupPacket;

/// Capacity of the server → device command queue
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Commands from the server to the emulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Drive the device's VBUS/presence line
    SetPresent(bool),

    /// Assert (`true`) or release (`false`) USB bus reset
    BusReset(bool),

    /// Setup stage of a control transfer on endpoint 0
    Setup(SetupPacket),

    /// OUT data for an endpoint
    OutData {
        /// Endpoint number
        ep: u32,
        /// Payload exactly as the host sent it
        data: Vec<u8>,
    },

    /// Stop the device-side worker
    Shutdown,
}

/// Events from the emulated device to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device produced IN data for an endpoint
    InData {
        /// Endpoint number
        ep: u32,
        /// Data as produced by the device (may exceed the host's request)
        data: Vec<u8>,
    },
}

/// Handle for the server (async)
#[derive(Clone)]
pub struct DeviceBridge {
    cmd_tx: Sender<DeviceCommand>,
    event_rx: Receiver<DeviceEvent>,
}

impl DeviceBridge {
    /// Send a command to the device
    pub async fn send_command(&self, cmd: DeviceCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command without waiting for queue space
    pub fn try_send_command(&self, cmd: DeviceCommand) -> crate::Result<()> {
        self.cmd_tx
            .try_send(cmd)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next event from the device
    pub async fn recv_event(&self) -> crate::Result<DeviceEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for the emulation thread (blocking or polling)
#[derive(Clone)]
pub struct DeviceLink {
    cmd_rx: Receiver<DeviceCommand>,
    event_tx: Sender<DeviceEvent>,
}

impl DeviceLink {
    /// Receive a command from the server (blocking)
    pub fn recv_command(&self) -> crate::Result<DeviceCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Poll for a command; `Ok(None)` when the queue is empty
    ///
    /// Suited to emulators that service USB between instruction batches.
    pub fn try_recv_command(&self) -> crate::Result<Option<DeviceCommand>> {
        match self.cmd_rx.try_recv() {
            Ok(cmd) => Ok(Some(cmd)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(e @ TryRecvError::Closed) => Err(crate::Error::Channel(e.to_string())),
        }
    }

    /// Hand IN data for `ep` to the server; never blocks
    pub fn send_in_data(&self, ep: u32, data: Vec<u8>) -> crate::Result<()> {
        self.event_tx
            .try_send(DeviceEvent::InData { ep, data })
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between the server and the emulated device
///
/// Returns (DeviceBridge for the server, DeviceLink for the emulation thread)
pub fn create_device_bridge() -> (DeviceBridge, DeviceLink) {
    let (cmd_tx, cmd_rx) = bounded(COMMAND_QUEUE_CAPACITY);
    let (event_tx, event_rx) = unbounded();

    (
        DeviceBridge { cmd_tx, event_rx },
        DeviceLink { cmd_rx, event_tx },
    )
}
