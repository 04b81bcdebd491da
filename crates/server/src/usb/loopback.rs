//! Loopback stand-in for the emulated calculator
//!
//! Lets the server binary run without an emulator attached: OUT data is
//! echoed back as IN data on the same endpoint, and GET_DESCRIPTOR for the
//! device and configuration descriptors is answered so a host can enumerate
//! it. Other control transfers that expect data get a zero-length packet.
//! Presence and reset signals are only logged. Runs on a dedicated thread, the way an emulation
//! core would.

use common::{DeviceCommand, DeviceLink};
use protocol::{
    CONFIGURATION_DESCRIPTOR, DESCRIPTOR_TYPE_CONFIGURATION, DESCRIPTOR_TYPE_DEVICE,
    DEVICE_DESCRIPTOR, REQUEST_GET_DESCRIPTOR, SetupPacket,
};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Loopback device worker
pub struct LoopbackDevice {
    link: DeviceLink,
    in_reset: bool,
}

impl LoopbackDevice {
    pub fn new(link: DeviceLink) -> Self {
        Self {
            link,
            in_reset: false,
        }
    }

    /// Process commands until shutdown or until the server side goes away
    pub fn run(mut self) {
        info!("Loopback device started");

        loop {
            let cmd = match self.link.recv_command() {
                Ok(cmd) => cmd,
                Err(e) => {
                    debug!("Loopback device bridge closed: {}", e);
                    break;
                }
            };

            if cmd == DeviceCommand::Shutdown {
                info!("Loopback device shutting down");
                break;
            }
            self.handle_command(cmd);
        }

        info!("Loopback device stopped");
    }

    fn handle_command(&mut self, cmd: DeviceCommand) {
        match cmd {
            DeviceCommand::SetPresent(present) => {
                info!("Loopback device presence: {}", present);
            }
            DeviceCommand::BusReset(asserted) => {
                self.in_reset = asserted;
                debug!("Loopback device bus reset: {}", asserted);
            }
            DeviceCommand::Setup(setup) => {
                debug!("Loopback device setup: {}", setup);
                if setup.is_device_to_host() && setup.length > 0 {
                    self.produce(0, control_in_response(setup));
                }
            }
            DeviceCommand::OutData { ep, data } => {
                if self.in_reset {
                    debug!("Loopback device ignoring EP{} data during reset", ep);
                    return;
                }
                // Control OUT data stages have no IN counterpart.
                if ep != 0 {
                    self.produce(ep, data);
                }
            }
            DeviceCommand::Shutdown => {}
        }
    }

    fn produce(&self, ep: u32, data: Vec<u8>) {
        if let Err(e) = self.link.send_in_data(ep, data) {
            warn!("Loopback device could not deliver EP{} data: {}", ep, e);
        }
    }
}

/// Data stage for a device-to-host control request
///
/// Device and configuration descriptors are answered in full (the server
/// truncates to `wLength`); anything else gets a zero-length packet.
fn control_in_response(setup: SetupPacket) -> Vec<u8> {
    if setup.request != REQUEST_GET_DESCRIPTOR || setup.request_type & 0x60 != 0 {
        return Vec::new();
    }
    match (setup.value >> 8) as u8 {
        DESCRIPTOR_TYPE_DEVICE => DEVICE_DESCRIPTOR.to_vec(),
        DESCRIPTOR_TYPE_CONFIGURATION => CONFIGURATION_DESCRIPTOR.to_vec(),
        _ => Vec::new(),
    }
}

/// Spawn the loopback device on its own thread
pub fn spawn_loopback_device(link: DeviceLink) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("loopback-device".to_string())
        .spawn(move || LoopbackDevice::new(link).run())
}
