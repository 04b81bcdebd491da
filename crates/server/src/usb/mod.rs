//! Emulated device side of the server
//!
//! [`EmulatedDevice`] is the server's view of the calculator behind the
//! device bridge. [`LoopbackDevice`] stands in for the emulator when the
//! binary runs on its own.

pub mod device;
pub mod loopback;

pub use device::{DEFAULT_PRESENT_PULSE, DEFAULT_RESET_PULSE, EmulatedDevice};
pub use loopback::{LoopbackDevice, spawn_loopback_device};
