//! Common utilities for calc-usbip
//!
//! This crate provides what the USB/IP server and the emulator embedding it
//! share: the device bridge channel pair, the error type, logging setup with
//! the process-wide verbose toggle, and test utilities.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{DeviceBridge, DeviceCommand, DeviceEvent, DeviceLink, create_device_bridge};
pub use error::{Error, Result};
pub use logging::{VerboseFlag, setup_logging};

#[doc(hidden)]
pub use tracing as __tracing;
