//! Test utilities for calc-usbip
//!
//! Provides a recording stand-in for the emulated device and async timeout
//! helpers shared by the crates' tests.
//!
//! # Example
//!
//! ```
//! use common::create_device_bridge;
//! use common::test_utils::RecordingDevice;
//!
//! let (bridge, link) = create_device_bridge();
//! let device = RecordingDevice::spawn(link);
//! bridge.try_send_command(common::DeviceCommand::SetPresent(true)).unwrap();
//! drop(bridge);
//! let commands = device.join();
//! assert_eq!(commands, vec![common::DeviceCommand::SetPresent(true)]);
//! ```

use crate::channel::{DeviceCommand, DeviceLink};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Emulation-side stand-in that records every command the server sends
///
/// Runs on its own thread like a real emulator would, and can inject IN data
/// back into the server through its [`DeviceLink`].
pub struct RecordingDevice {
    link: DeviceLink,
    commands: Arc<Mutex<Vec<DeviceCommand>>>,
    handle: JoinHandle<()>,
}

impl RecordingDevice {
    /// Start recording commands arriving on `link`
    ///
    /// The thread exits on [`DeviceCommand::Shutdown`] or when the server
    /// side of the bridge is dropped.
    pub fn spawn(link: DeviceLink) -> Self {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let thread_link = link.clone();
        let thread_commands = commands.clone();

        let handle = std::thread::spawn(move || {
            while let Ok(cmd) = thread_link.recv_command() {
                let stop = cmd == DeviceCommand::Shutdown;
                thread_commands
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(cmd);
                if stop {
                    break;
                }
            }
        });

        Self {
            link,
            commands,
            handle,
        }
    }

    /// Snapshot of the commands received so far
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Produce IN data for `ep`, as the emulated controller's DMA would
    pub fn send_in_data(&self, ep: u32, data: &[u8]) {
        let _ = self.link.send_in_data(ep, data.to_vec());
    }

    /// Wait until a recorded command satisfies `predicate`
    pub async fn wait_for<P>(&self, timeout: Duration, predicate: P) -> bool
    where
        P: Fn(&DeviceCommand) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.commands().iter().any(&predicate) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait for the recording thread to exit and return everything it saw
    pub fn join(self) -> Vec<DeviceCommand> {
        let Self {
            link,
            commands,
            handle,
        } = self;
        // Our clone of the link must not keep the command queue open.
        drop(link);
        let _ = handle.join();
        commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Run a future with a timeout
///
/// # Example
/// ```no_run
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Standard 18-byte device descriptor of the emulated calculator
///
/// What the device answers to GET_DESCRIPTOR(Device).
pub fn calculator_device_descriptor() -> Vec<u8> {
    protocol::DEVICE_DESCRIPTOR.to_vec()
}
