//! USB/IP server for an emulated TI-Nspire calculator
//!
//! Exports a single fixed USB device over the USB/IP protocol so that a host's
//! stock USB/IP client can attach it as if it were plugged in locally. The
//! emulated hardware sits on the other side of a [`common::DeviceBridge`].
//!
//! ```no_run
//! use common::create_device_bridge;
//! use server::{ServerOptions, UsbIpServer, usb::spawn_loopback_device};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let (bridge, link) = create_device_bridge();
//! let _device = spawn_loopback_device(link)?;
//!
//! let server = UsbIpServer::new(ServerOptions::default(), bridge);
//! let addr = server.start().await?;
//! println!("listening on {}", addr);
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod network;
pub mod usb;

pub use config::ServerConfig;
pub use network::{ServerOptions, ServerState, UsbIpServer};
