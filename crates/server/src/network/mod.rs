//! Network subsystem
//!
//! USB/IP over TCP: the accept loop, the per-client session, the pending-URB
//! table and the asynchronous completion path.
//!
//! # Architecture
//!
//! ```text
//! UsbIpServer
//!   ├─> accept loop (one client at a time)
//!   │     ├─> tear down previous session, abandon its pending URBs
//!   │     ├─> bus reset pulse
//!   │     └─> spawn Session
//!   │           ├─> devlist / import replies
//!   │           ├─> OUT submits: deliver to device, reply immediately
//!   │           ├─> IN submits: park in PendingUrbTable
//!   │           └─> unlink: dequeue and acknowledge
//!   └─> completion pump
//!         └─> device IN data -> oldest pending request -> RET_SUBMIT
//! ```

pub mod completion;
pub mod pending;
pub mod server;
pub mod session;

pub use completion::{
    ActiveClient, Delivery, ReplyWriter, SessionHandle, deliver_completion, spawn_completion_pump,
};
pub use pending::{PendingRequest, PendingUrbTable};
pub use server::{ServerOptions, ServerState, UsbIpServer};
pub use session::Session;
