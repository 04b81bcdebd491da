//! Completion delivery from the emulated device to the connected client
//!
//! IN data arrives from the device on its own schedule. The completion pump
//! receives it from the bridge, finds the oldest pending request for that
//! endpoint in the *current* session's table, and writes RET_SUBMIT through
//! that same session's [`ReplyWriter`]. The table and the writer are taken
//! from one [`SessionHandle`] snapshot, so a completion can never land on a
//! different session than the one that submitted the request.

use super::pending::PendingUrbTable;
use crate::usb::EmulatedDevice;
use common::{DeviceEvent, VerboseFlag, verbose};
use protocol::{Direction, encode_ret_submit};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Longest a close waits to shut the socket down
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Outbound half of a client connection
///
/// Every reply, synchronous or asynchronous, goes through this one lock, and
/// each is written whole before the lock is released. Closing the writer
/// aborts a write that is stuck on a peer that stopped reading.
#[derive(Clone)]
pub struct ReplyWriter {
    inner: Arc<tokio::sync::Mutex<BoxedWriter>>,
    closed: Arc<watch::Sender<bool>>,
}

impl ReplyWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(Box::new(writer))),
            closed: Arc::new(closed),
        }
    }

    /// Write one complete reply
    ///
    /// Fails with `BrokenPipe` once the writer has been closed, including
    /// while waiting for the lock or in the middle of the write.
    pub async fn send(&self, reply: &[u8]) -> io::Result<()> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(closed_error());
        }

        let write = async {
            let mut writer = self.inner.lock().await;
            writer.write_all(reply).await?;
            writer.flush().await
        };

        tokio::select! {
            result = write => result,
            _ = closed.wait_for(|closed| *closed) => Err(closed_error()),
        }
    }

    /// Abort any write in progress and refuse new ones
    pub fn cancel(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Cancel pending writes, shut the socket down and release it
    ///
    /// The underlying writer is dropped here even if other handles to this
    /// `ReplyWriter` are still alive.
    pub async fn close(&self) {
        self.cancel();
        let shutdown = async {
            let mut writer = self.inner.lock().await;
            let _ = writer.shutdown().await;
            *writer = Box::new(tokio::io::sink());
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, shutdown).await.is_err() {
            debug!("Timed out closing client connection");
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client connection closed")
}

/// What the completion path needs to know about the connected session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: u64,
    pub peer: SocketAddr,
    pub writer: ReplyWriter,
    /// Non-owning: the table lives and dies with its session
    pub pending: Weak<PendingUrbTable>,
}

/// Slot holding the currently connected session, if any
#[derive(Clone, Default)]
pub struct ActiveClient {
    slot: Arc<Mutex<Option<SessionHandle>>>,
}

impl ActiveClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<SessionHandle>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a new session, returning the one it displaces
    pub fn replace(&self, handle: SessionHandle) -> Option<SessionHandle> {
        self.lock().replace(handle)
    }

    /// Clear the slot if it still holds session `id`
    pub fn clear_if(&self, id: u64) -> bool {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|h| h.id == id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Snapshot of the current session
    pub fn current(&self) -> Option<SessionHandle> {
        self.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }
}

/// Outcome of handing one piece of device data to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// RET_SUBMIT written for `seqnum` carrying `length` bytes
    Delivered { seqnum: u32, length: usize },
    /// No client connected; data dropped
    NoClient,
    /// Client connected but nothing pending on the endpoint; data dropped
    Unmatched,
    /// The reply could not be written; the session will notice on its own
    WriteFailed,
}

/// Complete the oldest pending IN request on `ep` with `data`
///
/// Data longer than the host asked for is truncated to the requested length.
pub async fn deliver_completion(
    active: &ActiveClient,
    ep: u32,
    data: &[u8],
    verbose: &VerboseFlag,
) -> Delivery {
    let Some(session) = active.current() else {
        verbose!(verbose, "Dropped device packet EP{} size {} (no client)", ep, data.len());
        return Delivery::NoClient;
    };
    let Some(request) = session.pending.upgrade().and_then(|table| table.take(ep)) else {
        verbose!(
            verbose,
            "Dropped device packet EP{} size {} (no pending request)",
            ep,
            data.len()
        );
        return Delivery::Unmatched;
    };

    let length = data.len().min(request.length as usize);
    let reply = encode_ret_submit(
        request.seqnum,
        request.devid,
        Direction::In.raw(),
        ep,
        0,
        length as u32,
        &data[..length],
    );

    verbose!(
        verbose,
        "RET_SUBMIT seq {} EP{} len {}/{}",
        request.seqnum,
        ep,
        length,
        request.length
    );

    if let Err(e) = session.writer.send(&reply).await {
        warn!(
            "Failed to deliver completion seq {} to {}: {}",
            request.seqnum, session.peer, e
        );
        return Delivery::WriteFailed;
    }

    Delivery::Delivered {
        seqnum: request.seqnum,
        length,
    }
}

/// Drain IN data from the device and deliver it until the bridge closes
pub fn spawn_completion_pump(
    device: EmulatedDevice,
    active: ActiveClient,
    verbose: VerboseFlag,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match device.recv_event().await {
                Ok(DeviceEvent::InData { ep, data }) => {
                    deliver_completion(&active, ep, &data, &verbose).await;
                }
                Err(e) => {
                    debug!("Device bridge closed, completion pump exiting: {}", e);
                    break;
                }
            }
        }
    })
}
