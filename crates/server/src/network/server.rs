//! USB/IP Connection Manager
//!
//! Owns the TCP listener and the single active client. Accepting a new
//! connection tears the previous session down (its pending IN requests are
//! abandoned without replies), pulses a bus reset on the emulated device, and
//! then hands the socket to a fresh [`Session`].

use anyhow::{Context, Result};
use common::{DeviceBridge, VerboseFlag};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::completion::{ActiveClient, ReplyWriter, SessionHandle, spawn_completion_pump};
use super::pending::PendingUrbTable;
use super::session::Session;
use crate::config::ServerConfig;
use crate::usb::{DEFAULT_PRESENT_PULSE, DEFAULT_RESET_PULSE, EmulatedDevice};

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Lifecycle of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, never started
    Idle,
    /// Listening with no client attached; also where a disconnect leads
    Listening,
    /// Serving one client
    ClientConnected,
    /// Shut down; may be started again
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Idle => "idle",
            ServerState::Listening => "listening",
            ServerState::ClientConnected => "client connected",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Tunables for [`UsbIpServer`]
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind_addr: SocketAddr,
    pub present_pulse: Duration,
    pub reset_pulse: Duration,
    pub verbose: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], protocol::USBIP_PORT)),
            present_pulse: DEFAULT_PRESENT_PULSE,
            reset_pulse: DEFAULT_RESET_PULSE,
            verbose: false,
        }
    }
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Ok(Self {
            bind_addr: config.bind_addr()?,
            present_pulse: config.device.present_pulse(),
            reset_pulse: config.device.reset_pulse(),
            verbose: config.server.verbose,
        })
    }
}

/// State shared between the server handle and its accept loop
struct Shared {
    device: EmulatedDevice,
    active: ActiveClient,
    state: StdMutex<ServerState>,
    verbose: VerboseFlag,
    next_session_id: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ServerState) {
        let mut current = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *current != state {
            debug!("Server state: {} -> {}", *current, state);
            *current = state;
        }
    }

    fn state(&self) -> ServerState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
    pump_task: JoinHandle<()>,
}

/// The session currently owned by the accept loop
struct ActiveSession {
    id: u64,
    peer: SocketAddr,
    pending: Arc<PendingUrbTable>,
    writer: ReplyWriter,
    cancel_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// USB/IP server exporting the emulated calculator
///
/// Exactly one instance coordinates the export; the embedding application
/// constructs it with the host side of the device bridge and keeps the handle
/// for as long as the emulated machine runs.
pub struct UsbIpServer {
    options: ServerOptions,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl UsbIpServer {
    pub fn new(options: ServerOptions, bridge: DeviceBridge) -> Self {
        let device = EmulatedDevice::new(bridge, options.present_pulse, options.reset_pulse);
        let verbose = VerboseFlag::new(options.verbose);
        Self {
            options,
            shared: Arc::new(Shared {
                device,
                active: ActiveClient::new(),
                state: StdMutex::new(ServerState::Idle),
                verbose,
                next_session_id: AtomicU64::new(1),
            }),
            running: Mutex::new(None),
        }
    }

    /// Bind the listener and start serving
    ///
    /// Returns the bound address. Calling `start` on a running server is a
    /// no-op that returns the existing address. Bind failures are returned
    /// and not retried.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(r) = running.as_ref() {
            return Ok(r.local_addr);
        }

        let listener = TcpListener::bind(self.options.bind_addr)
            .await
            .with_context(|| format!("Failed to bind USB/IP listener on {}", self.options.bind_addr))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let pump_task = spawn_completion_pump(
            self.shared.device.clone(),
            self.shared.active.clone(),
            self.shared.verbose.clone(),
        );
        let accept_task = tokio::spawn(accept_loop(listener, self.shared.clone(), shutdown_rx));

        self.shared.set_state(ServerState::Listening);
        info!("USB/IP server listening on {}", local_addr);

        self.shared.device.present_pulse().await;

        *running = Some(Running {
            local_addr,
            shutdown_tx,
            accept_task,
            pump_task,
        });
        Ok(local_addr)
    }

    /// Shut down the listener and any connected client
    ///
    /// Safe to call any number of times.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        info!("Stopping USB/IP server");
        let _ = running.shutdown_tx.send(());
        if let Err(e) = running.accept_task.await {
            error!("Accept loop ended abnormally: {}", e);
        }
        running.pump_task.abort();

        self.shared.device.try_set_present(false);
        self.shared.set_state(ServerState::Stopped);
    }

    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            ServerState::Listening | ServerState::ClientConnected
        )
    }

    /// Whether a client is currently attached
    pub fn has_client(&self) -> bool {
        self.shared.active.is_connected()
    }

    /// Address the listener is bound to, while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub fn verbose(&self) -> bool {
        self.shared.verbose.is_enabled()
    }

    pub fn set_verbose(&self, enabled: bool) {
        self.shared.verbose.set(enabled);
    }

    /// Shared handle to the verbose toggle
    pub fn verbose_flag(&self) -> VerboseFlag {
        self.shared.verbose.clone()
    }
}

impl Drop for UsbIpServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.accept_task.abort();
            running.pump_task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut current: Option<ActiveSession> = None;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Accept loop received shutdown");
                break;
            }
            _ = session_finished(&mut current) => {
                if let Some(session) = current.take() {
                    info!("Client {} disconnected", session.peer);
                    teardown(&shared, session, true).await;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Some(previous) = current.take() {
                        info!("Client {} replaces {}, closing old connection", peer, previous.peer);
                        teardown(&shared, previous, false).await;
                    }
                    current = Some(begin_session(&shared, stream, peer).await);
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
        }
    }

    if let Some(session) = current.take() {
        teardown(&shared, session, false).await;
    }
}

/// Resolves when the current session's task has ended; pending forever without one
async fn session_finished(current: &mut Option<ActiveSession>) {
    match current {
        Some(session) => {
            let _ = (&mut session.task).await;
        }
        None => std::future::pending().await,
    }
}

async fn begin_session(shared: &Arc<Shared>, stream: TcpStream, peer: SocketAddr) -> ActiveSession {
    let id = shared.next_session_id.fetch_add(1, Ordering::Relaxed);
    info!("Client {} connected (session {})", peer, id);

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }
    let (reader, writer) = stream.into_split();
    let writer = ReplyWriter::new(writer);
    let pending = Arc::new(PendingUrbTable::new());

    // The host must see reset-then-enumerate before any request is served
    shared.device.bus_reset_pulse().await;

    shared.active.replace(SessionHandle {
        id,
        peer,
        writer: writer.clone(),
        pending: Arc::downgrade(&pending),
    });
    shared.set_state(ServerState::ClientConnected);

    let (cancel_tx, cancel_rx) = oneshot::channel();
    let mut session = Session::new(
        id,
        peer,
        reader,
        writer.clone(),
        pending.clone(),
        shared.device.clone(),
        shared.verbose.clone(),
    );
    let task = tokio::spawn(async move {
        tokio::select! {
            result = session.run() => {
                if let Err(e) = result {
                    warn!("Session {} with {} failed: {:#}", id, peer, e);
                }
            }
            _ = cancel_rx => {
                debug!("Session {} cancelled", id);
            }
        }
    });

    ActiveSession {
        id,
        peer,
        pending,
        writer,
        cancel_tx,
        task,
    }
}

/// Close a session and forget everything it left pending
///
/// `joined` is set when the session task has already been awaited.
async fn teardown(shared: &Shared, session: ActiveSession, joined: bool) {
    let ActiveSession {
        id,
        peer,
        pending,
        writer,
        cancel_tx,
        task,
    } = session;

    shared.active.clear_if(id);
    // Unblock any reply stuck on a peer that stopped reading
    writer.cancel();
    if !joined {
        let _ = cancel_tx.send(());
        if let Err(e) = task.await {
            error!("Session {} task ended abnormally: {}", id, e);
        }
    }

    let abandoned = pending.clear();
    if abandoned > 0 {
        debug!("Abandoned {} pending IN request(s) from {}", abandoned, peer);
    }
    writer.close().await;
    shared.set_state(ServerState::Listening);
}
