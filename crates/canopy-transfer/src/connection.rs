//! Connection manager: one owned session with reconnect-and-backoff
//!
//! The manager owns the single active channel to the graph peer. Inbound
//! messages are decoded into [`Frame`]s and broadcast to subscribers;
//! malformed ones are logged and dropped. Any failure (connect error, peer
//! close, I/O error) schedules a reconnect after an exponential delay:
//!
//! ```text
//! delay = min(cap, base * 2^attempt)
//! ```
//!
//! `attempt` counts failures since the last successful connect and is read
//! before it is incremented, so the first retry after a good connection
//! waits `base`.
//!
//! The loop runs until [`ConnectionManager::dispose`]. Every suspension point
//! (connect, receive, backoff sleep) races the shutdown signal, so disposal
//! never waits out a pending delay.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use canopy_protocol::Frame;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, TransferError};
use crate::transport::{Channel, Transport};

/// Frames buffered per subscriber before it starts lagging.
pub const FRAME_BUFFER: usize = 1024;

/// Reconnect timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after the first failure
    pub base: Duration,
    /// Upper bound on any delay
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay scheduled after `attempt` earlier failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap)
    }
}

/// Failure counter driving [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Record a failure and return the delay before the next try.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Forget earlier failures after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Link state as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

/// Why a connected session ended.
enum SessionEnd {
    Shutdown,
    Lost(String),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the handle and its background loop.
struct Inner {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    status: watch::Sender<ConnectionStatus>,
    shutdown: watch::Sender<bool>,
    frames: Mutex<Option<broadcast::Sender<Frame>>>,
    outbound: mpsc::UnboundedSender<String>,
    disposed: AtomicBool,
    discarded: AtomicU64,
}

impl Inner {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    fn publish(&self, text: &str) {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, len = text.len(), "Discarding frame");
                return;
            }
        };
        if let Some(tx) = lock(&self.frames).as_ref() {
            // No subscribers is fine; the frame is simply not observed.
            let _ = tx.send(frame);
        }
    }

    fn close_output(&self) -> bool {
        lock(&self.frames).take().is_some()
    }
}

/// Owned, reconnecting session with the graph peer.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (shutdown, _) = watch::channel(false);
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                transport,
                policy,
                status,
                shutdown,
                frames: Mutex::new(Some(frames)),
                outbound,
                disposed: AtomicBool::new(false),
                discarded: AtomicU64::new(0),
            }),
            outbound_rx: Mutex::new(Some(outbound_rx)),
            task: Mutex::new(None),
        }
    }

    /// Start the connect loop for `address`.
    ///
    /// A no-op while a loop is already running. Fails only after disposal.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, address: impl Into<String>) -> Result<()> {
        if self.is_disposed() {
            return Err(TransferError::Disposed);
        }
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("connect ignored, session already active");
            return Ok(());
        }
        let Some(outbound_rx) = lock(&self.outbound_rx).take() else {
            return Err(TransferError::Closed);
        };

        let address = address.into();
        info!(%address, "Starting connection loop");
        *task = Some(tokio::spawn(run(self.inner.clone(), address, outbound_rx)));
        Ok(())
    }

    /// Subscribe to decoded inbound frames.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Frame>> {
        lock(&self.inner.frames)
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(TransferError::Disposed)
    }

    /// Watch the link state.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status.borrow().is_connected()
    }

    /// Queue a message for the peer.
    ///
    /// Delivered on the current connection. Anything still queued when a new
    /// connection opens is dropped.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        if self.is_disposed() {
            return Err(TransferError::Disposed);
        }
        self.inner
            .outbound
            .send(text.into())
            .map_err(|_| TransferError::Closed)
    }

    /// Inbound frames dropped because they failed to decode.
    pub fn discarded(&self) -> u64 {
        self.inner.discarded.load(Ordering::Relaxed)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Stop the loop, close the channel and close the frame output.
    ///
    /// Idempotent; only the first call does anything.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);

        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Connection loop ended abnormally");
            }
        }
        self.inner.close_output();
        self.inner.set_status(ConnectionStatus::Disconnected);
        info!("Connection manager disposed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // The loop holds its own Arc; signal it so the task (and with it the
        // output) winds down even without an explicit dispose.
        if !self.inner.disposed.swap(true, Ordering::SeqCst) {
            self.inner.shutdown.send_replace(true);
            self.inner.close_output();
        }
    }
}

async fn run(inner: Arc<Inner>, address: String, mut outbound: mpsc::UnboundedReceiver<String>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut backoff = Backoff::new(inner.policy);

    loop {
        inner.set_status(ConnectionStatus::Connecting);
        let connected = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            res = inner.transport.connect(&address) => res,
        };

        match connected {
            Ok(mut channel) => {
                backoff.reset();
                inner.set_status(ConnectionStatus::Connected);
                info!(%address, "Connected");

                let mut stale = 0usize;
                while outbound.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    debug!(stale, "Dropped messages queued for a previous session");
                }

                let end = pump(&inner, channel.as_mut(), &mut outbound, &mut shutdown).await;
                if let Err(e) = channel.close().await {
                    debug!(error = %e, "Close failed");
                }
                inner.set_status(ConnectionStatus::Disconnected);
                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(reason) => warn!(%address, %reason, "Connection lost"),
                }
            }
            Err(e) => {
                inner.set_status(ConnectionStatus::Disconnected);
                warn!(%address, error = %e, attempt = backoff.attempt(), "Connect failed");
            }
        }

        let delay = backoff.next_delay();
        info!(
            %address,
            attempt = backoff.attempt(),
            delay_secs = delay.as_secs_f64(),
            "Reconnecting after delay"
        );
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    inner.set_status(ConnectionStatus::Disconnected);
    debug!(%address, "Connection loop stopped");
}

/// Resolves once shutdown has been requested.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // An error means the sender is gone, which is also a stop.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn pump(
    inner: &Inner,
    channel: &mut dyn Channel,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    loop {
        tokio::select! {
            _ = stopped(shutdown) => return SessionEnd::Shutdown,
            msg = channel.recv() => match msg {
                Ok(Some(text)) => inner.publish(&text),
                Ok(None) => return SessionEnd::Lost("closed by peer".into()),
                Err(e) => return SessionEnd::Lost(e.to_string()),
            },
            Some(text) = outbound.recv() => {
                if let Err(e) = channel.send(&text).await {
                    return SessionEnd::Lost(e.to_string());
                }
            }
        }
    }
}
