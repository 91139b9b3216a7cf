//! ConnectionManager: one shared duplex channel to the inference service.
//!
//! The manager is the sole owner of the connection state and the only place
//! connect and reconnect decisions are made:
//!
//! ```text
//! Disconnected ──send()──▶ Connecting ──ok──▶ Open
//!      ▲                      │                 │
//!      └────────connect err───┘    close/error ─┘
//! ```
//!
//! Concurrent senders that find the manager `Connecting` await the same
//! in-flight attempt, so N callers produce exactly one connect. Inbound
//! results are routed to whichever handler is subscribed under the result's
//! correlation identifier; results nobody listens for are dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectError, SendError};
use crate::protocol::{Codec, Inbound, InferenceRequest, InferenceResult};
use crate::transport::{Duplex, OutboundFrame, Transport, TransportEvent};

/// Callback invoked with the result for one correlation identifier.
pub type ResultHandler = Box<dyn FnOnce(InferenceResult) + Send + Sync>;

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

type PendingConnect = Shared<BoxFuture<'static, Result<Arc<Link>, ConnectError>>>;

enum LinkState {
    Disconnected,
    Connecting(PendingConnect),
    Open(Arc<Link>),
    Closing,
}

/// One physical connection.
struct Link {
    generation: u64,
    outbound: mpsc::Sender<OutboundFrame>,
    reader: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

struct Inner {
    endpoint: String,
    transport: Arc<dyn Transport>,
    max_send_attempts: u32,
    state: Mutex<LinkState>,
    subscribers: DashMap<String, ResultHandler>,
    generation: AtomicU64,
    connect_attempts: AtomicU64,
    closed: AtomicBool,
}

/// Shared handle to the inference connection.
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .field("subscribers", &self.inner.subscribers.len())
            .field("connect_attempts", &self.connect_attempts())
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager. No connection is opened until the first `send`.
    pub fn new(
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        max_send_attempts: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.into(),
                transport,
                max_send_attempts: max_send_attempts.max(1),
                state: Mutex::new(LinkState::Disconnected),
                subscribers: DashMap::new(),
                generation: AtomicU64::new(0),
                connect_attempts: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.inner.lock_state() {
            LinkState::Disconnected => ConnectionState::Disconnected,
            LinkState::Connecting(_) => ConnectionState::Connecting,
            LinkState::Open(_) => ConnectionState::Open,
            LinkState::Closing => ConnectionState::Closing,
        }
    }

    /// Number of connect attempts started since creation.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Route the result for `correlation_id` to `handler`.
    ///
    /// Replaces any handler already registered under the same identifier.
    pub fn subscribe(&self, correlation_id: impl Into<String>, handler: ResultHandler) {
        self.inner.subscribers.insert(correlation_id.into(), handler);
    }

    /// Stop listening for `correlation_id`. Returns whether a handler was removed.
    pub fn unsubscribe(&self, correlation_id: &str) -> bool {
        self.inner.subscribers.remove(correlation_id).is_some()
    }

    /// Transmit a request, connecting first if needed.
    ///
    /// Suspends while a connection is being established, then until the
    /// transport confirms the frame reached the wire. If the link closes
    /// before that (including while the frame is still buffered), the
    /// manager reconnects and retransmits, up to the configured attempt limit.
    pub async fn send(&self, request: &InferenceRequest) -> Result<(), SendError> {
        let frame = Codec::encode_request(request)?;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let link = Inner::ensure_open(&self.inner).await?;
            let generation = link.generation;

            let (outbound, ack) = OutboundFrame::new(frame.clone());
            let queued = link.outbound.send(outbound).await.is_ok();
            // Only the manager's state may keep the link alive while we wait.
            drop(link);

            let failure = if !queued {
                "connection closed before transmission".to_string()
            } else {
                match ack.await {
                    Ok(Ok(())) => {
                        trace!(
                            request_id = %request.request_id,
                            generation,
                            bytes = frame.len(),
                            "Request transmitted"
                        );
                        return Ok(());
                    }
                    Ok(Err(reason)) => reason,
                    Err(_) => "connection lost with request still buffered".to_string(),
                }
            };

            warn!(
                request_id = %request.request_id,
                generation,
                attempt = attempts,
                reason = %failure,
                "Request not transmitted"
            );
            self.inner.link_lost(generation);
            if attempts >= self.inner.max_send_attempts {
                return Err(SendError::ConnectionLost { attempts });
            }
        }
    }

    /// Close the connection and refuse further sends.
    ///
    /// Pending subscriptions are discarded.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let previous = {
            let mut state = self.inner.lock_state();
            std::mem::replace(&mut *state, LinkState::Closing)
        };
        // Dropping the link drops the outbound sender, which closes the socket.
        drop(previous);
        self.inner.subscribers.clear();
        *self.inner.lock_state() = LinkState::Disconnected;
        info!(endpoint = %self.inner.endpoint, "Inference connection closed");
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the open link, joining or starting a connect attempt as needed.
    async fn ensure_open(this: &Arc<Self>) -> Result<Arc<Link>, ConnectError> {
        let pending = {
            let mut state = this.lock_state();
            if this.closed.load(Ordering::SeqCst) {
                return Err(ConnectError::ManagerClosed);
            }
            match &*state {
                LinkState::Open(link) if !link.outbound.is_closed() => return Ok(link.clone()),
                LinkState::Connecting(pending) => pending.clone(),
                _ => {
                    let pending = Self::start_connect(this);
                    *state = LinkState::Connecting(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Spawn exactly one connect attempt and share its outcome.
    fn start_connect(this: &Arc<Self>) -> PendingConnect {
        let attempt = this.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(endpoint = %this.endpoint, attempt, generation, "Connecting to inference service");

        let connect = this.transport.connect(&this.endpoint);
        let weak = Arc::downgrade(this);
        let task = tokio::spawn(async move {
            let outcome = connect.await;
            match weak.upgrade() {
                Some(inner) => inner.finish_connect(generation, outcome),
                None => Err(ConnectError::ManagerClosed),
            }
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(ConnectError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }

    fn finish_connect(
        self: Arc<Self>,
        generation: u64,
        outcome: Result<Duplex, ConnectError>,
    ) -> Result<Arc<Link>, ConnectError> {
        let mut state = self.lock_state();

        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectError::ManagerClosed);
        }

        match outcome {
            Ok(Duplex { outbound, inbound }) => {
                let reader = tokio::spawn(read_loop(Arc::downgrade(&self), generation, inbound));
                let link = Arc::new(Link {
                    generation,
                    outbound,
                    reader,
                });
                *state = LinkState::Open(link.clone());
                info!(endpoint = %self.endpoint, generation, "Inference connection open");
                Ok(link)
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, generation, error = %e, "Connect attempt failed");
                *state = LinkState::Disconnected;
                Err(e)
            }
        }
    }

    /// Forget the link of `generation` if it is still the current one.
    fn link_lost(&self, generation: u64) {
        let mut state = self.lock_state();
        if let LinkState::Open(link) = &*state {
            if link.generation == generation {
                debug!(generation, "Link marked disconnected");
                *state = LinkState::Disconnected;
            }
        }
    }

    fn dispatch_frame(&self, bytes: &[u8]) {
        match Codec::decode_inbound(bytes) {
            Ok(Inbound::Result(result)) => self.dispatch(result),
            Ok(Inbound::ServiceError {
                request_id: Some(request_id),
                message,
            }) => {
                warn!(
                    request_id = %request_id,
                    error = %message,
                    "Inference service rejected request"
                );
                self.dispatch(InferenceResult::failed(request_id, message));
            }
            Ok(Inbound::ServiceError {
                request_id: None,
                message,
            }) => {
                warn!(error = %message, "Inference service reported an error");
            }
            Err(e) => {
                warn!(error = %e, bytes = bytes.len(), "Dropping malformed inbound message");
            }
        }
    }

    fn dispatch(&self, result: InferenceResult) {
        match self.subscribers.remove(&result.request_id) {
            Some((_, handler)) => handler(result),
            None => {
                debug!(
                    request_id = %result.request_id,
                    "No subscriber for result, dropping"
                );
            }
        }
    }
}

/// Pump inbound events for one link until it closes.
async fn read_loop(
    inner: Weak<Inner>,
    generation: u64,
    mut inbound: mpsc::Receiver<TransportEvent>,
) {
    while let Some(event) = inbound.recv().await {
        let Some(manager) = inner.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Frame(bytes) => manager.dispatch_frame(&bytes),
            TransportEvent::Closed => {
                info!(generation, "Inference connection closed by remote");
                break;
            }
            TransportEvent::Error(e) => {
                warn!(generation, error = %e, "Inference connection failed");
                break;
            }
        }
    }

    if let Some(manager) = inner.upgrade() {
        manager.link_lost(generation);
    }
}
