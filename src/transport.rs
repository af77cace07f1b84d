//! In-process message bus connecting isolated contexts.
//!
//! Every context (coordinator, sandbox, page agent) attaches to a
//! [`MessageBus`] and gets its own [`Endpoint`]. Contexts share nothing but the
//! bus: each endpoint has a private inbound queue drained by its own pump task,
//! so a handler never runs on the sender's stack.
//!
//! # Message flow
//!
//! 1. `request()` allocates a correlation id and parks a oneshot sender in the
//!    endpoint's pending map
//! 2. The request frame is queued to every other attached context
//! 3. A subscriber on the receiving side answers through its [`Responder`]
//! 4. The requester's pump task matches the response id and completes the
//!    oneshot; responses with no pending entry are dropped
//!
//! Requests that are never answered resolve to [`Error::Timeout`] and their
//! pending entry is removed, so a late reply cannot resolve a later request.

use crate::message::{Message, Response};
use crate::{Error, Result};
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Identifier of an attached context.
pub type ContextId = u64;

type Handler = Arc<dyn Fn(&Inbound) + Send + Sync>;

enum Frame {
    Notify {
        message: Message,
    },
    Request {
        from: ContextId,
        id: u64,
        message: Message,
    },
    Response {
        id: u64,
        response: Response,
    },
}

struct ContextEntry {
    label: String,
    tx: mpsc::UnboundedSender<Frame>,
}

#[derive(Default)]
struct BusInner {
    next_context: ContextId,
    contexts: HashMap<ContextId, ContextEntry>,
}

/// The host's runtime messaging substrate.
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<Mutex<BusInner>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new context and spawn its inbound pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(&self, label: &str) -> Endpoint {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.inner.lock();
            inner.next_context += 1;
            let id = inner.next_context;
            inner.contexts.insert(
                id,
                ContextEntry {
                    label: label.to_string(),
                    tx,
                },
            );
            id
        };
        debug!("context '{}' attached as #{}", label, id);

        let shared = Arc::new(EndpointShared {
            id,
            label: label.to_string(),
            bus: self.clone(),
            next_request: AtomicU64::new(1),
            next_subscriber: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(pump(Arc::downgrade(&shared), rx));
        Endpoint { shared }
    }

    /// Number of contexts currently attached.
    pub fn context_count(&self) -> usize {
        self.inner.lock().contexts.len()
    }

    /// Labels of attached contexts, in attach order.
    pub fn labels(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner.contexts.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        entries.into_iter().map(|(_, e)| e.label.clone()).collect()
    }

    fn peers(&self, except: ContextId) -> Vec<mpsc::UnboundedSender<Frame>> {
        self.inner
            .lock()
            .contexts
            .iter()
            .filter(|(id, _)| **id != except)
            .map(|(_, e)| e.tx.clone())
            .collect()
    }

    fn sender_for(&self, id: ContextId) -> Option<mpsc::UnboundedSender<Frame>> {
        self.inner.lock().contexts.get(&id).map(|e| e.tx.clone())
    }

    fn detach(&self, id: ContextId) {
        if let Some(entry) = self.inner.lock().contexts.remove(&id) {
            debug!("context '{}' (#{}) detached", entry.label, id);
        }
    }
}

/// A message delivered to a subscriber.
#[derive(Clone)]
pub struct Inbound {
    pub message: Message,
    /// Present when the sender awaits a response.
    pub responder: Option<Responder>,
}

/// Answers one inbound request. Clones share the answered flag, so the
/// requester sees at most one response no matter how many subscribers reply.
#[derive(Clone)]
pub struct Responder {
    id: u64,
    target: Option<mpsc::UnboundedSender<Frame>>,
    answered: Arc<AtomicBool>,
}

impl Responder {
    /// Send the response. Returns `false` if a response was already sent or
    /// the requester is gone.
    pub fn send(&self, response: Response) -> bool {
        if self.answered.swap(true, Ordering::SeqCst) {
            return false;
        }
        match &self.target {
            Some(tx) => tx
                .send(Frame::Response {
                    id: self.id,
                    response,
                })
                .is_ok(),
            None => {
                debug!("requester for #{} detached before the reply", self.id);
                false
            }
        }
    }
}

struct EndpointShared {
    id: ContextId,
    label: String,
    bus: MessageBus,
    next_request: AtomicU64,
    next_subscriber: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Response>>>,
    subscribers: Mutex<Vec<(u64, Handler)>>,
    closed: AtomicBool,
}

impl EndpointShared {
    fn deliver(&self, frame: Frame) {
        let inbound = match frame {
            Frame::Response { id, response } => {
                match self.pending.lock().remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!("'{}' dropped stale response #{}", self.label, id),
                }
                return;
            }
            Frame::Notify { message } => Inbound {
                message,
                responder: None,
            },
            Frame::Request { from, id, message } => Inbound {
                message,
                responder: Some(Responder {
                    id,
                    target: self.bus.sender_for(from),
                    answered: Arc::new(AtomicBool::new(false)),
                }),
            },
        };

        let handlers: Vec<Handler> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        if handlers.is_empty() {
            debug!(
                "'{}' has no subscribers for {}",
                self.label, inbound.message.kind
            );
        }
        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(&inbound))).is_err() {
                error!(
                    "subscriber on '{}' panicked handling {}",
                    self.label, inbound.message.kind
                );
            }
        }
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bus.detach(self.id);
        // Dropping the senders fails every outstanding request.
        self.pending.lock().clear();
        self.subscribers.lock().clear();
    }
}

impl Drop for EndpointShared {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn pump(shared: Weak<EndpointShared>, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        shared.deliver(frame);
    }
}

/// A context's handle on the bus. Clones share one attachment; the context is
/// detached by [`Endpoint::close`] or when the last clone is dropped.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<EndpointShared>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.shared.id)
            .field("label", &self.shared.label)
            .finish()
    }
}

impl Endpoint {
    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Outstanding requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Fire-and-forget broadcast to every other context. Never fails; a
    /// missing receiver is logged.
    pub fn notify(&self, message: Message) {
        if self.is_closed() {
            warn!("'{}' is closed; dropping {}", self.label(), message.kind);
            return;
        }
        let peers = self.shared.bus.peers(self.id());
        if peers.is_empty() {
            warn!("no receiving context for notification {}", message.kind);
            return;
        }
        for peer in peers {
            if peer
                .send(Frame::Notify {
                    message: message.clone(),
                })
                .is_err()
            {
                warn!("failed to deliver notification {}", message.kind);
            }
        }
    }

    /// Send `message` and wait for the first correlated response.
    pub async fn request(&self, message: Message, timeout: Duration) -> Result<Response> {
        if self.is_closed() {
            return Err(Error::TransportUnavailable(format!(
                "endpoint '{}' is closed",
                self.label()
            )));
        }
        let peers = self.shared.bus.peers(self.id());
        if peers.is_empty() {
            return Err(Error::TransportUnavailable(format!(
                "no receiving context for {}",
                message.kind
            )));
        }

        let id = self.shared.next_request.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        let mut delivered = false;
        for peer in peers {
            delivered |= peer
                .send(Frame::Request {
                    from: self.id(),
                    id,
                    message: message.clone(),
                })
                .is_ok();
        }
        if !delivered {
            return Err(Error::TransportUnavailable(format!(
                "no receiving context for {}",
                message.kind
            )));
        }
        debug!("'{}' sent {} as request #{}", self.label(), message.kind, id);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::TransportUnavailable(format!(
                "channel closed before {} was answered",
                message.kind
            ))),
            Err(_) => Err(Error::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Register a handler invoked once per inbound notification or request.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Inbound) + Send + Sync + 'static,
    {
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.shared
            .subscribers
            .lock()
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
            active: AtomicBool::new(true),
        }
    }

    /// Detach from the bus. Outstanding requests fail with
    /// [`Error::TransportUnavailable`]. Idempotent.
    pub fn close(&self) {
        self.shared.shutdown();
    }
}

/// Removes a pending entry when its request resolves, times out or is
/// cancelled.
struct PendingGuard<'a> {
    shared: &'a EndpointShared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.id);
    }
}

/// Handle returned by [`Endpoint::subscribe`]. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    shared: Weak<EndpointShared>,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the handler. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.subscribers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
