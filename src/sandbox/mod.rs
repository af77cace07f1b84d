//! Lifecycle of the single off-screen rendering sandbox.
//!
//! [`SandboxManager`] is the only owner of [`SandboxState`]. It is constructed
//! once per process and handed out by clone; every clone drives the same
//! sandbox.

pub mod handler;
pub mod host;

use crate::message::{Command, Message, SANDBOX_READY};
use crate::transport::Endpoint;
use crate::{Error, HarvestConfig, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

const CAPTURE_UNAVAILABLE_PREFIX: &str = "Capture unavailable: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Absent,
    Creating,
    Ready,
    TearingDown,
}

/// The host runtime that can create and destroy sandbox contexts.
#[async_trait]
pub trait SandboxHost: Send + Sync {
    /// Create the sandbox. It announces itself on the bus with a
    /// `SANDBOX_READY` notification once it is listening.
    async fn create_sandbox(&self) -> Result<()>;

    /// Destroy the sandbox.
    async fn close_sandbox(&self) -> Result<()>;

    /// Whether a sandbox context currently exists.
    async fn has_sandbox(&self) -> bool;
}

type Creation = Shared<BoxFuture<'static, Result<()>>>;

struct Lifecycle {
    state: SandboxState,
    creating: Option<Creation>,
}

struct ManagerInner {
    endpoint: Endpoint,
    host: Arc<dyn SandboxHost>,
    request_timeout: Duration,
    ready_timeout: Duration,
    cleanup_timeout: Duration,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<SandboxState>,
    creations: AtomicUsize,
}

/// Process-scoped handle on the rendering sandbox.
#[derive(Clone)]
pub struct SandboxManager {
    inner: Arc<ManagerInner>,
}

impl SandboxManager {
    /// `endpoint` is the coordinator's attachment to the bus the sandbox
    /// will join.
    pub fn new(endpoint: Endpoint, host: Arc<dyn SandboxHost>, config: &HarvestConfig) -> Self {
        let (state_tx, _) = watch::channel(SandboxState::Absent);
        Self {
            inner: Arc::new(ManagerInner {
                endpoint,
                host,
                request_timeout: config.request_timeout(),
                ready_timeout: config.ready_timeout(),
                cleanup_timeout: config.cleanup_timeout(),
                lifecycle: Mutex::new(Lifecycle {
                    state: SandboxState::Absent,
                    creating: None,
                }),
                state_tx,
                creations: AtomicUsize::new(0),
            }),
        }
    }

    pub fn state(&self) -> SandboxState {
        self.inner.lifecycle.lock().state
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SandboxState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of sandbox creations issued to the host so far.
    pub fn creation_count(&self) -> usize {
        self.inner.creations.load(Ordering::SeqCst)
    }

    fn set_state(&self, lifecycle: &mut Lifecycle, state: SandboxState) {
        if lifecycle.state != state {
            debug!("sandbox {:?} -> {:?}", lifecycle.state, state);
        }
        lifecycle.state = state;
        self.inner.state_tx.send_replace(state);
    }

    /// Make sure the sandbox exists and is listening.
    ///
    /// Concurrent callers share one creation attempt and all observe its
    /// outcome. On failure the state returns to `Absent` so a later call can
    /// retry.
    pub async fn ensure_ready(&self) -> Result<()> {
        loop {
            let (creation, observed) = {
                let mut lifecycle = self.inner.lifecycle.lock();
                match lifecycle.state {
                    SandboxState::Ready => return Ok(()),
                    SandboxState::Absent => {
                        let creation = self.spawn_creation();
                        lifecycle.creating = Some(creation.clone());
                        self.set_state(&mut lifecycle, SandboxState::Creating);
                        (Some(creation), SandboxState::Creating)
                    }
                    state => (lifecycle.creating.clone(), state),
                }
            };

            match creation {
                Some(creation) => return creation.await,
                None => {
                    // Teardown in progress: wait for it to settle, then re-check.
                    let mut rx = self.watch_state();
                    if rx.wait_for(|s| *s != observed).await.is_err() {
                        return Err(Error::Other("sandbox state channel closed".into()));
                    }
                }
            }
        }
    }

    /// Start creation on its own task so it runs to completion even if
    /// every caller stops waiting.
    fn spawn_creation(&self) -> Creation {
        let task = tokio::spawn(self.clone().create());
        let manager = self.clone();
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let mut lifecycle = manager.inner.lifecycle.lock();
                    lifecycle.creating = None;
                    manager.set_state(&mut lifecycle, SandboxState::Absent);
                    Err(Error::SandboxCreationFailed(format!(
                        "creation task aborted: {}",
                        e
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Wait until no creation is in flight.
    pub async fn settled(&self) {
        let mut rx = self.watch_state();
        let _ = rx.wait_for(|s| *s != SandboxState::Creating).await;
    }

    async fn create(self) -> Result<()> {
        let result = self.create_sandbox().await;
        let mut lifecycle = self.inner.lifecycle.lock();
        lifecycle.creating = None;
        match &result {
            Ok(()) => {
                self.set_state(&mut lifecycle, SandboxState::Ready);
                info!("sandbox ready");
            }
            Err(e) => {
                self.set_state(&mut lifecycle, SandboxState::Absent);
                warn!("sandbox creation failed: {}", e);
            }
        }
        result
    }

    async fn create_sandbox(&self) -> Result<()> {
        if self.inner.host.has_sandbox().await {
            info!("adopting existing sandbox");
            return Ok(());
        }

        // Subscribe before creating so the announcement cannot be missed.
        let ready = Arc::new(Notify::new());
        let signal = ready.clone();
        let _subscription = self.inner.endpoint.subscribe(move |inbound| {
            if inbound.message.kind == SANDBOX_READY {
                signal.notify_one();
            }
        });

        self.inner.creations.fetch_add(1, Ordering::SeqCst);
        self.inner.host.create_sandbox().await.map_err(|e| match e {
            Error::SandboxCreationFailed(_) => e,
            other => Error::SandboxCreationFailed(other.to_string()),
        })?;

        match tokio::time::timeout(self.inner.ready_timeout, ready.notified()).await {
            Ok(()) => debug!("sandbox announced readiness"),
            Err(_) => warn!(
                "no readiness signal from sandbox within {}ms; continuing",
                self.inner.ready_timeout.as_millis()
            ),
        }
        Ok(())
    }

    /// Send `command` to the sandbox and return the response `data`.
    pub async fn dispatch(&self, command: Command) -> Result<Option<Value>> {
        self.ensure_ready().await?;
        let message = command.to_message()?;
        self.send(message, self.inner.request_timeout).await
    }

    async fn send(&self, message: Message, timeout: Duration) -> Result<Option<Value>> {
        let kind = message.kind.clone();
        let response = self.inner.endpoint.request(message, timeout).await?;
        if response.success {
            return Ok(response.data);
        }
        let reason = response
            .error
            .or(response.message)
            .unwrap_or_else(|| format!("{} failed", kind));
        Err(match reason.strip_prefix(CAPTURE_UNAVAILABLE_PREFIX) {
            Some(detail) => Error::CaptureUnavailable(detail.to_string()),
            None => Error::SandboxOperationFailed(reason),
        })
    }

    /// Tear the sandbox down. No-op unless it is `Ready`; never fails.
    pub async fn teardown(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state != SandboxState::Ready {
                debug!("teardown skipped in state {:?}", lifecycle.state);
                return;
            }
            self.set_state(&mut lifecycle, SandboxState::TearingDown);
        }
        let _reset = ResetToAbsent(self);

        match Command::Cleanup.to_message() {
            Ok(message) => {
                if let Err(e) = self.send(message, self.inner.cleanup_timeout).await {
                    warn!("sandbox cleanup command failed: {}", e);
                }
            }
            Err(e) => warn!("could not encode cleanup command: {}", e),
        }

        if let Err(e) = self.inner.host.close_sandbox().await {
            warn!("failed to close sandbox: {}", e);
        }
        info!("sandbox torn down");
    }
}

/// Ends a teardown in `Absent` however it exits.
struct ResetToAbsent<'a>(&'a SandboxManager);

impl Drop for ResetToAbsent<'_> {
    fn drop(&mut self) {
        let mut lifecycle = self.0.inner.lifecycle.lock();
        self.0.set_state(&mut lifecycle, SandboxState::Absent);
    }
}
