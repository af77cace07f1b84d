//! Capture pipeline.
//!
//! A session acquires the sandbox, loads and captures each content item in
//! order, assembles the frames and persists the result. Only one session may
//! run at a time, and every session ends with the sandbox torn down and the
//! status back at [`SessionStatus::Idle`], whether it succeeded, failed or was
//! dropped mid-way.

use crate::assembly::Assembler;
use crate::content::{ContentSpec, RawImage};
use crate::message::Command;
use crate::persist::Persister;
use crate::sandbox::SandboxManager;
use crate::{Error, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
    Cleaning,
}

/// Working state of one capture invocation.
#[derive(Debug)]
pub struct CaptureSession {
    specs: Vec<ContentSpec>,
    frames: Vec<RawImage>,
    output_name: String,
}

impl CaptureSession {
    fn new(specs: Vec<ContentSpec>, output_name: &str) -> Self {
        Self {
            specs,
            frames: Vec::new(),
            output_name: output_name.to_string(),
        }
    }
}

pub struct CaptureOrchestrator {
    manager: SandboxManager,
    assembler: Arc<dyn Assembler>,
    persister: Arc<dyn Persister>,
    status: Arc<Mutex<SessionStatus>>,
}

impl CaptureOrchestrator {
    pub fn new(
        manager: SandboxManager,
        assembler: Arc<dyn Assembler>,
        persister: Arc<dyn Persister>,
    ) -> Self {
        Self {
            manager,
            assembler,
            persister,
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    pub fn manager(&self) -> &SandboxManager {
        &self.manager
    }

    /// Capture one content item into `output_name`.
    pub async fn capture(&self, spec: ContentSpec, output_name: &str) -> Result<()> {
        self.capture_all(vec![spec], output_name).await
    }

    /// Capture every item in order, one page each, into `output_name`.
    ///
    /// Fails with [`Error::AlreadyRunning`] without side effects if another
    /// session is active. Any other failure is returned as produced; cleanup
    /// runs regardless and never changes the outcome.
    pub async fn capture_all(&self, specs: Vec<ContentSpec>, output_name: &str) -> Result<()> {
        let mut guard = self.begin()?;
        info!(
            "capture session started: {} item(s) -> {}",
            specs.len(),
            output_name
        );

        let mut session = CaptureSession::new(specs, output_name);
        let outcome = self.run(&mut session).await;
        match &outcome {
            Ok(()) => info!("capture session saved {}", session.output_name),
            Err(e) => warn!("capture session failed: {}", e),
        }

        self.set_status(SessionStatus::Cleaning);
        self.manager.teardown().await;
        drop(session);
        guard.disarm();
        self.set_status(SessionStatus::Idle);
        debug!("capture session cleaned up");

        outcome
    }

    fn begin(&self) -> Result<SessionGuard> {
        let mut status = self.status.lock();
        if *status != SessionStatus::Idle {
            return Err(Error::AlreadyRunning);
        }
        *status = SessionStatus::Running;
        Ok(SessionGuard {
            status: self.status.clone(),
            manager: self.manager.clone(),
            armed: true,
        })
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.lock() = status;
    }

    async fn run(&self, session: &mut CaptureSession) -> Result<()> {
        self.manager.ensure_ready().await?;

        for (index, spec) in session.specs.iter().enumerate() {
            self.manager
                .dispatch(Command::LoadContent(spec.clone()))
                .await?;
            let data = self.manager.dispatch(Command::CaptureFrame).await?;
            let frame = decode_frame(data)?;
            debug!(
                "frame {} captured ({} bytes, sha256 {})",
                index + 1,
                frame.data.len(),
                frame.fingerprint()
            );
            session.frames.push(frame);
        }

        if session.frames.is_empty() {
            return Err(Error::NoFramesCaptured);
        }

        let frames = std::mem::take(&mut session.frames);
        let document = self.assembler.assemble(frames).await?;
        self.persister.save(document, &session.output_name).await
    }
}

fn decode_frame(data: Option<Value>) -> Result<RawImage> {
    let url = data
        .as_ref()
        .and_then(Value::as_str)
        .ok_or_else(|| Error::SandboxOperationFailed("capture returned no image data".into()))?;
    RawImage::from_data_url(url).map_err(|e| Error::SandboxOperationFailed(e.to_string()))
}

/// Restores the session guard if a capture future is dropped before it
/// finished cleaning up.
struct SessionGuard {
    status: Arc<Mutex<SessionStatus>>,
    manager: SandboxManager,
    armed: bool,
}

impl SessionGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("capture session dropped before cleanup; scheduling teardown");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                *self.status.lock() = SessionStatus::Cleaning;
                let status = self.status.clone();
                let manager = self.manager.clone();
                handle.spawn(async move {
                    // a creation left behind keeps running; tear down what it produced
                    manager.settled().await;
                    manager.teardown().await;
                    *status.lock() = SessionStatus::Idle;
                });
            }
            Err(_) => *self.status.lock() = SessionStatus::Idle,
        }
    }
}
