//! In-process sandbox host.
//!
//! [`LocalHost`] plays the role of the host runtime: it attaches a fresh
//! context to the bus and runs a [`SandboxHandler`] on it. At most one
//! sandbox exists per host.

use super::handler::SandboxHandler;
use super::SandboxHost;
use crate::rendering::RenderSurface;
use crate::transport::MessageBus;
use crate::{Error, Result};
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Builds the surface for each new sandbox.
pub type SurfaceFactory = Arc<dyn Fn() -> Box<dyn RenderSurface> + Send + Sync>;

struct RunningSandbox {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct LocalHost {
    bus: MessageBus,
    factory: SurfaceFactory,
    running: Mutex<Option<RunningSandbox>>,
}

impl LocalHost {
    pub fn new<F>(bus: MessageBus, factory: F) -> Self
    where
        F: Fn() -> Box<dyn RenderSurface> + Send + Sync + 'static,
    {
        Self {
            bus,
            factory: Arc::new(factory),
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SandboxHost for LocalHost {
    async fn create_sandbox(&self) -> Result<()> {
        let mut running = self.running.lock();
        if let Some(existing) = running.as_ref() {
            if !existing.task.is_finished() {
                return Err(Error::SandboxCreationFailed(
                    "only a single sandbox may exist".into(),
                ));
            }
        }

        let endpoint = self.bus.attach("sandbox");
        let handler = SandboxHandler::new((self.factory)());
        let (shutdown, rx) = oneshot::channel();
        let task = handler.serve(endpoint, rx);
        *running = Some(RunningSandbox { shutdown, task });
        info!("sandbox context spawned");
        Ok(())
    }

    async fn close_sandbox(&self) -> Result<()> {
        let Some(sandbox) = self.running.lock().take() else {
            debug!("no sandbox to close");
            return Ok(());
        };
        let _ = sandbox.shutdown.send(());
        sandbox
            .task
            .await
            .map_err(|e| Error::SandboxOperationFailed(format!("sandbox task failed: {}", e)))
    }

    async fn has_sandbox(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|s| !s.task.is_finished())
            .unwrap_or(false)
    }
}
