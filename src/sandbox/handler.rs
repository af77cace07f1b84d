//! Command handler running inside the sandbox context.
//!
//! The handler owns the rendering surface and answers every inbound request
//! with a [`Response`]. Requests are queued and handled one at a time, so a
//! capture never observes a half-loaded surface.

use crate::content::ContentSpec;
use crate::message::{Command, Message, Response, SANDBOX_READY};
use crate::rendering::RenderSurface;
use crate::transport::{Endpoint, Responder, Subscription};
use crate::{Error, Result};
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Idle,
    Loading,
    Capturing,
}

pub struct SandboxHandler {
    surface: Box<dyn RenderSurface>,
    state: HandlerState,
    loaded: bool,
}

impl SandboxHandler {
    pub fn new(surface: Box<dyn RenderSurface>) -> Self {
        Self {
            surface,
            state: HandlerState::Idle,
            loaded: false,
        }
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Whether the last load succeeded and has not been cleaned up since.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Decode and handle a wire message. Never fails: decoding errors and
    /// panics inside the surface become failure responses.
    pub async fn handle_message(&mut self, message: &Message) -> Response {
        let command = match Command::from_message(message) {
            Ok(command) => command,
            Err(e) => {
                warn!("rejecting {}: {}", message.kind, e);
                return Response::failure(e.to_string());
            }
        };

        let kind = command.kind();
        match AssertUnwindSafe(self.handle(command)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                self.state = HandlerState::Idle;
                self.loaded = false;
                let reason = panic_reason(&*panic);
                error!("sandbox panicked while handling {}: {}", kind, reason);
                Response::failure(format!("{} failed: {}", kind, reason))
            }
        }
    }

    pub async fn handle(&mut self, command: Command) -> Response {
        match command {
            Command::LoadContent(spec) => {
                self.state = HandlerState::Loading;
                self.loaded = false;
                let result = self.load(&spec).await;
                self.state = HandlerState::Idle;
                match result {
                    Ok(()) => {
                        self.loaded = true;
                        Response::ok_with_message("Content loaded successfully")
                    }
                    Err(e) => {
                        warn!("content load failed: {}", e);
                        Response::failure(e.to_string())
                    }
                }
            }
            Command::CaptureFrame => {
                if !self.loaded {
                    return Response::failure("No content loaded");
                }
                self.state = HandlerState::Capturing;
                let result = self.surface.capture().await;
                self.state = HandlerState::Idle;
                match result {
                    Ok(frame) => {
                        debug!("captured {} ({} bytes)", frame.mime, frame.data.len());
                        Response::ok_with_data(json!(frame.to_data_url()))
                    }
                    Err(e) => {
                        warn!("capture failed: {}", e);
                        Response::failure(e.to_string())
                    }
                }
            }
            Command::Cleanup => {
                self.surface.clear().await;
                self.loaded = false;
                Response::ok_with_message("Cleanup completed")
            }
        }
    }

    async fn load(&mut self, spec: &ContentSpec) -> Result<()> {
        self.surface.clear().await;
        if let Some(markup) = spec.inline_markup() {
            self.surface.inject_markup(markup).await?;
        } else if let Some(url) = spec.source_url() {
            self.surface.navigate(url).await?;
        } else {
            return Err(Error::InvalidContent("No content source provided".into()));
        }
        if spec.render_wait_ms() > 0 {
            tokio::time::sleep(Duration::from_millis(spec.render_wait_ms())).await;
        }
        Ok(())
    }

    /// Subscribe to `endpoint`, announce readiness and spawn the loop that
    /// serves requests until `shutdown` fires or the endpoint is closed.
    ///
    /// The subscription is in place before this returns, so no request sent
    /// afterwards can be missed.
    pub fn serve(self, endpoint: Endpoint, shutdown: oneshot::Receiver<()>) -> JoinHandle<()> {
        let (tx, rx) = mpsc::unbounded_channel::<(Message, Responder)>();
        let subscription = endpoint.subscribe(move |inbound| match &inbound.responder {
            Some(responder) => {
                if tx.send((inbound.message.clone(), responder.clone())).is_err() {
                    responder.send(Response::failure("Sandbox is shutting down"));
                }
            }
            None => debug!("sandbox ignoring notification {}", inbound.message.kind),
        });

        endpoint.notify(Message::new(SANDBOX_READY));
        info!("sandbox '{}' listening", endpoint.label());
        tokio::spawn(self.run(endpoint, subscription, rx, shutdown))
    }

    async fn run(
        mut self,
        endpoint: Endpoint,
        subscription: Subscription,
        mut rx: mpsc::UnboundedReceiver<(Message, Responder)>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            let (message, responder) = tokio::select! {
                _ = &mut shutdown => break,
                next = rx.recv() => match next {
                    Some(item) => item,
                    None => break,
                },
            };
            // A shutdown interrupts whatever is in flight.
            tokio::select! {
                response = self.handle_message(&message) => {
                    if !responder.send(response) {
                        debug!("reply to {} was not delivered", message.kind);
                    }
                }
                _ = &mut shutdown => {
                    responder.send(Response::failure(format!(
                        "Sandbox closed while handling {}",
                        message.kind
                    )));
                    break;
                }
            }
        }

        subscription.unsubscribe();
        rx.close();
        while let Ok((message, responder)) = rx.try_recv() {
            responder.send(Response::failure(format!(
                "Sandbox closed before handling {}",
                message.kind
            )));
        }
        self.surface.clear().await;
        endpoint.close();
        debug!("sandbox '{}' stopped", endpoint.label());
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
