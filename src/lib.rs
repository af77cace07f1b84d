//! SlideHarvest
//!
//! Detects slide presentations embedded in a page, renders each one in an
//! isolated headless sandbox, captures raster frames and assembles them into a
//! single document.
//!
//! # Architecture
//!
//! - [`transport`]: message bus connecting isolated contexts (request/response
//!   with correlation ids, notifications, subscriptions)
//! - [`sandbox`]: lifecycle of the single rendering sandbox, the command
//!   handler running inside it, and the host that spawns it
//! - [`orchestrator`]: single-flight capture pipeline with unconditional
//!   cleanup
//! - [`detect`], [`assembly`], [`persist`], [`rendering`]: collaborators
//!
//! # Example
//!
//! ```no_run
//! use slideharvest::{ContentSpec, HarvestConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarvestConfig::default();
//! let orchestrator = slideharvest::new_orchestrator(config)?;
//! orchestrator
//!     .capture(ContentSpec::markup("<h1>Quarterly review</h1>", 0), "out.pdf")
//!     .await?;
//! # Ok(())
//! # }
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod content;
pub use content::{BinaryDocument, ContentSpec, RawImage};

pub mod message;
pub use message::{Command, Message, Response};

pub mod transport;

pub mod sandbox;
pub use sandbox::{SandboxManager, SandboxState};

// Raster surface used inside the sandbox (layout -> paint -> raster)
pub mod rendering;

pub mod assembly;
pub mod detect;
pub mod persist;

pub mod orchestrator;
pub use orchestrator::{CaptureOrchestrator, SessionStatus};

/// Configuration for a capture pipeline
///
/// Defaults mirror a browser extension's behaviour: a 30 s budget per sandbox
/// command, a 1 s bound on waiting for the sandbox to announce itself and a
/// 3 s render-settle delay for content that does not specify its own.
///
/// # Examples
///
/// ```
/// let cfg = slideharvest::HarvestConfig::default();
/// assert_eq!(cfg.viewport.width, 1920);
/// assert_eq!(cfg.request_timeout_ms, 30000);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Size of the sandbox's rendering surface
    pub viewport: Viewport,
    /// User agent sent when the sandbox navigates to a URL
    pub user_agent: String,
    /// Timeout for each command sent to the sandbox
    pub request_timeout_ms: u64,
    /// Upper bound on waiting for the sandbox readiness notification
    pub ready_timeout_ms: u64,
    /// Timeout for the best-effort cleanup command during teardown
    pub cleanup_timeout_ms: u64,
    /// Timeout for fetching a URL inside the sandbox
    pub navigation_timeout_ms: u64,
    /// Settle delay used when the caller does not pick one
    pub default_render_wait_ms: u64,
    /// Directory the default persister writes into
    pub output_dir: PathBuf,
    /// Filename used when the caller does not pick one
    pub default_filename: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) SlideHarvest/0.1".to_string(),
            request_timeout_ms: 30000,
            ready_timeout_ms: 1000,
            cleanup_timeout_ms: 5000,
            navigation_timeout_ms: 15000,
            default_render_wait_ms: 3000,
            output_dir: PathBuf::from("."),
            default_filename: "slides.pdf".to_string(),
        }
    }
}

impl HarvestConfig {
    /// Load a JSON config file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: HarvestConfig = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::Config("viewport must be non-empty".into()));
        }
        for (name, value) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("ready_timeout_ms", self.ready_timeout_ms),
            ("cleanup_timeout_ms", self.cleanup_timeout_ms),
            ("navigation_timeout_ms", self.navigation_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.default_filename.trim().is_empty() {
            return Err(Error::Config("default_filename must not be empty".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Wire up the default pipeline: an in-process bus, a [`sandbox::host::LocalHost`]
/// rendering with [`rendering::RasterSurface`], the PDF assembler and a
/// filesystem persister rooted at `config.output_dir`.
///
/// Must be called from within a tokio runtime.
pub fn new_orchestrator(config: HarvestConfig) -> Result<CaptureOrchestrator> {
    config.validate()?;
    let bus = transport::MessageBus::new();
    let surface_config = config.clone();
    let host = sandbox::host::LocalHost::new(bus.clone(), move || {
        Box::new(rendering::RasterSurface::new(&surface_config)) as Box<dyn rendering::RenderSurface>
    });
    let manager = SandboxManager::new(bus.attach("coordinator"), Arc::new(host), &config);
    Ok(CaptureOrchestrator::new(
        manager,
        Arc::new(assembly::PdfAssembler::new()),
        Arc::new(persist::FsPersister::new(config.output_dir.clone())),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HarvestConfig::default();
        assert_eq!(config.viewport.width, 1920);
        assert_eq!(config.viewport.height, 1080);
        assert_eq!(config.default_filename, "slides.pdf");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: HarvestConfig =
            serde_json::from_str(r#"{"request_timeout_ms": 500, "viewport": {"width": 640, "height": 360}}"#)
                .unwrap();
        assert_eq!(cfg.request_timeout_ms, 500);
        assert_eq!(cfg.viewport, Viewport { width: 640, height: 360 });
        assert_eq!(cfg.ready_timeout_ms, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let cfg = HarvestConfig {
            request_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let cfg = HarvestConfig {
            viewport: Viewport { width: 0, height: 10 },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.json");
        std::fs::write(&path, r#"{"default_filename": "deck.pdf"}"#).unwrap();
        let cfg = HarvestConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.default_filename, "deck.pdf");

        assert!(HarvestConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
