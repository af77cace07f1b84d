//! Rendering surfaces used inside the sandbox.
//!
//! A surface holds whatever content was last loaded into it and can capture
//! that content as a [`RawImage`]. [`RasterSurface`] renders headings and
//! paragraphs through a small layout -> paint -> raster pipeline.

pub mod layout;
pub mod paint;
pub mod raster;

use crate::content::RawImage;
use crate::{Error, HarvestConfig, Result, Viewport};
use async_trait::async_trait;
use log::debug;
use scraper::Html;
use std::time::Duration;

/// The off-screen canvas the sandbox manipulates.
#[async_trait]
pub trait RenderSurface: Send {
    /// Drop any rendered content.
    async fn clear(&mut self);

    /// Replace the surface content with `markup`.
    async fn inject_markup(&mut self, markup: &str) -> Result<()>;

    /// Load the document at `url` into the surface.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Capture the currently rendered surface.
    ///
    /// Surfaces without a capture mechanism return
    /// [`Error::CaptureUnavailable`].
    async fn capture(&mut self) -> Result<RawImage>;
}

/// Surface that lays out and rasterizes HTML to PNG.
pub struct RasterSurface {
    viewport: Viewport,
    user_agent: String,
    navigation_timeout: Duration,
    document: Option<String>,
}

impl RasterSurface {
    pub fn new(config: &HarvestConfig) -> Self {
        Self {
            viewport: config.viewport,
            user_agent: config.user_agent.clone(),
            navigation_timeout: config.navigation_timeout(),
            document: None,
        }
    }

    /// Whether content is currently loaded.
    pub fn has_content(&self) -> bool {
        self.document.is_some()
    }

}

fn render(html: &str, viewport: Viewport) -> Result<RawImage> {
    let document = Html::parse_document(html);
    let nodes = layout::layout_document(&document, viewport);
    let cmds = paint::paint_layout(&nodes, viewport);
    let img = raster::rasterize(&cmds, viewport);
    Ok(RawImage::png(raster::encode_png(&img)?))
}

#[async_trait]
impl RenderSurface for RasterSurface {
    async fn clear(&mut self) {
        self.document = None;
    }

    async fn inject_markup(&mut self, markup: &str) -> Result<()> {
        self.document = Some(markup.to_string());
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        let body = fetch_document(url, &self.user_agent, self.navigation_timeout).await?;
        debug!("navigated to {} ({} bytes)", url, body.len());
        self.document = Some(body);
        Ok(())
    }

    async fn capture(&mut self) -> Result<RawImage> {
        let html = self
            .document
            .clone()
            .ok_or_else(|| Error::Render("No document loaded".into()))?;
        let viewport = self.viewport;
        tokio::task::spawn_blocking(move || render(&html, viewport))
            .await
            .map_err(|e| Error::Render(format!("render task failed: {}", e)))?
    }
}

/// Surface that can load content but has no way to read its pixels back,
/// as when the sandbox lacks the coordinator's capture privileges.
#[derive(Debug, Default)]
pub struct BlindSurface {
    loaded: bool,
}

impl BlindSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RenderSurface for BlindSurface {
    async fn clear(&mut self) {
        self.loaded = false;
    }

    async fn inject_markup(&mut self, _markup: &str) -> Result<()> {
        self.loaded = true;
        Ok(())
    }

    async fn navigate(&mut self, _url: &str) -> Result<()> {
        self.loaded = true;
        Ok(())
    }

    async fn capture(&mut self) -> Result<RawImage> {
        Err(Error::CaptureUnavailable(
            "no capture mechanism is reachable from the sandbox".into(),
        ))
    }
}

/// Fetch `url` as text on the blocking pool.
#[cfg(feature = "fetch")]
async fn fetch_document(url: &str, user_agent: &str, timeout: Duration) -> Result<String> {
    let parsed = url::Url::parse(url).map_err(|e| Error::Navigation(format!("{}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Navigation(format!(
            "unsupported scheme '{}' in {}",
            parsed.scheme(),
            url
        )));
    }
    let user_agent = user_agent.to_string();
    let task = tokio::task::spawn_blocking(move || -> Result<String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Navigation(format!("Failed to build HTTP client: {}", e)))?;
        let resp = client
            .get(parsed.as_str())
            .header("User-Agent", user_agent)
            .send()
            .map_err(|e| Error::Navigation(format!("Failed to fetch {}: {}", parsed, e)))?;
        if !resp.status().is_success() {
            return Err(Error::Navigation(format!(
                "{} returned HTTP {}",
                parsed,
                resp.status()
            )));
        }
        resp.text()
            .map_err(|e| Error::Navigation(format!("Failed to read response body: {}", e)))
    });
    task.await
        .map_err(|e| Error::Navigation(format!("fetch task failed: {}", e)))?
}

#[cfg(not(feature = "fetch"))]
async fn fetch_document(url: &str, _user_agent: &str, _timeout: Duration) -> Result<String> {
    Err(Error::Navigation(format!(
        "cannot load {}: built without the `fetch` feature",
        url
    )))
}
