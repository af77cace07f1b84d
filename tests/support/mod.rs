//! Fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use slideharvest::assembly::{Assembler, PdfAssembler};
use slideharvest::persist::Persister;
use slideharvest::rendering::raster::encode_png;
use slideharvest::rendering::RenderSurface;
use slideharvest::sandbox::host::LocalHost;
use slideharvest::sandbox::SandboxHost;
use slideharvest::transport::MessageBus;
use slideharvest::{
    BinaryDocument, CaptureOrchestrator, Error, HarvestConfig, RawImage, Result, SandboxManager,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a [`TestSurface`] returns from `capture`.
#[derive(Debug, Clone, Copy)]
pub enum Frames {
    /// The loaded markup bytes, tagged `image/x-test`.
    Echo,
    /// A 10x10 PNG.
    Png10,
    /// `CaptureUnavailable`.
    Blind,
}

pub struct TestSurface {
    frames: Frames,
    markup: Option<String>,
}

impl TestSurface {
    pub fn boxed(frames: Frames) -> Box<dyn RenderSurface> {
        Box::new(Self {
            frames,
            markup: None,
        })
    }
}

#[async_trait]
impl RenderSurface for TestSurface {
    async fn clear(&mut self) {
        self.markup = None;
    }

    async fn inject_markup(&mut self, markup: &str) -> Result<()> {
        self.markup = Some(markup.to_string());
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        Err(Error::Navigation(format!("offline: {}", url)))
    }

    async fn capture(&mut self) -> Result<RawImage> {
        let markup = self
            .markup
            .clone()
            .ok_or_else(|| Error::Render("No document loaded".into()))?;
        match self.frames {
            Frames::Echo => Ok(RawImage::new("image/x-test", markup.into_bytes())),
            Frames::Png10 => Ok(RawImage::png(encode_png(&image::RgbaImage::new(10, 10))?)),
            Frames::Blind => Err(Error::CaptureUnavailable("no capture API".into())),
        }
    }
}

/// [`LocalHost`] with counters and failure switches.
pub struct InstrumentedHost {
    inner: LocalHost,
    pub creates: AtomicUsize,
    pub closes: AtomicUsize,
    pub refuse: bool,
    pub close_delay: Duration,
    /// Extra time the host takes after the sandbox is up.
    pub create_delay: Duration,
}

impl InstrumentedHost {
    pub fn new(bus: &MessageBus, frames: Frames) -> Self {
        Self {
            inner: LocalHost::new(bus.clone(), move || TestSurface::boxed(frames)),
            creates: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            refuse: false,
            close_delay: Duration::ZERO,
            create_delay: Duration::ZERO,
        }
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxHost for InstrumentedHost {
    async fn create_sandbox(&self) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(Error::SandboxCreationFailed("host refused".into()));
        }
        self.inner.create_sandbox().await?;
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        Ok(())
    }

    async fn close_sandbox(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.inner.close_sandbox().await
    }

    async fn has_sandbox(&self) -> bool {
        self.inner.has_sandbox().await
    }
}

/// Delegates to [`PdfAssembler`] and records every input.
#[derive(Default)]
pub struct RecordingAssembler {
    pub calls: Mutex<Vec<Vec<RawImage>>>,
    pub fail: bool,
}

#[async_trait]
impl Assembler for RecordingAssembler {
    async fn assemble(&self, frames: Vec<RawImage>) -> Result<BinaryDocument> {
        self.calls.lock().push(frames.clone());
        if self.fail {
            return Err(Error::AssemblyError("injected".into()));
        }
        if frames.iter().all(|f| f.mime == "image/png") {
            PdfAssembler::new().assemble(frames).await
        } else {
            Ok(BinaryDocument::new("application/pdf", Vec::new()))
        }
    }
}

#[derive(Default)]
pub struct RecordingPersister {
    pub saves: Mutex<Vec<(String, BinaryDocument)>>,
    pub fail: bool,
}

#[async_trait]
impl Persister for RecordingPersister {
    async fn save(&self, document: BinaryDocument, filename: &str) -> Result<()> {
        self.saves.lock().push((filename.to_string(), document));
        if self.fail {
            return Err(Error::Persistence("disk full".into()));
        }
        Ok(())
    }
}

pub fn test_config() -> HarvestConfig {
    HarvestConfig {
        ready_timeout_ms: 200,
        request_timeout_ms: 2000,
        cleanup_timeout_ms: 500,
        ..Default::default()
    }
}

pub struct Harness {
    pub bus: MessageBus,
    pub host: Arc<InstrumentedHost>,
    pub assembler: Arc<RecordingAssembler>,
    pub persister: Arc<RecordingPersister>,
    pub orchestrator: CaptureOrchestrator,
}

impl Harness {
    pub fn manager(&self) -> &SandboxManager {
        self.orchestrator.manager()
    }
}

pub fn harness_with(
    host: impl FnOnce(&MessageBus) -> InstrumentedHost,
    assembler: RecordingAssembler,
    persister: RecordingPersister,
) -> Harness {
    let bus = MessageBus::new();
    let host = Arc::new(host(&bus));
    let assembler = Arc::new(assembler);
    let persister = Arc::new(persister);
    let manager = SandboxManager::new(bus.attach("coordinator"), host.clone(), &test_config());
    let orchestrator = CaptureOrchestrator::new(manager, assembler.clone(), persister.clone());
    Harness {
        bus,
        host,
        assembler,
        persister,
        orchestrator,
    }
}

pub fn harness(frames: Frames) -> Harness {
    harness_with(
        |bus| InstrumentedHost::new(bus, frames),
        RecordingAssembler::default(),
        RecordingPersister::default(),
    )
}
