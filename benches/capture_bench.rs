use criterion::{criterion_group, criterion_main, Criterion};
use scraper::Html;
use slideharvest::rendering::{layout, paint, raster};
use slideharvest::{ContentSpec, HarvestConfig, RawImage, Viewport};

const SLIDE: &str = r#"<html><body>
<h1>Quarterly review</h1>
<h2>Highlights</h2>
<ul><li>Revenue up 12%</li><li>Two new regions</li><li>Churn flat</li></ul>
<p>Questions welcome after the session.</p>
</body></html>"#;

fn viewport() -> Viewport {
    Viewport {
        width: 640,
        height: 360,
    }
}

fn bench_rasterize(c: &mut Criterion) {
    c.bench_function("layout_paint_raster", |b| {
        b.iter(|| {
            let doc = Html::parse_document(SLIDE);
            let nodes = layout::layout_document(&doc, viewport());
            let cmds = paint::paint_layout(&nodes, viewport());
            raster::encode_png(&raster::rasterize(&cmds, viewport())).unwrap()
        })
    });
}

fn bench_build_pdf(c: &mut Criterion) {
    let doc = Html::parse_document(SLIDE);
    let cmds = paint::paint_layout(&layout::layout_document(&doc, viewport()), viewport());
    let png = raster::encode_png(&raster::rasterize(&cmds, viewport())).unwrap();
    let frames: Vec<RawImage> = (0..5).map(|_| RawImage::png(png.clone())).collect();

    c.bench_function("build_pdf_5_pages", |b| {
        b.iter(|| slideharvest::assembly::build_pdf(&frames).unwrap())
    });
}

fn bench_capture_markup(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cfg = HarvestConfig {
        viewport: viewport(),
        output_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let orchestrator = rt
        .block_on(async { slideharvest::new_orchestrator(cfg) })
        .unwrap();

    c.bench_function("capture_inline_markup", |b| {
        b.iter(|| {
            rt.block_on(orchestrator.capture(ContentSpec::markup(SLIDE, 0), "bench.pdf"))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_rasterize, bench_build_pdf, bench_capture_markup);
criterion_main!(benches);
