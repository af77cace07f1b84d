use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use slideharvest::detect::{Detector, PatternDetector};
use slideharvest::{ContentSpec, HarvestConfig};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "slideharvest", version, about = "Capture embedded slide decks into a PDF")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List presentation embeds found in an HTML file, one JSON object per line
    Detect {
        html_file: PathBuf,
        /// Resolve relative iframe sources against this URL
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Capture a single URL or markup snippet
    Capture {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Detect every embed in an HTML file and capture them into one document
    Harvest {
        html_file: PathBuf,
        #[arg(long)]
        base_url: Option<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    markup: Option<String>,
    #[arg(long)]
    markup_file: Option<PathBuf>,
}

#[derive(Args)]
struct OutputArgs {
    /// Settle delay after loading each item
    #[arg(long)]
    wait_ms: Option<u64>,
    /// Output filename
    #[arg(long)]
    out: Option<String>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl OutputArgs {
    fn config(&self) -> Result<HarvestConfig> {
        let mut config = match &self.config {
            Some(path) => HarvestConfig::from_json_file(path)?,
            None => HarvestConfig::default(),
        };
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(run(cli))
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!(err))
}

fn detector(base_url: Option<&str>) -> Result<PatternDetector> {
    Ok(match base_url {
        Some(base) => PatternDetector::with_base(
            url::Url::parse(base).with_context(|| format!("invalid base URL {}", base))?,
        ),
        None => PatternDetector::new(),
    })
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Detect {
            html_file,
            base_url,
        } => {
            let html = tokio::fs::read_to_string(&html_file)
                .await
                .with_context(|| format!("cannot read {}", html_file.display()))?;
            for embed in detector(base_url.as_deref())?.detect(&html) {
                println!("{}", serde_json::to_string(&embed)?);
            }
        }
        Commands::Capture { source, output } => {
            let config = output.config()?;
            let wait = output.wait_ms.unwrap_or(config.default_render_wait_ms);
            let spec = match (source.url, source.markup, source.markup_file) {
                (Some(url), _, _) => ContentSpec::url(url, wait),
                (_, Some(markup), _) => ContentSpec::markup(markup, wait),
                (_, _, Some(path)) => {
                    let markup = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("cannot read {}", path.display()))?;
                    ContentSpec::markup(markup, wait)
                }
                _ => return Err(anyhow!("one of --url, --markup or --markup-file is required")),
            };
            let name = output.out.clone().unwrap_or_else(|| config.default_filename.clone());
            let dir = config.output_dir.clone();
            let orchestrator = slideharvest::new_orchestrator(config)?;
            orchestrator.capture(spec, &name).await?;
            println!("{}", dir.join(&name).display());
        }
        Commands::Harvest {
            html_file,
            base_url,
            output,
        } => {
            let config = output.config()?;
            let wait = output.wait_ms.unwrap_or(config.default_render_wait_ms);
            let html = tokio::fs::read_to_string(&html_file)
                .await
                .with_context(|| format!("cannot read {}", html_file.display()))?;
            let embeds = detector(base_url.as_deref())?.detect(&html);
            if embeds.is_empty() {
                eprintln!("No presentations found in {}", html_file.display());
                return Ok(());
            }
            for embed in &embeds {
                log::info!("found {} at {}", embed.id, embed.url);
            }
            let specs = embeds
                .into_iter()
                .map(|embed| ContentSpec::url(embed.url, wait))
                .collect();
            let name = output.out.clone().unwrap_or_else(|| config.default_filename.clone());
            let dir = config.output_dir.clone();
            let orchestrator = slideharvest::new_orchestrator(config)?;
            orchestrator.capture_all(specs, &name).await?;
            println!("{}", dir.join(&name).display());
        }
    }
    Ok(())
}
