//! Docbind CLI - convert documents to PDF and compile them into bookmarked bundles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docbind_core::{
    AppConfig, CompilationRequest, Converter, FormatKind, HeaderStamper, ImageConverter,
    MemoryDocumentStore, OfficeConverter, Pipeline, SofficeEngine, SourceFile, StorageConfig,
    ToolLocator, classify_source,
};
use docbind_core::pdf::HeaderOptions;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "docbind")]
#[command(author, version, about = "Convert documents to PDF and compile bookmarked bundles", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Office conversion engine binary (soffice)
    #[arg(long, global = true, env = "DOCBIND_SOFFICE")]
    soffice: Option<PathBuf>,

    /// Office conversion timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert images and office documents to PDF
    Convert {
        /// Files to convert
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory (default: next to each input)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Compile files into one bookmarked PDF, converting non-PDF inputs first
    Compile {
        /// Files to compile, in order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Title used for the output file name
        #[arg(short, long)]
        title: Option<String>,

        /// Stamp a header on every page (the title when no text is given)
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        header: Option<String>,

        /// Do not build a table of contents
        #[arg(long)]
        no_bookmarks: bool,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Stamp a header band on every page of a PDF
    Stamp {
        /// PDF to stamp
        input: PathBuf,

        /// Header text
        text: String,

        /// Output file (default: overwrite the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Font size in points
        #[arg(long)]
        font_size: Option<f32>,

        /// Height of the header band in points
        #[arg(long)]
        band_height: Option<f32>,

        /// TrueType font for non-Latin text
        #[arg(long)]
        font: Option<PathBuf>,
    },

    /// Show where the office conversion engine was found
    Locate,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path).context("Failed to load config file")?
    } else {
        AppConfig::load().context("Failed to load configuration")?
    };

    if let Some(soffice) = &args.soffice {
        config.office.binary_path = Some(soffice.clone());
    }
    if let Some(timeout) = args.timeout {
        config.office.timeout_secs = timeout;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    // Template is hardcoded and valid, unwrap is safe
    #[allow(clippy::unwrap_used)]
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

async fn convert(config: &AppConfig, inputs: &[PathBuf], output_dir: Option<&Path>) -> Result<()> {
    let locator = Arc::new(ToolLocator::new(config.office.binary_path.clone()));
    let image = ImageConverter;
    let office = OfficeConverter::new(
        Arc::new(SofficeEngine::new(locator)),
        config.office.timeout(),
        config.office.max_concurrent,
    );

    let pb = progress_bar(inputs.len());
    let mut failures = 0usize;

    for input in inputs {
        pb.set_message(input.display().to_string());
        let source = SourceFile::new(input, None);
        let converter: &dyn Converter = match classify_source(&source) {
            FormatKind::Image => &image,
            FormatKind::OfficeDocument => &office,
            FormatKind::Pdf => {
                pb.println(format!("{} is already a PDF, skipped", input.display()));
                pb.inc(1);
                continue;
            }
            FormatKind::Unsupported => {
                pb.println(format!("{}: unsupported format", input.display()));
                failures += 1;
                pb.inc(1);
                continue;
            }
        };

        let out_dir = output_dir
            .map(Path::to_path_buf)
            .or_else(|| input.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;

        match converter.convert(input, &out_dir).await {
            Ok(pdf) => pb.println(format!("{} -> {}", input.display(), pdf.display())),
            Err(e) => {
                warn!("Conversion of {} failed: {}", input.display(), e);
                pb.println(format!("{}: {e}", input.display()));
                failures += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    if failures > 0 {
        anyhow::bail!("{failures} of {} files could not be converted", inputs.len());
    }
    Ok(())
}

async fn compile(
    mut config: AppConfig,
    inputs: &[PathBuf],
    title: Option<String>,
    header: Option<String>,
    no_bookmarks: bool,
    output_dir: PathBuf,
) -> Result<()> {
    let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
    config.storage = StorageConfig {
        compilation_dir: output_dir,
        ..StorageConfig::rooted_at(scratch.path())
    };
    if no_bookmarks {
        config.compile.add_bookmarks = false;
    }

    let store = Arc::new(MemoryDocumentStore::new());
    let pipeline = Pipeline::new(config, store.clone()).context("Failed to initialize pipeline")?;

    let pb = progress_bar(inputs.len());
    let mut ids = Vec::with_capacity(inputs.len());
    for input in inputs {
        pb.set_message(input.display().to_string());
        let size = std::fs::metadata(input)
            .with_context(|| format!("Cannot read {}", input.display()))?
            .len();
        let source = SourceFile::new(input, None);
        let id = store
            .insert(docbind_core::util::file_stem(input), source.clone(), size)
            .await;

        let outcome = pipeline.convert_now(&source, id).await;
        if let Some(reason) = &outcome.error {
            pb.println(format!("{}: {reason}", input.display()));
        }
        ids.push(id);
        pb.inc(1);
    }
    pb.finish_and_clear();

    let mut request = CompilationRequest::new(ids);
    request.title = title;
    if let Some(text) = header {
        request = request.with_header((!text.is_empty()).then_some(text));
    }

    let compiled = pipeline.compile(&request).await.context("Compilation failed")?;
    pipeline.shutdown().await;
    info!("{} bookmarks written", compiled.bookmarks.len());

    // CLI output is intentional
    #[allow(clippy::print_stdout)]
    {
        for skipped in &compiled.skipped {
            println!("Skipped document {skipped}: no PDF available");
        }
        println!(
            "Compiled {} pages to: {}",
            compiled.page_count,
            compiled.path.display()
        );
    }
    Ok(())
}

fn stamp(
    config: &AppConfig,
    input: &Path,
    text: &str,
    output: Option<&Path>,
    font_size: Option<f32>,
    band_height: Option<f32>,
    font: Option<PathBuf>,
) -> Result<()> {
    let mut header = config.header.clone();
    if let Some(font_size) = font_size {
        header.font_size = font_size;
    }
    if let Some(band_height) = band_height {
        header.band_height = band_height;
    }
    if font.is_some() {
        header.font_path = font;
    }

    let stamper = HeaderStamper::from_config(&header).context("Failed to load header font")?;
    let HeaderOptions { font_size, band_height } = stamper.options();
    info!("Stamping {} ({}pt text, {}pt band)", input.display(), font_size, band_height);

    let written = stamper
        .stamp_file(input, output, text)
        .with_context(|| format!("Failed to stamp {}", input.display()))?;

    // CLI output is intentional
    #[allow(clippy::print_stdout)]
    {
        println!("Stamped PDF saved to: {}", written.display());
    }
    Ok(())
}

async fn locate(config: &AppConfig) -> Result<()> {
    let locator = ToolLocator::new(config.office.binary_path.clone());
    let path = locator
        .locate()
        .await
        .context("No office conversion engine found; set --soffice or office.binary_path")?;

    // CLI output is intentional
    #[allow(clippy::print_stdout)]
    {
        println!("{}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before parsing args so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = load_config(&args)?;

    match args.command {
        Command::Convert { inputs, output_dir } => convert(&config, &inputs, output_dir.as_deref()).await,
        Command::Compile {
            inputs,
            title,
            header,
            no_bookmarks,
            output_dir,
        } => compile(config, &inputs, title, header, no_bookmarks, output_dir).await,
        Command::Stamp {
            input,
            text,
            output,
            font_size,
            band_height,
            font,
        } => stamp(&config, &input, &text, output.as_deref(), font_size, band_height, font),
        Command::Locate => locate(&config).await,
    }
}
