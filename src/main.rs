use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use media_archiver::app::download_use_case::DownloadUseCase;
use media_archiver::app::extract_use_case::{ExtractReport, ExtractUseCase};
use media_archiver::app::retry_use_case::{RetryReport, RetryUseCase};
use media_archiver::app::status_use_case::StatusUseCase;
use media_archiver::app::{LimiterFactory, Services};
use media_archiver::config::Config;
use media_archiver::constants::METRICS_SNAPSHOT_FILE;
use media_archiver::infra::http_client::ReqwestHttp;
use media_archiver::infra::rate_limiter_adapter::RateLimiterAdapter;
use media_archiver::observability;
use media_archiver::pipeline::acquisition::RunSummary;
use media_archiver::pipeline::pacing::CancelHandle;

#[derive(Parser)]
#[command(name = "media_archiver")]
#[command(about = "Archive the media of saved posts: extract, deduplicate, download, retry")]
#[command(version = "0.1.0")]
struct Cli {
    /// Config file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Archive root; overrides the config file
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every post in the input directory and write the download queue
    Extract {
        /// Directory of exported saved-post files
        #[arg(long)]
        input: PathBuf,
        /// Continue from the extraction checkpoint
        #[arg(long)]
        resume: bool,
    },
    /// Download the deduplicated queue
    Download {
        /// Queue file to download instead of deduplicated.txt
        #[arg(long)]
        list: Option<PathBuf>,
        /// Continue from the download checkpoint
        #[arg(long)]
        resume: bool,
    },
    /// Run retry passes over the failure ledger
    Retry {
        /// Highest pass to run (defaults to retry.max_retry_passes)
        #[arg(long)]
        passes: Option<u32>,
    },
    /// Extract, download, then retry
    Run {
        #[arg(long)]
        input: PathBuf,
    },
    /// Show counts for the archive
    Status,
}

fn print_extract(report: &ExtractReport) {
    println!("\n📊 Extraction Results:");
    println!("   Posts: {}", report.total_posts);
    println!("   Extracted: {}", report.extracted_posts);
    println!("   Failed: {}", report.failed_posts);
    println!("   Candidates: {}", report.candidates);
    println!("   Queued after deduplication: {}", report.queued);
    if report.cancelled {
        println!("   ⏸️  Cancelled; rerun with --resume to continue");
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Download Results (pass {}):", summary.pass);
    println!("   Total: {}", summary.total);
    println!("   Successful: {}", summary.successful);
    println!("   Failed: {}", summary.failed);
    println!("   Skipped: {}", summary.skipped);
    println!("   Notes: {}", summary.notes);
    println!("   Content mismatches: {}", summary.mismatched);
    if summary.cancelled {
        println!("   ⏸️  Cancelled; rerun with --resume to continue");
    }
    if !summary.failed_items.is_empty() {
        println!("\n⚠️  Failed items:");
        for failed in &summary.failed_items {
            println!("   - {} ({})", failed.item.url(), failed.error);
        }
    }
}

fn print_retry(report: &RetryReport) {
    for pass in &report.passes {
        print_summary(pass);
    }
    println!("\n🔁 Retry Results:");
    println!("   Passes run: {}", report.passes.len());
    println!("   Resolved: {}", report.resolved());
    println!("   Posts re-extracted: {}", report.reextracted_posts);
    println!("   Quarantined: {}", report.quarantined);
    if report.cancelled {
        println!("   ⏸️  Cancelled; the interrupted pass will run again");
    }
}

fn build_services(config: Config, cancel: media_archiver::pipeline::CancelToken) -> Result<Services> {
    let http = ReqwestHttp::new(&config.http).context("building the HTTP client")?;
    let limiter_for: LimiterFactory = Arc::new(RateLimiterAdapter::shared);
    Ok(Services::new(config, Arc::new(http), limiter_for, cancel))
}

fn write_metrics_snapshot(root: &Path) {
    match observability::write_snapshot(&root.join(METRICS_SNAPSHOT_FILE)) {
        Ok(true) => info!("Metrics snapshot written"),
        Ok(false) => {}
        Err(e) => warn!("Could not write metrics snapshot: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(output) = cli.output {
        config = config.with_output_root(output);
    }
    let root = config.output.root.clone();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("creating archive root {}", root.display()))?;

    observability::init_logging(&root);
    if let Err(e) = observability::init() {
        warn!("Metrics recorder not installed: {}", e);
    }

    let (cancel_handle, cancel) = CancelHandle::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current item and saving progress");
            cancel_handle.cancel();
        }
    });

    let services = build_services(config, cancel)?;

    let outcome = match cli.command {
        Commands::Extract { input, resume } => {
            println!("🔄 Extracting media from {}...", input.display());
            ExtractUseCase::new(services)
                .execute(&input, resume)
                .await
                .map(|report| print_extract(&report))
        }
        Commands::Download { list, resume } => {
            println!("📥 Downloading queued media...");
            DownloadUseCase::new(services)
                .execute(list.as_deref(), resume)
                .await
                .map(|summary| print_summary(&summary))
        }
        Commands::Retry { passes } => {
            println!("🔁 Running retry passes...");
            RetryUseCase::new(services)
                .execute(passes)
                .await
                .map(|report| print_retry(&report))
        }
        Commands::Run { input } => run_all(services, &input).await,
        Commands::Status => StatusUseCase::execute(&root).map(|report| print!("{}", report)),
    };

    write_metrics_snapshot(&root);
    if let Err(e) = &outcome {
        error!("Run failed: {:#}", e);
        println!("❌ {:#}", e);
    }
    outcome
}

async fn run_all(services: Services, input: &Path) -> Result<()> {
    println!("🚀 Running full pipeline (extract + download + retry)...");

    println!("\n🔄 Step 1: Extracting...");
    let extracted = ExtractUseCase::new(services.clone()).execute(input, false).await?;
    print_extract(&extracted);
    if extracted.cancelled {
        return Ok(());
    }

    println!("\n📥 Step 2: Downloading...");
    let summary = DownloadUseCase::new(services.clone()).execute(None, false).await?;
    print_summary(&summary);
    if summary.cancelled {
        return Ok(());
    }

    println!("\n🔁 Step 3: Retrying failures...");
    let retried = RetryUseCase::new(services).execute(None).await?;
    print_retry(&retried);
    if !retried.cancelled {
        println!("✅ Full pipeline completed");
    }
    Ok(())
}
