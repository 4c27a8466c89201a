use std::path::PathBuf;

use clap::Parser;
use profile_crawler::config::Config;
use profile_crawler::pipeline::Pipeline;
use profile_crawler::telemetry;

const DEFAULT_THREADS: usize = 5;

#[derive(Debug, Clone, Parser)]
#[command(name = "profile-crawler", version, about = "Hierarchical enumeration and resumable bulk downloader for a capped person-profile search API")]
struct Cli {
    /// Number of concurrent downloader workers.
    #[arg(short = 't', long, default_value_t = DEFAULT_THREADS)]
    threads: usize,

    /// Walk the filter hierarchy and log CHECK results without downloading anything.
    #[arg(long)]
    dry_run: bool,

    /// Path to the hierarchy data file (overrides PROFILE_HIERARCHY_FILE).
    #[arg(long)]
    hierarchy_file: Option<PathBuf>,

    /// Directory tracing log files are written to.
    #[arg(long, env = "PROFILE_LOG_DIR", default_value = "data/logs")]
    log_dir: PathBuf,

    /// Increase log verbosity (stacks; overrides RUST_LOG if set).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    if cli.verbose > 0 {
        let level = match cli.verbose {
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        // SAFETY: single-threaded at this point, before the tokio runtime has
        // spawned any other task.
        unsafe {
            std::env::set_var("RUST_LOG", format!("profile_crawler={level}"));
        }
    }

    let _log_guard = telemetry::init_logging(&cli.log_dir)?;

    if cli.threads == 0 {
        miette::bail!("--threads must be at least 1");
    }

    let config = Config::load(cli.hierarchy_file.as_deref())?;
    let pipeline = Pipeline::new(config, cli.threads, cli.dry_run)?;
    pipeline.run().await?;

    Ok(())
}
