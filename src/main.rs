//! plexkit CLI - Misc tools for managing Plex.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use plexkit::report::{report_filename, summary_lines, write_csv};
use plexkit::{AlbumRatingPipeline, Config, PlexClient, RunMode};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "plexkit")]
#[command(version)]
#[command(about = "Misc tools for managing Plex")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive album ratings from track ratings
    AlbumRatings {
        /// preview (p) or update (u); prompts when omitted
        #[arg(short, long)]
        mode: Option<RunMode>,

        /// Directory for the CSV report (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Also recalculate albums that already have a rating
        #[arg(long)]
        rerate: bool,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    // Only fails if a subscriber is already installed
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn print_example_config() {
    let example = r#"# plexkit configuration file

[plex]
url = "http://localhost:32400"
# X-Plex-Token (can also use PLEX_TOKEN env var)
# token = "..."
music_library_id = "3"
timeout_secs = 30
max_retries = 3
container_size = 2000

[album_ratings]
request_delay_ms = 100
concurrency = 1
output_dir = "."
# Recalculate albums that already carry a rating
rerate = false
"#;
    println!("{example}");
}

/// Ask for the run mode until a valid answer is given.
fn prompt_mode(input: &mut impl BufRead, output: &mut impl Write) -> Result<RunMode> {
    loop {
        write!(output, "Select mode ([p]review/[u]pdate): ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            bail!("No mode selected (end of input)");
        }

        match line.parse::<RunMode>() {
            Ok(mode) => return Ok(mode),
            Err(_) => writeln!(
                output,
                "Invalid mode. Please enter 'preview' (p) or 'update' (u)"
            )?,
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let config =
        Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.resolve_token().context("Failed to resolve Plex token")?;

            info!("Configuration is valid");
            info!("  Server: {}", config.plex.url);
            info!("  Music library: {}", config.plex.music_library_id);
            info!(
                "  Concurrency: {} (delay {}ms)",
                config.album_ratings.concurrency, config.album_ratings.request_delay_ms
            );
        }

        Commands::AlbumRatings {
            mode,
            output_dir,
            rerate,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(dir) = output_dir {
                config.album_ratings.output_dir = dir;
            }
            config.album_ratings.rerate |= rerate;

            let token = config
                .resolve_token()
                .context("Failed to resolve Plex token")?;

            let mode = match mode {
                Some(mode) => mode,
                None => {
                    let stdin = std::io::stdin();
                    prompt_mode(&mut stdin.lock(), &mut std::io::stdout())?
                }
            };
            println!("\nRunning in {} mode", mode.as_str().to_uppercase());

            let client = Arc::new(PlexClient::from_config(&config, &token)?);
            let pipeline = AlbumRatingPipeline::new(&config.album_ratings, Arc::clone(&client));

            println!("Fetching albums from Plex...");
            let output = pipeline.run(mode).await?;

            let output_file = config
                .album_ratings
                .output_dir
                .join(report_filename(mode, &chrono::Local::now()));
            write_csv(&output_file, &output.results)
                .with_context(|| format!("Failed to write report to {output_file:?}"))?;

            println!();
            for line in summary_lines(&output.stats, mode) {
                println!("{line}");
            }
            println!("Runtime: {:.1}s", output.stats.runtime_secs);
            println!("Results saved to {}", output_file.display());

            let limiter = client.rate_limiter().stats();
            info!(
                requests = limiter.total_requests,
                rate_limited = limiter.total_429s,
                waited = format!("{:.1}s", limiter.total_wait_secs),
                "Plex request stats"
            );
        }
    }

    Ok(())
}
