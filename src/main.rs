//! `podcast-dl` command line interface

#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use podcast_dl::{
    Config, Error, Export, PodcastDownloader, PodcastSelection, Result, RunSummary, opml,
};

/// Exit code when the export or the download directory is unusable
const EXIT_FATAL: u8 = 1;
/// Exit code when `--fail-on-error` is set and an episode failed
const EXIT_EPISODE_FAILURES: u8 = 2;
/// Conventional exit code after SIGINT
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "podcast-dl",
    version,
    about = "Download the audio of every podcast episode you've played",
    after_help = r#"
The export is the OPML file from your podcast player (in Overcast:
Account > Export OPML, "extended" variant). Only played episodes are fetched.
Running again over the same directory only fetches what is missing.

EXAMPLES:
  podcast-dl overcast.opml                  # everything, into ./audiofiles
  podcast-dl overcast.opml --list           # show numbered podcasts
  podcast-dl overcast.opml -p 3 -p 7        # only podcasts 3 and 7
  podcast-dl overcast.opml --interactive    # choose podcasts at a prompt
  podcast-dl overcast.opml -d ~/Podcasts -j 8
"#
)]
struct Cli {
    /// OPML export listing your podcasts and played episodes
    #[arg(value_name = "EXPORT_PATH")]
    export: PathBuf,

    /// Where episodes are stored, one directory per podcast
    #[arg(short = 'd', long, value_name = "PATH", default_value = "audiofiles")]
    download_dir: PathBuf,

    /// Number of episodes downloaded at once
    #[arg(short = 'j', long, value_name = "N", default_value_t = 5)]
    concurrency: usize,

    /// Download every podcast in the export (the default without -p)
    #[arg(long, conflicts_with_all = ["podcasts", "interactive"])]
    all: bool,

    /// Only download this podcast, by its number in --list (repeatable)
    #[arg(short = 'p', long = "podcast", value_name = "N")]
    podcasts: Vec<usize>,

    /// Choose podcasts at a prompt
    #[arg(long, conflicts_with = "podcasts")]
    interactive: bool,

    /// List the podcasts in the export and exit
    #[arg(long)]
    list: bool,

    /// Don't save a daily copy of each podcast's feed
    #[arg(long)]
    no_feed_snapshot: bool,

    /// User-Agent header for all requests
    #[arg(long, value_name = "UA")]
    user_agent: Option<String>,

    /// Download history file (default: <download-dir>/download_history.jsonl)
    #[arg(long, value_name = "PATH")]
    history: Option<PathBuf>,

    /// Exit with status 2 if any episode failed
    #[arg(long)]
    fail_on_error: bool,

    /// Show debug output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only show warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

/// How a command finished, before it becomes an exit code
#[derive(Debug)]
enum Finish {
    /// `--list` printed the podcasts
    Listed,
    /// A run went through all selected episodes
    Completed(RunSummary),
    /// A signal arrived before the run finished
    Interrupted,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    let fail_on_error = cli.fail_on_error;

    let finish = run(cli).await;
    match &finish {
        Ok(Finish::Completed(summary)) => print_summary(summary),
        Ok(Finish::Interrupted) => {
            warn!("Interrupted; completed episodes are recorded and the rest will be fetched next run")
        }
        Ok(Finish::Listed) => {}
        Err(e) => error!("Fatal error: {}", e),
    }
    ExitCode::from(exit_status(&finish, fail_on_error))
}

/// Exit status for a finished command
///
/// Episode failures only change the status with `--fail-on-error`.
fn exit_status(finish: &Result<Finish>, fail_on_error: bool) -> u8 {
    match finish {
        Ok(Finish::Listed) => 0,
        Ok(Finish::Completed(summary)) if fail_on_error && summary.has_failures() => {
            EXIT_EPISODE_FAILURES
        }
        Ok(Finish::Completed(_)) => 0,
        Ok(Finish::Interrupted) => EXIT_INTERRUPTED,
        Err(_) => EXIT_FATAL,
    }
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "podcast_dl=debug"
    } else if cli.quiet {
        "podcast_dl=warn"
    } else {
        "podcast_dl=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<Finish> {
    let export = opml::read_export(&cli.export).await?;
    info!(
        export = %cli.export.display(),
        podcasts = export.podcasts.len(),
        episodes = export.stats.episodes,
        "Read export"
    );

    if cli.list {
        print_podcasts(&export);
        return Ok(Finish::Listed);
    }

    let selection = match flag_selection(&cli) {
        Some(selection) => selection,
        None => prompt_selection(&export).await?,
    };

    let downloader = PodcastDownloader::new(build_config(&cli)?).await?;

    tokio::select! {
        summary = downloader.run(&export, &selection) => Ok(Finish::Completed(summary?)),
        _ = podcast_dl::shutdown_signal() => Ok(Finish::Interrupted),
    }
}

/// Selection given on the command line, or `None` when it must be prompted for
fn flag_selection(cli: &Cli) -> Option<PodcastSelection> {
    if cli.interactive {
        None
    } else if cli.all || cli.podcasts.is_empty() {
        Some(PodcastSelection::All)
    } else {
        Some(PodcastSelection::Indices(cli.podcasts.clone()))
    }
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::default();
    config.download.download_dir = std::path::absolute(&cli.download_dir)?;
    config.download.max_concurrent_downloads = cli.concurrency;
    config.download.snapshot_feeds = !cli.no_feed_snapshot;
    if let Some(user_agent) = &cli.user_agent {
        config.http.user_agent = user_agent.clone();
    }
    config.persistence.history_path = cli.history.clone();
    config.validate()?;
    Ok(config)
}

fn print_podcasts(export: &Export) {
    for (n, podcast) in export.podcasts.iter().enumerate() {
        println!(
            "{:>3}. {} ({} played)",
            n + 1,
            podcast.feed.title,
            podcast.episodes.len()
        );
    }
}

async fn prompt_selection(export: &Export) -> Result<PodcastSelection> {
    print_podcasts(export);

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout
            .write_all(b"Podcasts to download (numbers separated by commas, or 'all'): ")
            .await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            return Err(Error::config("podcast", "no selection entered"));
        };
        match line.parse::<PodcastSelection>() {
            Ok(selection) => return Ok(selection),
            Err(e) => eprintln!("{}", e),
        }
    }
}

fn print_summary(summary: &RunSummary) {
    for (report, reason) in summary.failures() {
        eprintln!("failed: {} / {}: {}", report.podcast, report.title, reason);
    }
    println!(
        "{} downloaded, {} skipped, {} failed",
        summary.downloaded, summary.skipped, summary.failed
    );
}
