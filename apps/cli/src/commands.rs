//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use pagestream_core::{
    MergeConfig, MergeResult, ProgressReporter, SilentProgress, merge_source, write_files,
};
use pagestream_shared::{AppConfig, init_config, load_config, load_config_from};
use pagestream_source::build_client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PageStream: merge a JSON page stream with your content files.
#[derive(Parser)]
#[command(
    name = "pagestream",
    version,
    about = "Fetch a JSON stream of pages and merge it with filesystem content.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Read configuration from this file instead of ~/.pagestream/pagestream.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// List the merged file set without writing anything.
    Files {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Merge the page stream with content files and write the result.
    Build {
        #[command(flatten)]
        source: SourceArgs,

        /// Output directory (defaults to `output.dir` from config).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags that override the `[source]` config section.
#[derive(Args)]
pub(crate) struct SourceArgs {
    /// Page stream source: a URL, a path under the content directory, or empty.
    #[arg(short, long, env = "PAGESTREAM_SOURCE_URL")]
    source: Option<String>,

    /// Root for local sources and for content files.
    #[arg(long, env = "PAGESTREAM_CONTENT_DIR")]
    content_dir: Option<String>,

    /// Remote fetch deadline in seconds (0 disables it).
    #[arg(long)]
    timeout: Option<u64>,

    /// Fail instead of continuing without pages when the source is unavailable.
    #[arg(long)]
    strict: bool,

    /// Leave out the files under the content directory.
    #[arg(long)]
    pages_only: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pagestream=info",
        1 => "pagestream=debug",
        _ => "pagestream=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Files { source } => cmd_files(config_path, &source).await,
        Command::Build { source, out } => cmd_build(config_path, &source, out).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_files(config_path: Option<&Path>, args: &SourceArgs) -> Result<()> {
    let config = resolve_config(config_path, args)?;
    let result = run_merge(&config, args, &SilentProgress).await?;

    for file in result.files.files().iter() {
        let origin = if file.is_generated() { "page" } else { "file" };
        println!("{origin}  {}", file.path());
    }

    Ok(())
}

async fn cmd_build(
    config_path: Option<&Path>,
    args: &SourceArgs,
    out: Option<PathBuf>,
) -> Result<()> {
    let config = resolve_config(config_path, args)?;
    let out_dir = out.unwrap_or_else(|| PathBuf::from(&config.output.dir));

    let reporter = CliProgress::new();
    let result = reporter.track(run_merge(&config, args, &reporter)).await?;

    let files = result.files.files();
    let summary = write_files(&files, &out_dir)?;

    // Print summary
    println!();
    println!("  Build complete!");
    println!("  Pages:      {}", result.pages_generated);
    println!("  Skipped:    {}", result.records_skipped);
    println!("  Files:      {}", files.len());
    println!("  Written:    {}", summary.written);
    println!("  Unchanged:  {}", summary.unchanged);
    println!("  Overridden: {}", summary.overridden);
    if summary.rejected > 0 {
        println!("  Rejected:   {}", summary.rejected);
    }
    println!("  Output:     {}", out_dir.display());
    println!("  Time:       {:.1}s", result.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = read_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_config(config_path: Option<&Path>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Config file values with command-line overrides applied.
fn resolve_config(config_path: Option<&Path>, args: &SourceArgs) -> Result<AppConfig> {
    let mut config = read_config(config_path)?;
    if let Some(source) = &args.source {
        config.source.url = source.clone();
    }
    if let Some(dir) = &args.content_dir {
        config.source.content_dir = dir.clone();
    }
    if let Some(timeout) = args.timeout {
        config.source.timeout_secs = timeout;
    }
    if args.strict {
        config.source.strict = true;
    }
    Ok(config)
}

async fn run_merge(
    config: &AppConfig,
    args: &SourceArgs,
    reporter: &dyn ProgressReporter,
) -> Result<MergeResult> {
    let merge_config = MergeConfig::from(config);
    let client = build_client(merge_config.load.fetch.timeout)?;
    let external = (!args.pages_only).then(|| merge_config.content_files());

    info!(
        source = %merge_config.source,
        content_dir = %merge_config.content_dir.display(),
        "merging page stream"
    );

    let cancel = merge_config.load.fetch.cancel.clone();
    let guard = cancel_on_ctrl_c(cancel);

    let result = merge_source(
        &merge_config,
        &client,
        &merge_config.local_fs(),
        external,
        reporter,
    )
    .await;
    guard.abort();

    let result = result?;
    if result.truncated {
        warn!("page stream was cut short; output is partial");
    }
    Ok(result)
}

fn cancel_on_ctrl_c(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling page stream");
            cancel.cancel();
        }
    })
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let progress = Self::from_bar(ProgressBar::new_spinner());
        progress.spinner.enable_steady_tick(Duration::from_millis(80));
        progress
    }

    fn from_bar(spinner: ProgressBar) -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        Self { spinner }
    }

    /// Run `work`, clearing the spinner if it fails.
    ///
    /// On success the pipeline clears it through [`ProgressReporter::done`].
    async fn track<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        let result = work.await;
        if result.is_err() {
            self.spinner.finish_and_clear();
        }
        result
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn pages_loaded(&self, count: usize, skipped: usize) {
        self.spinner
            .set_message(format!("Loaded {count} pages ({skipped} skipped)"));
    }

    fn done(&self, _result: &MergeResult) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::eyre::eyre;

    use super::*;

    #[tokio::test]
    async fn failed_merge_clears_the_spinner() {
        let progress = CliProgress::from_bar(ProgressBar::hidden());
        progress.phase("Fetching page stream");

        let result: Result<()> = progress.track(async { Err(eyre!("source unavailable")) }).await;

        assert!(result.is_err());
        assert!(progress.spinner.is_finished());
    }

    #[tokio::test]
    async fn successful_work_leaves_the_spinner_to_the_pipeline() {
        let progress = CliProgress::from_bar(ProgressBar::hidden());
        let value = progress.track(async { Ok(3) }).await.unwrap();

        assert_eq!(value, 3);
        assert!(!progress.spinner.is_finished());
    }
}
