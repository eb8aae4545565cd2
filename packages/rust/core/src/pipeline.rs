//! End-to-end merge pipeline: source → fetch → decode → collect → merge.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::{info, instrument, warn};

use pagestream_shared::{AppConfig, Result, SourceId};
use pagestream_source::{FetchOptions, OsFs, SourceFs};

use crate::collector::{FetchPolicy, LoadOptions, load_pages};
use crate::merge::{DirectorySource, FileSource, SourceFiles};

/// Configuration for [`merge_source`].
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Where the page stream comes from.
    pub source: SourceId,
    /// Root for local sources and for filesystem-backed files.
    pub content_dir: PathBuf,
    /// Fetch deadline, cancellation and failure policy.
    pub load: LoadOptions,
}

impl MergeConfig {
    pub fn new(source: SourceId, content_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            content_dir: content_dir.into(),
            load: LoadOptions::default(),
        }
    }

    /// Filesystem for resolving local sources.
    pub fn local_fs(&self) -> OsFs {
        OsFs::new(&self.content_dir)
    }

    /// The files already present under the content directory.
    pub fn content_files(&self) -> Arc<dyn FileSource> {
        Arc::new(DirectorySource::new(&self.content_dir))
    }
}

impl From<&AppConfig> for MergeConfig {
    fn from(config: &AppConfig) -> Self {
        let timeout = (config.source.timeout_secs > 0)
            .then(|| Duration::from_secs(config.source.timeout_secs));
        let policy = if config.source.strict {
            FetchPolicy::Strict
        } else {
            FetchPolicy::Degrade
        };

        Self {
            source: SourceId::parse(&config.source.url),
            content_dir: PathBuf::from(&config.source.content_dir),
            load: LoadOptions {
                fetch: FetchOptions {
                    timeout,
                    ..FetchOptions::default()
                },
                policy,
            },
        }
    }
}

/// Result of [`merge_source`].
#[derive(Debug)]
pub struct MergeResult {
    /// Generated pages merged with the external files.
    pub files: SourceFiles,
    /// Pages decoded from the stream.
    pub pages_generated: usize,
    /// Records that failed to decode.
    pub records_skipped: usize,
    /// The stream ended early, by failure or cancellation.
    pub truncated: bool,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the stream has been collected.
    fn pages_loaded(&self, count: usize, skipped: usize);
    /// Called when the pipeline completes.
    fn done(&self, result: &MergeResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn pages_loaded(&self, _count: usize, _skipped: usize) {}
    fn done(&self, _result: &MergeResult) {}
}

/// Load the page stream named by `config.source` and merge it with `external`.
///
/// `fs` resolves local sources. Under [`FetchPolicy::Degrade`] a source that
/// cannot be fetched contributes zero pages and the external files still
/// come through.
#[instrument(skip_all, fields(source = %config.source))]
pub async fn merge_source(
    config: &MergeConfig,
    client: &Client,
    fs: &dyn SourceFs,
    external: Option<Arc<dyn FileSource>>,
    progress: &dyn ProgressReporter,
) -> Result<MergeResult> {
    let start = Instant::now();

    progress.phase("Fetching page stream");
    let collection = load_pages(&config.source, client, fs, &config.load).await?;
    progress.pages_loaded(collection.len(), collection.skipped);

    let truncated = collection.cancelled || collection.interrupted.is_some();
    if truncated {
        warn!(
            pages = collection.len(),
            "page stream ended early, merging the pages decoded so far"
        );
    }

    progress.phase("Merging files");
    let pages_generated = collection.len();
    let records_skipped = collection.skipped;
    let files = crate::merge::merge(collection.into_pages(), external);

    let result = MergeResult {
        files,
        pages_generated,
        records_skipped,
        truncated,
        elapsed: start.elapsed(),
    };

    progress.done(&result);

    info!(
        pages = result.pages_generated,
        skipped = result.records_skipped,
        elapsed_ms = result.elapsed.as_millis(),
        "merge pipeline complete"
    );

    Ok(result)
}
