//! Page collection: drives a [`PageDecoder`] to completion.
//!
//! The stream is best-effort. A malformed record is logged and skipped, a
//! broken stream keeps whatever was decoded before it broke, and a source that
//! cannot be opened at all yields zero pages unless the caller asked for
//! [`FetchPolicy::Strict`].

use std::io::{BufRead, BufReader};

use reqwest::Client;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use pagestream_shared::{PageStreamError, Result, SourceId};
use pagestream_source::{FetchOptions, Page, PageDecoder, SourceFs, fetch};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What to do when the source stream cannot be established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Log the error and continue with zero pages.
    #[default]
    Degrade,
    /// Return the error to the caller.
    Strict,
}

/// Options for [`load_pages`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub fetch: FetchOptions,
    pub policy: FetchPolicy,
}

/// Pages decoded from one stream, in stream order.
#[derive(Debug, Default)]
pub struct PageCollection {
    /// Successfully decoded pages. Duplicate paths are kept.
    pub pages: Vec<Page>,
    /// Records that failed to decode.
    pub skipped: usize,
    /// Set when the underlying stream failed part-way through.
    pub interrupted: Option<PageStreamError>,
    /// Set when collection stopped because the token was cancelled.
    pub cancelled: bool,
}

impl PageCollection {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn into_pages(self) -> Vec<Page> {
        self.pages
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Decode every record the decoder yields.
///
/// Runs synchronously; `cancel` is checked between records and once more
/// when the stream ends.
pub fn collect<R: BufRead>(
    mut decoder: PageDecoder<R>,
    cancel: &CancellationToken,
) -> PageCollection {
    let mut collection = PageCollection::default();

    while let Some(item) = decoder.decode_next() {
        match item {
            Ok(page) => collection.pages.push(page),
            Err(e @ PageStreamError::Decode { .. }) => {
                warn!(error = %e, "parser error in page stream, skipping record");
                collection.skipped += 1;
            }
            Err(e) => {
                error!(
                    error = %e,
                    decoded = collection.pages.len(),
                    "page stream interrupted"
                );
                collection.interrupted = Some(e);
                break;
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    // The token may fire while the decoder waits between records, in which
    // case the stream ends without another record being seen.
    if cancel.is_cancelled() {
        warn!(decoded = collection.pages.len(), "page stream cancelled");
        collection.cancelled = true;
    }

    collection
}

/// Fetch `source` and collect its pages.
///
/// Decoding runs on a blocking thread so the decode loop can pull from the
/// stream synchronously.
#[instrument(skip_all, fields(source = %source))]
pub async fn load_pages(
    source: &SourceId,
    client: &Client,
    fs: &dyn SourceFs,
    opts: &LoadOptions,
) -> Result<PageCollection> {
    let stream = match fetch(source, client, fs, &opts.fetch).await {
        Ok(Some(stream)) => stream,
        Ok(None) => return Ok(PageCollection::default()),
        Err(e) => return degrade(source, e, opts.policy),
    };

    info!("generating files from page stream");

    let reader = BufReader::new(SyncIoBridge::new(stream));
    let cancel = opts.fetch.cancel.clone();
    let joined =
        tokio::task::spawn_blocking(move || collect(PageDecoder::new(reader), &cancel)).await;

    let mut collection = match joined {
        Ok(collection) => collection,
        Err(e) => {
            let err = PageStreamError::fetch(format!("page stream decoder task failed: {e}"));
            return degrade(source, err, opts.policy);
        }
    };

    if opts.policy == FetchPolicy::Strict {
        if collection.cancelled {
            return Err(PageStreamError::Cancelled {
                source_id: source.to_string(),
            });
        }
        if let Some(e) = collection.interrupted.take() {
            return Err(e);
        }
    }

    info!(
        pages = collection.len(),
        skipped = collection.skipped,
        "generated {} file(s) from page stream",
        collection.len()
    );

    Ok(collection)
}

fn degrade(source: &SourceId, err: PageStreamError, policy: FetchPolicy) -> Result<PageCollection> {
    match policy {
        FetchPolicy::Strict => Err(err),
        FetchPolicy::Degrade => {
            error!(
                source = %source,
                error = %err,
                "failed to load page stream, continuing without generated pages"
            );
            Ok(PageCollection::default())
        }
    }
}
