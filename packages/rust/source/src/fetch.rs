//! Content fetching: turns a [`SourceId`] into a byte stream.
//!
//! Remote identifiers are fetched with an injected `reqwest::Client` and the
//! response body is streamed, never buffered whole. Local identifiers go
//! through a [`SourceFs`] so the filesystem can be swapped out (tests use
//! [`MemFs`]). An empty identifier yields no stream and no error.

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use pagestream_shared::{PageStreamError, Result, SourceId};

/// User-Agent string for page stream requests.
const USER_AGENT: &str = concat!("PageStream/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects followed for a source URL.
const MAX_REDIRECTS: usize = 5;

/// An owned, readable page stream. Dropping it releases the connection or
/// file handle behind it.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

// ---------------------------------------------------------------------------
// Filesystem abstraction
// ---------------------------------------------------------------------------

/// Read-only filesystem used to resolve local source identifiers.
pub trait SourceFs: Send + Sync {
    /// Whether `path` names an existing file.
    fn exists(&self, path: &Path) -> bool;
    /// Open `path` for streaming reads.
    fn open(&self, path: &Path) -> io::Result<ByteStream>;
}

/// The host filesystem, with relative paths resolved against `root`.
#[derive(Debug, Clone)]
pub struct OsFs {
    root: PathBuf,
}

impl OsFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative paths are joined onto the root; absolute paths pass through.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl SourceFs for OsFs {
    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).is_file()
    }

    fn open(&self, path: &Path) -> io::Result<ByteStream> {
        let file = std::fs::File::open(self.resolve(path))?;
        Ok(Box::pin(tokio::fs::File::from_std(file)))
    }
}

/// An in-memory filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemFs {
    files: HashMap<PathBuf, Arc<[u8]>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, contents: impl AsRef<[u8]>) {
        self.files.insert(path.into(), Arc::from(contents.as_ref()));
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl AsRef<[u8]>) -> Self {
        self.insert(path, contents);
        self
    }
}

impl SourceFs for MemFs {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn open(&self, path: &Path) -> io::Result<ByteStream> {
        let contents = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))?;
        Ok(Box::pin(Cursor::new(contents)))
    }
}

// ---------------------------------------------------------------------------
// Fetch options
// ---------------------------------------------------------------------------

/// Deadline and cancellation for a single fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Deadline for the remote request to produce a response.
    pub timeout: Option<Duration>,
    /// Cancels the request, and ends the body stream early if already open.
    pub cancel: CancellationToken,
}

impl FetchOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Open the page stream named by `source`.
///
/// Returns `Ok(None)` for an empty identifier. Remote failures map to
/// `Fetch`, `TimedOut`, or `Cancelled`; a missing local file maps to
/// `NotFound`.
#[instrument(skip_all, fields(source = %source))]
pub async fn fetch(
    source: &SourceId,
    client: &Client,
    fs: &dyn SourceFs,
    opts: &FetchOptions,
) -> Result<Option<ByteStream>> {
    match source {
        SourceId::Empty => {
            debug!("no page stream source configured");
            Ok(None)
        }
        SourceId::Remote(url) => fetch_remote(url, client, opts).await.map(Some),
        SourceId::Local(path) => open_local(Path::new(path), fs).map(Some),
    }
}

/// Build a reqwest client with the settings PageStream uses by default.
pub fn build_client(timeout: Option<Duration>) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));
    if let Some(timeout) = timeout {
        builder = builder.connect_timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| PageStreamError::fetch(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn fetch_remote(raw: &str, client: &Client, opts: &FetchOptions) -> Result<ByteStream> {
    let url = Url::parse(raw)
        .map_err(|e| PageStreamError::fetch(format!("invalid source URL '{raw}': {e}")))?;

    info!(%url, "downloading page stream");

    let deadline = opts.timeout.map(|after| (Instant::now() + after, after));

    let response = tokio::select! {
        biased;
        () = opts.cancel.cancelled() => {
            return Err(PageStreamError::Cancelled {
                source_id: raw.to_string(),
            });
        }
        response = send_with_deadline(client, &url, deadline) => response?,
    };

    let status = response.status();
    if !status.is_success() {
        return Err(PageStreamError::fetch(format!("{url}: HTTP {status}")));
    }

    debug!(%status, content_length = ?response.content_length(), "page stream response");

    let guard = BodyGuard {
        cancel: opts.cancel.clone(),
        deadline,
        source_id: raw.to_string(),
    };
    let body = guarded_body(Box::pin(response.bytes_stream()), guard);

    Ok(Box::pin(StreamReader::new(body)))
}

/// Stops a response body at the fetch deadline or on cancellation.
///
/// Either one ends the body with an `io::Error` wrapping `TimedOut` or
/// `Cancelled`, so a reader never mistakes it for a clean end of stream.
struct BodyGuard {
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
    source_id: String,
}

impl BodyGuard {
    async fn next_chunk<S, B>(&self, chunks: &mut S) -> Option<io::Result<B>>
    where
        S: Stream<Item = reqwest::Result<B>> + Unpin,
    {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some((at, _)) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Some(Err(self.cancelled())),
            () = expired => Some(Err(self.timed_out())),
            chunk = chunks.next() => chunk.map(|r| r.map_err(io::Error::other)),
        }
    }

    fn cancelled(&self) -> io::Error {
        io::Error::other(PageStreamError::Cancelled {
            source_id: self.source_id.clone(),
        })
    }

    fn timed_out(&self) -> io::Error {
        io::Error::other(PageStreamError::TimedOut {
            source_id: self.source_id.clone(),
            after: self.deadline.map(|(_, after)| after).unwrap_or_default(),
        })
    }
}

fn guarded_body<S, B>(
    chunks: S,
    guard: BodyGuard,
) -> impl Stream<Item = io::Result<B>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<B>> + Send + Unpin + 'static,
    B: Send + 'static,
{
    futures::stream::unfold(Some((chunks, guard)), |state| async move {
        let (mut chunks, guard) = state?;
        match guard.next_chunk(&mut chunks).await {
            Some(Ok(chunk)) => Some((Ok(chunk), Some((chunks, guard)))),
            Some(Err(e)) => Some((Err(e), None)),
            None => None,
        }
    })
}

async fn send_with_deadline(
    client: &Client,
    url: &Url,
    deadline: Option<(Instant, Duration)>,
) -> Result<Response> {
    let request = client.get(url.clone()).send();
    let sent = match deadline {
        Some((at, after)) => tokio::time::timeout_at(at, request).await.map_err(|_| {
            PageStreamError::TimedOut {
                source_id: url.to_string(),
                after,
            }
        })?,
        None => request.await,
    };

    sent.map_err(|e| match deadline {
        Some((_, after)) if e.is_timeout() => PageStreamError::TimedOut {
            source_id: url.to_string(),
            after,
        },
        _ => PageStreamError::fetch(format!("{url}: {e}")),
    })
}

fn open_local(path: &Path, fs: &dyn SourceFs) -> Result<ByteStream> {
    if !fs.exists(path) {
        return Err(PageStreamError::NotFound {
            path: path.to_path_buf(),
        });
    }

    info!(path = %path.display(), "opening local page stream");
    fs.open(path).map_err(|e| PageStreamError::io(path, e))
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    const STREAM: &str = r#"{"Path":"a.md","Content":"A"}{"Path":"b.md","Content":"B"}"#;

    async fn read_all(stream: ByteStream) -> String {
        let mut stream = stream;
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn empty_source_yields_nothing() {
        let client = Client::new();
        let stream = fetch(&SourceId::Empty, &client, &MemFs::new(), &FetchOptions::default())
            .await
            .unwrap();
        assert!(stream.is_none());
    }

    #[tokio::test]
    async fn local_source_streams_file_contents() {
        let fs = MemFs::new().with_file("i/am/a/local/file/stream.json", STREAM);
        let source = SourceId::parse("i/am/a/local/file/stream.json");

        let stream = fetch(&source, &Client::new(), &fs, &FetchOptions::default())
            .await
            .unwrap()
            .expect("stream");
        assert_eq!(read_all(stream).await, STREAM);
    }

    #[tokio::test]
    async fn missing_local_source_is_not_found() {
        let source = SourceId::parse("nope/stream.json");
        let err = fetch(&source, &Client::new(), &MemFs::new(), &FetchOptions::default())
            .await
            .err()
            .expect("error");
        assert!(matches!(err, PageStreamError::NotFound { .. }));
    }

    #[tokio::test]
    async fn os_fs_resolves_against_root() {
        let root = std::env::temp_dir().join(format!("ps-osfs-test-{}", std::process::id()));
        std::fs::create_dir_all(root.join("data")).unwrap();
        std::fs::write(root.join("data/pages.json"), STREAM).unwrap();

        let fs = OsFs::new(&root);
        assert!(fs.exists(Path::new("data/pages.json")));
        assert!(!fs.exists(Path::new("data")));

        let source = SourceId::parse("data/pages.json");
        let stream = fetch(&source, &Client::new(), &fs, &FetchOptions::default())
            .await
            .unwrap()
            .expect("stream");
        assert_eq!(read_all(stream).await, STREAM);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn remote_source_streams_body() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/file/stream.json"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(STREAM))
            .mount(&server)
            .await;

        let source = SourceId::parse(&format!("{}/file/stream.json", server.uri()));
        let stream = fetch(&source, &Client::new(), &MemFs::new(), &FetchOptions::default())
            .await
            .unwrap()
            .expect("stream");
        assert_eq!(read_all(stream).await, STREAM);
    }

    #[tokio::test]
    async fn remote_error_status_is_fetch_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = SourceId::parse(&format!("{}/missing.json", server.uri()));
        let err = fetch(&source, &Client::new(), &MemFs::new(), &FetchOptions::default())
            .await
            .err()
            .expect("error");
        assert!(matches!(err, PageStreamError::Fetch(_)));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn unreachable_host_is_fetch_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let source = SourceId::parse("http://127.0.0.1:9/stream.json");
        let err = fetch(&source, &Client::new(), &MemFs::new(), &FetchOptions::default())
            .await
            .err()
            .expect("error");
        assert!(matches!(err, PageStreamError::Fetch(_)));
    }

    #[tokio::test]
    async fn slow_remote_times_out() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string(STREAM)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let source = SourceId::parse(&format!("{}/slow.json", server.uri()));
        let opts = FetchOptions::default().with_timeout(Duration::from_millis(100));
        let err = fetch(&source, &Client::new(), &MemFs::new(), &opts)
            .await
            .err()
            .expect("error");
        assert!(matches!(err, PageStreamError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_fetch() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string(STREAM)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let opts = FetchOptions::default().with_cancel(cancel.clone());
        let source = SourceId::parse(&format!("{}/slow.json", server.uri()));

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let err = fetch(&source, &Client::new(), &MemFs::new(), &opts)
            .await
            .err()
            .expect("error");
        assert!(matches!(err, PageStreamError::Cancelled { .. }));
        canceller.await.unwrap();
    }

    /// Serve one chunked record, then hold the connection open without
    /// sending anything else.
    async fn stalled_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let record = r#"{"Path":"a.md","Content":"A"}"#;
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                 transfer-encoding: chunked\r\n\r\n{:x}\r\n{record}\r\n",
                record.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });
        format!("http://{addr}/stream.json")
    }

    fn stream_error(err: io::Error) -> PageStreamError {
        *err.into_inner()
            .expect("wrapped error")
            .downcast::<PageStreamError>()
            .expect("page stream error")
    }

    #[tokio::test]
    async fn deadline_covers_a_stalled_body() {
        let source = SourceId::parse(&stalled_server().await);
        let opts = FetchOptions::default().with_timeout(Duration::from_millis(200));
        let mut stream = fetch(&source, &Client::new(), &MemFs::new(), &opts)
            .await
            .unwrap()
            .expect("stream");

        let mut out = String::new();
        let err = tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut out))
            .await
            .expect("deadline should end the body")
            .unwrap_err();
        assert!(matches!(stream_error(err), PageStreamError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn cancellation_ends_an_open_body_with_an_error() {
        let source = SourceId::parse(&stalled_server().await);
        let cancel = CancellationToken::new();
        let opts = FetchOptions::default().with_cancel(cancel.clone());
        let mut stream = fetch(&source, &Client::new(), &MemFs::new(), &opts)
            .await
            .unwrap()
            .expect("stream");

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let mut out = String::new();
        let err = tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut out))
            .await
            .expect("cancellation should end the body")
            .unwrap_err();
        assert!(matches!(stream_error(err), PageStreamError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn invalid_url_is_fetch_error() {
        let source = SourceId::parse("http://");
        let err = fetch(&source, &Client::new(), &MemFs::new(), &FetchOptions::default())
            .await
            .err()
            .expect("error");
        assert!(matches!(err, PageStreamError::Fetch(_)));
    }

    #[test]
    fn default_client_builds() {
        assert!(build_client(Some(Duration::from_secs(10))).is_ok());
        assert!(build_client(None).is_ok());
    }
}
