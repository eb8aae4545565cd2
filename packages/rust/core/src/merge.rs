//! Merging generated pages with filesystem-backed files.
//!
//! [`SourceFiles`] holds the pages decoded from a stream plus an optional
//! external [`FileSource`], and exposes their concatenation: pages first in
//! stream order, then external files in the order the source lists them.
//!
//! The merged list is built lazily and cached. Any mutation of the inputs
//! drops the cache, and the next [`SourceFiles::files`] call rebuilds it.
//! Lock order is always inputs, then cache. A rebuild runs under the inputs
//! read lock and is swapped into the cache whole, so readers see either the
//! previous list or the new one.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

use pagestream_source::{Page, SharedText, clean_path};

// ---------------------------------------------------------------------------
// SourceFile
// ---------------------------------------------------------------------------

/// Where a merged file's bytes live.
#[derive(Debug, Clone, PartialEq)]
pub enum FileContent {
    /// Held in memory, e.g. a generated page.
    Inline(SharedText),
    /// Read from disk on demand.
    Disk(PathBuf),
}

/// One entry of the merged file list.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    path: String,
    content: FileContent,
}

impl SourceFile {
    pub fn inline(path: impl AsRef<str>, content: impl Into<SharedText>) -> Self {
        Self {
            path: clean_path(path.as_ref()),
            content: FileContent::Inline(content.into()),
        }
    }

    pub fn on_disk(path: impl AsRef<str>, location: impl Into<PathBuf>) -> Self {
        Self {
            path: clean_path(path.as_ref()),
            content: FileContent::Disk(location.into()),
        }
    }

    /// Cleaned, `/`-separated logical path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &FileContent {
        &self.content
    }

    pub fn is_generated(&self) -> bool {
        matches!(self.content, FileContent::Inline(_))
    }

    /// A fresh reader positioned at the start of the content.
    pub fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.content {
            FileContent::Inline(text) => Ok(Box::new(io::Cursor::new(text.clone()))),
            FileContent::Disk(location) => Ok(Box::new(File::open(location)?)),
        }
    }

    pub fn read_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.reader()?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn read_to_string(&self) -> io::Result<String> {
        let mut buf = String::new();
        self.reader()?.read_to_string(&mut buf)?;
        Ok(buf)
    }
}

impl From<&Page> for SourceFile {
    fn from(page: &Page) -> Self {
        Self {
            path: page.path().to_string(),
            content: FileContent::Inline(page.content().clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// External file sources
// ---------------------------------------------------------------------------

/// Supplies the filesystem-backed half of the merge.
///
/// `files` is called once per rebuild and must return the same order for the
/// same underlying state.
pub trait FileSource: Send + Sync {
    fn files(&self) -> Vec<SourceFile>;
}

/// A fixed list of files.
#[derive(Debug, Clone, Default)]
pub struct StaticFiles {
    files: Vec<SourceFile>,
}

impl StaticFiles {
    pub fn new(files: Vec<SourceFile>) -> Self {
        Self { files }
    }
}

impl FileSource for StaticFiles {
    fn files(&self) -> Vec<SourceFile> {
        self.files.clone()
    }
}

/// Every regular file under a directory, sorted by path.
///
/// Hidden entries (names starting with `.`) are skipped along with anything
/// beneath them. Logical paths are relative to the root.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileSource for DirectorySource {
    fn files(&self) -> Vec<SourceFile> {
        if !self.root.is_dir() {
            debug!(root = %self.root.display(), "content directory missing, no external files");
            return Vec::new();
        }

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_hidden(entry.file_name()));

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let logical = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(SourceFile::on_disk(logical, entry.path()));
        }
        files
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}

// ---------------------------------------------------------------------------
// SourceFiles
// ---------------------------------------------------------------------------

enum CacheState {
    Unpopulated,
    Populated(Arc<[SourceFile]>),
}

struct Inputs {
    pages: Vec<Page>,
    external: Option<Arc<dyn FileSource>>,
}

/// Generated pages merged with an optional external file source.
pub struct SourceFiles {
    inputs: RwLock<Inputs>,
    cache: RwLock<CacheState>,
    rebuilds: AtomicUsize,
}

impl SourceFiles {
    pub fn new(external: Option<Arc<dyn FileSource>>) -> Self {
        Self {
            inputs: RwLock::new(Inputs {
                pages: Vec::new(),
                external,
            }),
            cache: RwLock::new(CacheState::Unpopulated),
            rebuilds: AtomicUsize::new(0),
        }
    }

    /// The merged list: pages first, then external files.
    ///
    /// Returns the cached list when it is current. Repeated calls with no
    /// mutation in between return the same allocation.
    pub fn files(&self) -> Arc<[SourceFile]> {
        if let CacheState::Populated(files) = &*self.cache.read() {
            return Arc::clone(files);
        }

        let inputs = self.inputs.read();
        let built = self.build(&inputs);

        let mut cache = self.cache.write();
        // Another reader may have rebuilt from the same inputs meanwhile.
        if let CacheState::Populated(existing) = &*cache {
            return Arc::clone(existing);
        }
        *cache = CacheState::Populated(Arc::clone(&built));
        built
    }

    /// Append pages after the ones already held.
    pub fn merge(&self, pages: impl IntoIterator<Item = Page>) {
        let mut inputs = self.inputs.write();
        let before = inputs.pages.len();
        inputs.pages.extend(pages);
        if inputs.pages.len() != before {
            self.clear_cache();
        }
    }

    /// Replace all pages.
    pub fn set_pages(&self, pages: Vec<Page>) {
        let mut inputs = self.inputs.write();
        inputs.pages = pages;
        self.clear_cache();
    }

    /// Replace the external file source.
    pub fn set_external(&self, external: Option<Arc<dyn FileSource>>) {
        let mut inputs = self.inputs.write();
        inputs.external = external;
        self.clear_cache();
    }

    /// Drop the cached list, e.g. after the external source changed on disk.
    pub fn invalidate(&self) {
        let _inputs = self.inputs.write();
        self.clear_cache();
    }

    pub fn page_count(&self) -> usize {
        self.inputs.read().pages.len()
    }

    pub fn is_cached(&self) -> bool {
        matches!(*self.cache.read(), CacheState::Populated(_))
    }

    /// How many times the merged list has been built.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds.load(Ordering::Relaxed)
    }

    // Caller holds the inputs write lock.
    fn clear_cache(&self) {
        *self.cache.write() = CacheState::Unpopulated;
    }

    fn build(&self, inputs: &Inputs) -> Arc<[SourceFile]> {
        let external = inputs
            .external
            .as_ref()
            .map(|source| source.files())
            .unwrap_or_default();

        let mut files = Vec::with_capacity(inputs.pages.len() + external.len());
        files.extend(inputs.pages.iter().map(SourceFile::from));
        files.extend(external);

        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        debug!(
            pages = inputs.pages.len(),
            total = files.len(),
            "rebuilt merged file list"
        );
        files.into()
    }
}

impl Default for SourceFiles {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for SourceFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs = self.inputs.read();
        f.debug_struct("SourceFiles")
            .field("pages", &inputs.pages.len())
            .field("external", &inputs.external.is_some())
            .field("cached", &self.is_cached())
            .finish()
    }
}

/// Combine pages with an external file source.
pub fn merge(
    pages: impl IntoIterator<Item = Page>,
    external: Option<Arc<dyn FileSource>>,
) -> SourceFiles {
    let files = SourceFiles::new(external);
    files.merge(pages);
    files
}
