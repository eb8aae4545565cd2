//! Collection, merging, and materialization of page streams.
//!
//! This crate ties the source crate's fetch and decode steps into end-to-end
//! workflows: collect pages from a stream, merge them with filesystem-backed
//! files, and write the merged set to disk.

pub mod collector;
pub mod materialize;
pub mod merge;
pub mod pipeline;

pub use collector::{FetchPolicy, LoadOptions, PageCollection, collect, load_pages};
pub use materialize::{WriteSummary, write_files};
pub use merge::{
    DirectorySource, FileContent, FileSource, SourceFile, SourceFiles, StaticFiles, merge,
};
pub use pipeline::{MergeConfig, MergeResult, ProgressReporter, SilentProgress, merge_source};
