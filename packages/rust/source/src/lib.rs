//! Page stream sources: fetching, incremental decoding, and page descriptors.
//!
//! This crate provides:
//! - [`fetch`]: opens a remote (HTTP) or local page stream for a [`SourceId`]
//! - [`decoder`]: pulls [`Page`]s out of a byte stream one record at a time
//! - [`page`]: the page descriptor and lexical path cleaning
//!
//! [`SourceId`]: pagestream_shared::SourceId

pub mod decoder;
pub mod fetch;
pub mod page;

pub use decoder::PageDecoder;
pub use fetch::{ByteStream, FetchOptions, MemFs, OsFs, SourceFs, build_client, fetch};
pub use page::{Page, PageRecord, SharedText, clean_path};
