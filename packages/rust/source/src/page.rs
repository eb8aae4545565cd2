//! Page descriptors decoded from a JSON page stream.
//!
//! A record on the wire looks like `{"Path": "...", "Content": "..."}`. Field
//! names match ASCII case-insensitively, `null` counts as an empty string, and
//! any other field is kept in [`PageRecord::extra`] instead of being dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// PageRecord (wire shape)
// ---------------------------------------------------------------------------

/// One decoded JSON record, exactly as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageRecord {
    /// Raw, un-normalized path.
    #[serde(rename = "Path")]
    pub path: String,
    /// Raw file content. May be empty.
    #[serde(rename = "Content")]
    pub content: String,
    /// Fields other than `Path` and `Content`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl<'de> Deserialize<'de> for PageRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(RecordVisitor)
    }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = PageRecord;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a page record object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<PageRecord, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut record = PageRecord::default();
        while let Some(key) = map.next_key::<String>()? {
            if key.eq_ignore_ascii_case("path") {
                record.path = map.next_value::<Option<String>>()?.unwrap_or_default();
            } else if key.eq_ignore_ascii_case("content") {
                record.content = map.next_value::<Option<String>>()?.unwrap_or_default();
            } else {
                let value = map.next_value::<Value>()?;
                record.extra.insert(key, value);
            }
        }
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// SharedText
// ---------------------------------------------------------------------------

/// Immutable text shared between a page and every reader handed out for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SharedText(Arc<str>);

impl SharedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for SharedText {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<String> for SharedText {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for SharedText {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// A virtual file decoded from the page stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    raw_path: String,
    path: String,
    content: SharedText,
    extra: BTreeMap<String, Value>,
}

impl Page {
    pub fn new(path: impl Into<String>, content: impl Into<SharedText>) -> Self {
        let raw_path = path.into();
        Self {
            path: clean_path(&raw_path),
            raw_path,
            content: content.into(),
            extra: BTreeMap::new(),
        }
    }

    /// The lexically cleaned path (see [`clean_path`]).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path exactly as it appeared in the stream.
    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }

    pub fn content(&self) -> &SharedText {
        &self.content
    }

    /// A fresh reader over the content.
    ///
    /// Every call returns an independent cursor starting at byte zero.
    pub fn reader(&self) -> Cursor<SharedText> {
        Cursor::new(self.content.clone())
    }

    /// Unrecognized fields carried by the record.
    pub fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }
}

impl From<PageRecord> for Page {
    fn from(record: PageRecord) -> Self {
        Self {
            path: clean_path(&record.path),
            raw_path: record.path,
            content: SharedText::from(record.content),
            extra: record.extra,
        }
    }
}

// ---------------------------------------------------------------------------
// Path cleaning
// ---------------------------------------------------------------------------

/// Lexically clean a `/`-separated path.
///
/// Repeated separators and `.` segments are removed, `..` eliminates the
/// preceding segment, `..` directly under the root of an absolute path is
/// dropped, and leading `..` segments of a relative path are kept. An empty
/// result becomes `"."`. The filesystem is never consulted, so the result
/// depends on nothing but the input.
pub fn clean_path(raw: &str) -> String {
    let rooted = raw.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if rooted => {}
                _ => segments.push(".."),
            },
            name => segments.push(name),
        }
    }

    let joined = segments.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn json_page_path_and_content() {
        let cases = [
            (
                "./path/./to/file.md",
                "path/to/file.md",
                "A SQL query walks into a bar ...",
            ),
            (
                "/../path//to/file.md",
                "/path/to/file.md",
                "A SQL query walks again into a bar ...",
            ),
            ("./../path//to/file.md", "../path/to/file.md", ""),
        ];

        for (raw, expected, content) in cases {
            let page = Page::new(raw, content);
            assert_eq!(page.path(), expected, "raw path {raw}");
            assert_eq!(page.raw_path(), raw);

            let mut data = String::new();
            page.reader().read_to_string(&mut data).unwrap();
            assert_eq!(data, content);
        }
    }

    #[test]
    fn clean_path_edge_cases() {
        assert_eq!(clean_path(""), ".");
        assert_eq!(clean_path("."), ".");
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("//"), "/");
        assert_eq!(clean_path("a/../.."), "..");
        assert_eq!(clean_path("a/b/../../../c"), "../c");
        assert_eq!(clean_path("../../x"), "../../x");
        assert_eq!(clean_path("/a/b/../../.."), "/");
        assert_eq!(clean_path("docs/intro.md/"), "docs/intro.md");
    }

    #[test]
    fn clean_path_is_idempotent() {
        for raw in [
            "./path/./to/file.md",
            "/../path//to/file.md",
            "./../path//to/file.md",
            "a/b/../../../c",
            "",
            "/",
        ] {
            let once = clean_path(raw);
            assert_eq!(clean_path(&once), once, "raw path {raw}");
        }
    }

    #[test]
    fn readers_are_independent_and_replayable() {
        let page = Page::new("f1.md", "We go together");

        let mut first = page.reader();
        let mut head = [0u8; 5];
        first.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"We go");

        let mut second = String::new();
        page.reader().read_to_string(&mut second).unwrap();
        assert_eq!(second, "We go together");

        let mut rest = String::new();
        first.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, " together");
    }

    #[test]
    fn record_fields_are_case_insensitive() {
        let record: PageRecord =
            serde_json::from_str(r#"{"path": "a.md", "CONTENT": "body"}"#).unwrap();
        assert_eq!(record.path, "a.md");
        assert_eq!(record.content, "body");
    }

    #[test]
    fn record_keeps_unknown_fields_and_treats_null_as_empty() {
        let record: PageRecord = serde_json::from_str(
            r#"{"Path": "a.md", "Content": null, "Weight": 3, "Tags": ["x"]}"#,
        )
        .unwrap();
        assert_eq!(record.content, "");
        assert_eq!(record.extra.len(), 2);
        assert_eq!(record.extra["Weight"], serde_json::json!(3));

        let page = Page::from(record);
        assert_eq!(page.extra()["Tags"], serde_json::json!(["x"]));
    }

    #[test]
    fn last_duplicate_key_wins() {
        let record: PageRecord = serde_json::from_str(
            r#"{"Path": "a.md", "path": "b.md", "Content": "x", "content": null}"#,
        )
        .unwrap();
        assert_eq!(record.path, "b.md");
        assert_eq!(record.content, "");
    }

    #[test]
    fn record_rejects_wrong_types() {
        let err = serde_json::from_str::<PageRecord>(r#"{"Path": 42}"#).unwrap_err();
        assert!(err.is_data());

        let err = serde_json::from_str::<PageRecord>(r#""just a string""#).unwrap_err();
        assert!(err.to_string().contains("page record object"));
    }

    #[test]
    fn record_serializes_with_wire_names() {
        let record = PageRecord {
            path: "a.md".into(),
            content: "x".into(),
            extra: BTreeMap::new(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"Path":"a.md","Content":"x"}"#);
    }
}
