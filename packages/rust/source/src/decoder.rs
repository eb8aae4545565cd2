//! Incremental decoding of a JSON page stream.
//!
//! The stream may be a sequence of concatenated or whitespace-separated JSON
//! objects, a single top-level array, or a mix of both. Values are framed one
//! at a time by tracking bracket depth and string state, so only the record
//! currently being decoded is held in memory. Because framing happens before
//! parsing, a record that fails to decode does not poison the rest of the
//! stream: the decoder reports it and moves on to the next value.

use std::io::{self, BufRead};

use pagestream_shared::{PageStreamError, Result};

use crate::page::{Page, PageRecord};

// ---------------------------------------------------------------------------
// Framer
// ---------------------------------------------------------------------------

/// Splits a byte stream into raw top-level JSON values.
struct Framer<R> {
    reader: R,
    /// Inside a top-level `[ ... ]`.
    in_array: bool,
}

impl<R: BufRead> Framer<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            in_array: false,
        }
    }

    fn peek(&mut self) -> io::Result<Option<u8>> {
        loop {
            match self.reader.fill_buf() {
                Ok(buf) => return Ok(buf.first().copied()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn bump(&mut self) {
        self.reader.consume(1);
    }

    /// Next raw value, or `None` at a clean end of stream.
    fn next_value(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let Some(byte) = self.peek()? else {
                return Ok(None);
            };
            match byte {
                b if b.is_ascii_whitespace() => self.bump(),
                b',' => self.bump(),
                b'[' if !self.in_array => {
                    self.bump();
                    self.in_array = true;
                }
                b']' if self.in_array => {
                    self.bump();
                    self.in_array = false;
                }
                _ => return self.read_value().map(Some),
            }
        }
    }

    /// Read one value starting at the current byte.
    ///
    /// Objects and arrays end when their nesting closes, strings at their
    /// closing quote, and bare scalars at the next delimiter. A value cut off
    /// by end of stream is returned as-is and fails to decode.
    ///
    /// Two shapes mark a value as cut short, and framing stops before them so
    /// the next record is read on its own: a raw line break inside a string,
    /// and a `{` where the grammar does not allow one (an object may only open
    /// after `:` inside an object, or after `[` or `,` inside an array).
    fn read_value(&mut self) -> io::Result<Vec<u8>> {
        let mut value = Vec::new();
        let mut open: Vec<u8> = Vec::new();
        let mut last = 0u8;
        let mut in_string = false;
        let mut escaped = false;

        while let Some(byte) = self.peek()? {
            if in_string {
                if byte == b'\n' {
                    break;
                }
                self.bump();
                value.push(byte);
                if escaped {
                    escaped = false;
                } else if byte == b'\\' {
                    escaped = true;
                } else if byte == b'"' {
                    in_string = false;
                    last = byte;
                    if open.is_empty() {
                        break;
                    }
                }
                continue;
            }

            if open.is_empty() && !value.is_empty() && is_delimiter(byte) {
                break;
            }
            if byte == b'{' && !object_may_open(open.last().copied(), last) {
                break;
            }

            self.bump();
            value.push(byte);
            if !byte.is_ascii_whitespace() {
                last = byte;
            }

            match byte {
                b'"' => in_string = true,
                b'{' | b'[' => open.push(byte),
                b'}' | b']' => {
                    open.pop();
                    if open.is_empty() {
                        break;
                    }
                }
                _ => {}
            }
        }

        Ok(value)
    }
}

fn object_may_open(container: Option<u8>, last: u8) -> bool {
    match container {
        Some(b'{') => last == b':',
        Some(b'[') => matches!(last, b'[' | b','),
        _ => true,
    }
}

fn is_delimiter(byte: u8) -> bool {
    byte.is_ascii_whitespace() || matches!(byte, b',' | b'[' | b']' | b'{' | b'}' | b'"')
}

// ---------------------------------------------------------------------------
// PageDecoder
// ---------------------------------------------------------------------------

/// Pull-based decoder yielding one [`Page`] per JSON record.
///
/// `decode_next` returns `None` once the stream is exhausted,
/// `Some(Err(Decode))` for a record that could not be decoded (decoding can
/// continue), and `Some(Err(Fetch))` once if the underlying reader fails,
/// after which the decoder is finished.
pub struct PageDecoder<R> {
    framer: Option<Framer<R>>,
    records: usize,
}

impl<R: BufRead> PageDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            framer: Some(Framer::new(reader)),
            records: 0,
        }
    }

    /// A decoder over an optional stream; `None` decodes nothing.
    pub fn from_optional(reader: Option<R>) -> Self {
        match reader {
            Some(reader) => Self::new(reader),
            None => Self::empty(),
        }
    }

    /// Number of records framed so far, malformed ones included.
    pub fn records_seen(&self) -> usize {
        self.records
    }

    pub fn is_done(&self) -> bool {
        self.framer.is_none()
    }

    pub fn decode_next(&mut self) -> Option<Result<Page>> {
        let framer = self.framer.as_mut()?;

        let raw = match framer.next_value() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.framer = None;
                return None;
            }
            Err(e) => {
                self.framer = None;
                return Some(Err(read_failure(e, self.records)));
            }
        };

        let record = self.records;
        self.records += 1;

        Some(
            serde_json::from_slice::<PageRecord>(&raw)
                .map(Page::from)
                .map_err(|e| PageStreamError::Decode {
                    record,
                    message: e.to_string(),
                }),
        )
    }
}

/// Map a reader failure to the error that ends the stream.
///
/// Sources that stop a body early (deadline, cancellation) wrap a
/// [`PageStreamError`] in the `io::Error`; that error is surfaced as-is.
fn read_failure(e: io::Error, records: usize) -> PageStreamError {
    let message = format!("stream read failed after {records} records: {e}");
    match e.into_inner().map(|inner| inner.downcast::<PageStreamError>()) {
        Some(Ok(err)) => *err,
        _ => PageStreamError::fetch(message),
    }
}

impl<R> PageDecoder<R> {
    /// A decoder with no stream behind it. It is done immediately.
    pub fn empty() -> Self {
        Self {
            framer: None,
            records: 0,
        }
    }
}

impl<R: BufRead> Iterator for PageDecoder<R> {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}
