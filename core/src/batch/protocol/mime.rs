//! Pull tokenizer for `multipart/mixed` batch payloads.
//!
//! Bytes are pushed in with [`MimeTokenizer::feed`] and tokens are pulled
//! out one at a time. Every pull returns `Ok(None)` when the buffered input
//! does not yet hold a complete token; nothing is consumed in that case, so
//! the caller can feed more bytes and retry.
//!
//! # Token Flow
//!
//! ```text
//! preamble            <- skipped by next_boundary
//! --batch_1           <- BoundaryLine::Delimiter { depth: 0 }
//! Content-Type: ...   <- HeaderToken::Header
//!                     <- HeaderToken::EndOfHeaders
//! GET ... HTTP/1.1    <- next_line
//! ...
//! <body bytes>        <- BodyToken::Chunk (may be split)
//!                     <- BodyToken::EndOfBody
//! --batch_1--         <- BoundaryLine::Close { depth: 0 }
//! ```
//!
//! A body ends at the CRLF preceding the innermost open boundary, per
//! RFC 2046 §5.1.1. A delimiter only counts when it is followed by optional
//! whitespace and a line break (or the end of input), or by `--` for the close
//! delimiter. The tokenizer hands a body out in chunks and only retains a tail
//! long enough to hold a split delimiter; collecting the chunks is up to the
//! caller.
//!
//! Text before the first delimiter and after a close delimiter is skipped.
//! Anything else between a body and the next delimiter is malformed.

use super::headers::parse_header_line;
use crate::batch::error::{BatchError, Result};
use bytes::{Buf, Bytes, BytesMut};

/// A recognised boundary line. `depth` 0 is the outermost boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryLine {
    Delimiter { depth: usize },
    Close { depth: usize },
    /// Input ended before another boundary line.
    EndOfStream,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderToken {
    Header(String, String),
    EndOfHeaders,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BodyToken {
    Chunk(Bytes),
    EndOfBody,
}

#[derive(Debug, Default)]
pub struct MimeTokenizer {
    buffer: BytesMut,
    eof: bool,
    boundaries: Vec<String>,
    /// No body byte has been emitted since `begin_body`.
    body_fresh: bool,
    /// The delimiter was found after the last emitted chunk.
    body_end_pending: bool,
    /// A body just ended, so the next line must be a delimiter.
    boundary_due: bool,
}

impl MimeTokenizer {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundaries: vec![boundary.into()],
            ..Default::default()
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Marks the end of input.
    pub fn finish(&mut self) {
        self.eof = true;
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.eof
    }

    /// Input ended and every buffered byte was consumed.
    #[inline]
    pub fn at_end(&self) -> bool {
        self.eof && self.buffer.is_empty()
    }

    #[inline]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn push_boundary(&mut self, boundary: impl Into<String>) {
        self.boundaries.push(boundary.into());
    }

    pub fn pop_boundary(&mut self) -> Option<String> {
        self.boundaries.pop()
    }

    /// Number of open boundaries.
    #[inline]
    pub fn depth(&self) -> usize {
        self.boundaries.len()
    }

    /// Next line without its line break.
    ///
    /// At end of input a trailing unterminated line is returned as is; an
    /// empty buffer is an error.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        match self.take_line() {
            Some(line) => Ok(Some(String::from_utf8(line.to_vec())?)),
            None if self.at_end() => Err(BatchError::malformed("unexpected end of stream")),
            None => Ok(None),
        }
    }

    /// Skips text up to and including the next boundary line.
    ///
    /// Lines that match no open boundary are discarded as preamble or
    /// epilogue, except right after a body, where they are an error.
    pub fn next_boundary(&mut self) -> Result<Option<BoundaryLine>> {
        loop {
            let Some(line) = self.take_line() else {
                if self.at_end() {
                    return Ok(Some(BoundaryLine::EndOfStream));
                }
                return Ok(None);
            };
            if let Some(found) = self.match_boundary(&line) {
                self.boundary_due = false;
                return Ok(Some(found));
            }
            if self.boundary_due {
                return Err(BatchError::malformed(format!(
                    "expected a boundary after the body, found '{}'",
                    String::from_utf8_lossy(&line)
                )));
            }
            tracing::trace!(len = line.len(), "skipping non-boundary line");
        }
    }

    /// Next header of a header block, or the blank line closing it.
    pub fn next_header(&mut self) -> Result<Option<HeaderToken>> {
        let line = match self.take_line() {
            Some(line) => line,
            None if self.at_end() => {
                return Err(BatchError::malformed(
                    "unexpected end of stream: headers must end with a blank line",
                ))
            }
            None => return Ok(None),
        };
        if line.is_empty() {
            return Ok(Some(HeaderToken::EndOfHeaders));
        }
        let line = String::from_utf8(line.to_vec())?;
        if self.match_boundary(line.as_bytes()).is_some() {
            return Err(BatchError::malformed(format!(
                "boundary '{}' reached before the blank line ending the headers",
                line
            )));
        }
        let (name, value) = parse_header_line(&line)?;
        Ok(Some(HeaderToken::Header(name, value)))
    }

    /// Starts scanning a body terminated by the innermost boundary.
    pub fn begin_body(&mut self) {
        self.body_fresh = true;
        self.body_end_pending = false;
    }

    /// Next slice of the current body.
    ///
    /// The line break before the delimiter is consumed with the body; the
    /// delimiter line itself is left for [`next_boundary`](Self::next_boundary).
    pub fn next_body_chunk(&mut self) -> Result<Option<BodyToken>> {
        if self.body_end_pending {
            self.body_end_pending = false;
            self.boundary_due = true;
            return Ok(Some(BodyToken::EndOfBody));
        }

        let delimiter = match self.boundaries.last() {
            Some(b) => format!("--{}", b),
            None => return Err(BatchError::malformed("body outside of any multipart scope")),
        };
        let delimiter = delimiter.as_bytes();

        if self.body_fresh {
            if self.buffer.len() < delimiter.len() + 1 && !self.eof {
                if delimiter.starts_with(&self.buffer) || self.buffer.starts_with(delimiter) {
                    return Ok(None);
                }
            }
            if self.buffer.starts_with(delimiter) {
                match self.confirms_delimiter(delimiter.len()) {
                    Some(true) => {
                        self.body_fresh = false;
                        self.boundary_due = true;
                        return Ok(Some(BodyToken::EndOfBody));
                    }
                    Some(false) => {}
                    None => return Ok(None),
                }
            }
        }

        // Start of the first line that may still turn out to be a delimiter.
        let mut hold = None;
        let mut from = 0;
        while let Some(offset) = find(&self.buffer[from..], b"\n") {
            let nl = from + offset;
            let start = nl + 1;
            let end = if nl > 0 && self.buffer[nl - 1] == b'\r' { nl - 1 } else { nl };
            if self.buffer.len() < start + delimiter.len() {
                if !self.eof && delimiter.starts_with(&self.buffer[start..]) {
                    hold = Some(end);
                    break;
                }
                from = start;
                continue;
            }
            if &self.buffer[start..start + delimiter.len()] == delimiter {
                match self.confirms_delimiter(start + delimiter.len()) {
                    Some(true) => {
                        let chunk = self.buffer.split_to(end).freeze();
                        self.buffer.advance(start - end);
                        self.body_fresh = false;
                        if chunk.is_empty() {
                            self.boundary_due = true;
                            return Ok(Some(BodyToken::EndOfBody));
                        }
                        self.body_end_pending = true;
                        return Ok(Some(BodyToken::Chunk(chunk)));
                    }
                    Some(false) => {}
                    None => {
                        hold = Some(end);
                        break;
                    }
                }
            }
            from = start;
        }

        if self.eof {
            if self.buffer.is_empty() {
                return Err(BatchError::malformed(
                    "unexpected end of stream: body is not terminated by a boundary",
                ));
            }
            let rest = self.buffer.split().freeze();
            return Err(BatchError::malformed(format!(
                "unexpected end of stream: {} body bytes are not terminated by a boundary",
                rest.len()
            )));
        }

        let safe = match hold {
            Some(end) => end,
            None => self.buffer.len().saturating_sub(delimiter.len() + 3),
        };
        if safe == 0 {
            return Ok(None);
        }
        self.body_fresh = false;
        Ok(Some(BodyToken::Chunk(self.buffer.split_to(safe).freeze())))
    }

    /// Whether the bytes from `pos` complete a delimiter line: `None` if the
    /// line is not fully buffered yet.
    ///
    /// Accepts `[--] *LWSP (CRLF | LF | end of input)`.
    fn confirms_delimiter(&self, pos: usize) -> Option<bool> {
        let mut rest = self.buffer.get(pos..).unwrap_or_default();
        if let Some(after) = rest.strip_prefix(b"--") {
            rest = after;
        } else if rest == b"-" && !self.eof {
            return None;
        }
        for b in rest {
            match b {
                b' ' | b'\t' => continue,
                b'\r' | b'\n' => return Some(true),
                _ => return Some(false),
            }
        }
        if self.eof {
            Some(true)
        } else {
            None
        }
    }

    fn take_line(&mut self) -> Option<Bytes> {
        match find(&self.buffer, b"\n") {
            Some(pos) => {
                let mut line = self.buffer.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                Some(line.freeze())
            }
            None if self.eof && !self.buffer.is_empty() => Some(self.buffer.split().freeze()),
            None => None,
        }
    }

    fn match_boundary(&self, line: &[u8]) -> Option<BoundaryLine> {
        let end = line
            .iter()
            .rposition(|b| !matches!(b, b' ' | b'\t' | b'\r'))
            .map_or(0, |i| i + 1);
        let line = line[..end].strip_prefix(b"--")?;
        for (depth, boundary) in self.boundaries.iter().enumerate().rev() {
            let Some(rest) = line.strip_prefix(boundary.as_bytes()) else {
                continue;
            };
            if rest.is_empty() {
                return Some(BoundaryLine::Delimiter { depth });
            }
            if rest == b"--" {
                return Some(BoundaryLine::Close { depth });
            }
        }
        None
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_body(tok: &mut MimeTokenizer) -> Vec<u8> {
        tok.begin_body();
        let mut out = Vec::new();
        loop {
            match tok.next_body_chunk().unwrap() {
                Some(BodyToken::Chunk(c)) => out.extend_from_slice(&c),
                Some(BodyToken::EndOfBody) => return out,
                None => panic!("needs more input"),
            }
        }
    }

    #[test]
    fn test_preamble_is_skipped() {
        let mut tok = MimeTokenizer::new("b");
        tok.feed(b"This is a preamble\r\n--b\r\n");
        assert_eq!(
            tok.next_boundary().unwrap(),
            Some(BoundaryLine::Delimiter { depth: 0 })
        );
    }

    #[test]
    fn test_boundary_needs_full_line() {
        let mut tok = MimeTokenizer::new("b");
        tok.feed(b"--b");
        assert_eq!(tok.next_boundary().unwrap(), None);
        tok.feed(b"--\r\n");
        assert_eq!(
            tok.next_boundary().unwrap(),
            Some(BoundaryLine::Close { depth: 0 })
        );
    }

    #[test]
    fn test_nested_boundary_depth() {
        let mut tok = MimeTokenizer::new("batch");
        tok.push_boundary("changeset_1");
        tok.feed(b"--changeset_1\r\n--changeset_1--\r\n--batch--\r\n");
        assert_eq!(
            tok.next_boundary().unwrap(),
            Some(BoundaryLine::Delimiter { depth: 1 })
        );
        assert_eq!(
            tok.next_boundary().unwrap(),
            Some(BoundaryLine::Close { depth: 1 })
        );
        tok.pop_boundary();
        assert_eq!(
            tok.next_boundary().unwrap(),
            Some(BoundaryLine::Close { depth: 0 })
        );
        tok.finish();
        assert_eq!(tok.next_boundary().unwrap(), Some(BoundaryLine::EndOfStream));
    }

    #[test]
    fn test_headers_and_blank_line() {
        let mut tok = MimeTokenizer::new("b");
        tok.feed(b"Content-Type: application/http\r\nContent-ID: 1\r\n\r\n");
        assert_eq!(
            tok.next_header().unwrap(),
            Some(HeaderToken::Header("Content-Type".into(), "application/http".into()))
        );
        assert_eq!(
            tok.next_header().unwrap(),
            Some(HeaderToken::Header("Content-ID".into(), "1".into()))
        );
        assert_eq!(tok.next_header().unwrap(), Some(HeaderToken::EndOfHeaders));
    }

    #[test]
    fn test_missing_blank_line_is_malformed() {
        let mut tok = MimeTokenizer::new("b");
        tok.feed(b"Content-Type: application/http\r\n--b\r\n");
        tok.next_header().unwrap();
        assert!(matches!(
            tok.next_header(),
            Err(BatchError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_body_stops_before_crlf_delimiter() {
        let mut tok = MimeTokenizer::new("b");
        tok.feed(b"{\"a\":1}\r\n--b--\r\n");
        assert_eq!(drain_body(&mut tok), b"{\"a\":1}");
        assert_eq!(
            tok.next_boundary().unwrap(),
            Some(BoundaryLine::Close { depth: 0 })
        );
    }

    #[test]
    fn test_empty_body() {
        let mut tok = MimeTokenizer::new("b");
        tok.feed(b"\r\n--b\r\n");
        assert!(drain_body(&mut tok).is_empty());

        let mut tok = MimeTokenizer::new("b");
        tok.feed(b"--b\r\n");
        assert!(drain_body(&mut tok).is_empty());
    }

    #[test]
    fn test_body_containing_boundary_prefix() {
        let mut tok = MimeTokenizer::new("b");
        tok.feed(b"line\r\n--bx is not a boundary\r\n--b\r\n");
        assert_eq!(drain_body(&mut tok), b"line\r\n--bx is not a boundary");
    }

    #[test]
    fn test_body_containing_dashed_boundary_prefix() {
        let mut tok = MimeTokenizer::new("b");
        tok.feed(b"first\r\n--b-not-a-boundary\r\nsecond line\r\n--b--\r\n");
        assert_eq!(
            drain_body(&mut tok),
            b"first\r\n--b-not-a-boundary\r\nsecond line"
        );
        assert_eq!(
            tok.next_boundary().unwrap(),
            Some(BoundaryLine::Close { depth: 0 })
        );
    }

    #[test]
    fn test_delimiter_allows_trailing_whitespace() {
        let mut tok = MimeTokenizer::new("b");
        tok.feed(b"body\r\n--b \t\r\n");
        assert_eq!(drain_body(&mut tok), b"body");
        assert_eq!(
            tok.next_boundary().unwrap(),
            Some(BoundaryLine::Delimiter { depth: 0 })
        );
    }

    #[test]
    fn test_delimiter_waits_for_line_end() {
        let mut tok = MimeTokenizer::new("b");
        tok.begin_body();
        tok.feed(b"body\r\n--b-");
        match tok.next_body_chunk().unwrap() {
            Some(BodyToken::Chunk(c)) => assert_eq!(&c[..], b"body"),
            other => panic!("expected a chunk, got {:?}", other),
        }
        assert_eq!(tok.next_body_chunk().unwrap(), None);
        tok.feed(b"-\r\n");
        assert_eq!(tok.next_body_chunk().unwrap(), Some(BodyToken::EndOfBody));
    }

    #[test]
    fn test_stray_line_after_body_is_malformed() {
        let mut tok = MimeTokenizer::new("b");
        tok.feed(b"body\r\n--b\r\n");
        assert_eq!(drain_body(&mut tok), b"body");
        assert_eq!(
            tok.next_boundary().unwrap(),
            Some(BoundaryLine::Delimiter { depth: 0 })
        );

        // Only a delimiter may follow a body's end.
        tok.boundary_due = true;
        tok.feed(b"stray\r\n--b--\r\n");
        assert!(matches!(
            tok.next_boundary(),
            Err(BatchError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_epilogue_after_close_is_skipped() {
        let mut tok = MimeTokenizer::new("batch");
        tok.push_boundary("cs");
        tok.feed(b"x\r\n--cs--\r\nepilogue\r\n--batch--\r\n");
        assert_eq!(drain_body(&mut tok), b"x");
        assert_eq!(
            tok.next_boundary().unwrap(),
            Some(BoundaryLine::Close { depth: 1 })
        );
        tok.pop_boundary();
        assert_eq!(
            tok.next_boundary().unwrap(),
            Some(BoundaryLine::Close { depth: 0 })
        );
    }

    #[test]
    fn test_body_split_across_feeds() {
        let payload: &[u8] = b"0123456789abcdefghij\r\n--boundary\r\n";
        let mut tok = MimeTokenizer::new("boundary");
        tok.begin_body();
        let mut body = Vec::new();
        let mut done = false;
        for byte in payload {
            tok.feed(std::slice::from_ref(byte));
            while let Some(token) = tok.next_body_chunk().unwrap() {
                match token {
                    BodyToken::Chunk(c) => body.extend_from_slice(&c),
                    BodyToken::EndOfBody => {
                        done = true;
                        break;
                    }
                }
            }
            if done {
                break;
            }
        }
        assert!(done);
        assert_eq!(body, b"0123456789abcdefghij");
    }

    #[test]
    fn test_unterminated_body_is_malformed() {
        let mut tok = MimeTokenizer::new("b");
        tok.feed(b"dangling body");
        tok.finish();
        tok.begin_body();
        assert!(matches!(
            tok.next_body_chunk(),
            Err(BatchError::MalformedFrame(_))
        ));
    }
}
