//! Multipart frame reader.
//!
//! Turns [`MimeTokenizer`] tokens into batch frames. One part is one frame:
//! an `application/http` part is an operation, a `multipart/mixed` part opens
//! a changeset, and the closing delimiter of a changeset ends it.

use super::machine::{Frame, OperationHead, ParsedOperation};
use crate::batch::error::{BatchError, Result};
use crate::batch::protocol::constants::{boundaries, headers, media_types};
use crate::batch::protocol::headers::{is_valid_boundary, parse_request_line, parse_status_line};
use crate::batch::protocol::{parse_media_type, BodyToken, BoundaryLine, HeaderToken, MimeTokenizer};
use crate::batch::types::{HeaderList, MessageKind};
use bytes::{Bytes, BytesMut};
use http::Method;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Boundary,
    PartHeaders,
    StartLine,
    OperationHeaders,
    Body,
    Done,
}

#[derive(Debug)]
pub(crate) struct MimeFrameReader {
    tokenizer: MimeTokenizer,
    kind: MessageKind,
    phase: Phase,
    in_changeset: bool,
    part_headers: HeaderList,
    head: Option<OperationHead>,
    operation_headers: HeaderList,
    body: BytesMut,
}

impl MimeFrameReader {
    pub(crate) fn new(boundary: &str, kind: MessageKind) -> Self {
        Self {
            tokenizer: MimeTokenizer::new(boundary),
            kind,
            phase: Phase::Boundary,
            in_changeset: false,
            part_headers: HeaderList::new(),
            head: None,
            operation_headers: HeaderList::new(),
            body: BytesMut::new(),
        }
    }

    pub(crate) fn feed(&mut self, data: &[u8]) {
        self.tokenizer.feed(data);
    }

    pub(crate) fn finish(&mut self) {
        self.tokenizer.finish();
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.phase {
                Phase::Body => {
                    if !self.skip_body()? {
                        return Ok(None);
                    }
                }
                Phase::Boundary => match self.next_boundary()? {
                    Some(Some(frame)) => return Ok(Some(frame)),
                    Some(None) => {}
                    None => return Ok(None),
                },
                Phase::PartHeaders => match self.read_part_headers()? {
                    Some(Some(frame)) => return Ok(Some(frame)),
                    Some(None) => {}
                    None => return Ok(None),
                },
                Phase::StartLine => {
                    let Some(line) = self.tokenizer.next_line()? else {
                        return Ok(None);
                    };
                    self.head = Some(self.parse_start_line(&line)?);
                    self.operation_headers = HeaderList::new();
                    self.phase = Phase::OperationHeaders;
                }
                Phase::OperationHeaders => match self.tokenizer.next_header()? {
                    None => return Ok(None),
                    Some(HeaderToken::Header(name, value)) => self.operation_headers.append(name, value),
                    Some(HeaderToken::EndOfHeaders) => return self.finish_operation().map(Some),
                },
                Phase::Done => return Ok(Some(Frame::End)),
            }
        }
    }

    /// Collects the current operation body.
    ///
    /// The body is held whole once a message asks for it. Bodies nobody asks
    /// for go through `skip_body` and are dropped chunk by chunk.
    pub(crate) fn take_body(&mut self) -> Result<Option<Bytes>> {
        if self.phase != Phase::Body {
            return Ok(Some(Bytes::new()));
        }
        loop {
            match self.tokenizer.next_body_chunk()? {
                None => return Ok(None),
                Some(BodyToken::Chunk(chunk)) => self.body.extend_from_slice(&chunk),
                Some(BodyToken::EndOfBody) => {
                    self.phase = Phase::Boundary;
                    return Ok(Some(self.body.split().freeze()));
                }
            }
        }
    }

    /// Discards the rest of a body nobody asked for. `false` if more input is needed.
    fn skip_body(&mut self) -> Result<bool> {
        loop {
            match self.tokenizer.next_body_chunk()? {
                None => return Ok(false),
                Some(BodyToken::Chunk(_)) => {}
                Some(BodyToken::EndOfBody) => {
                    self.body.clear();
                    self.phase = Phase::Boundary;
                    return Ok(true);
                }
            }
        }
    }

    /// `Some(None)` when a delimiter opened a new part.
    fn next_boundary(&mut self) -> Result<Option<Option<Frame>>> {
        let Some(line) = self.tokenizer.next_boundary()? else {
            return Ok(None);
        };
        let innermost = self.tokenizer.depth() - 1;
        match line {
            BoundaryLine::EndOfStream => Err(BatchError::malformed(
                "unexpected end of stream: the batch is missing its closing boundary",
            )),
            BoundaryLine::Delimiter { depth } if depth == innermost => {
                self.part_headers = HeaderList::new();
                self.phase = Phase::PartHeaders;
                Ok(Some(None))
            }
            BoundaryLine::Close { depth } if depth == innermost => {
                if depth == 0 {
                    self.phase = Phase::Done;
                    return Ok(Some(Some(Frame::End)));
                }
                self.tokenizer.pop_boundary();
                self.in_changeset = false;
                Ok(Some(Some(Frame::ChangesetEnd)))
            }
            BoundaryLine::Delimiter { .. } | BoundaryLine::Close { .. } => Err(BatchError::malformed(
                "batch boundary found before the changeset was closed",
            )),
        }
    }

    /// `Some(None)` when the part is an operation and its start line follows.
    fn read_part_headers(&mut self) -> Result<Option<Option<Frame>>> {
        loop {
            match self.tokenizer.next_header()? {
                None => return Ok(None),
                Some(HeaderToken::Header(name, value)) => self.part_headers.append(name, value),
                Some(HeaderToken::EndOfHeaders) => break,
            }
        }

        let content_type = self.part_headers.content_type().unwrap_or_default().to_string();
        let (essence, params) = parse_media_type(&content_type);
        match essence.as_str() {
            media_types::APPLICATION_HTTP => {
                self.phase = Phase::StartLine;
                Ok(Some(None))
            }
            media_types::MULTIPART_MIXED => {
                if self.in_changeset {
                    return Err(BatchError::malformed("changesets cannot be nested"));
                }
                let boundary = params
                    .into_iter()
                    .find(|(k, _)| k == "boundary")
                    .map(|(_, v)| v)
                    .filter(|b| is_valid_boundary(b))
                    .ok_or_else(|| {
                        BatchError::malformed(format!(
                            "changeset part has no valid boundary: '{}'",
                            content_type
                        ))
                    })?;
                let group_id = group_id_from_boundary(&boundary);
                tracing::debug!(boundary = %boundary, group_id = %group_id, "changeset part");
                self.tokenizer.push_boundary(boundary);
                self.in_changeset = true;
                self.phase = Phase::Boundary;
                Ok(Some(Some(Frame::ChangesetStart(group_id))))
            }
            "" => Err(BatchError::malformed("batch part has no Content-Type header")),
            _ => Err(BatchError::malformed(format!(
                "unsupported batch part content type '{}'",
                content_type
            ))),
        }
    }

    fn parse_start_line(&self, line: &str) -> Result<OperationHead> {
        match self.kind {
            MessageKind::Request => {
                let (method, url) = parse_request_line(line)?;
                if self.in_changeset && is_query_method(&method) {
                    return Err(BatchError::InvalidMethodInChangeset(method.to_string()));
                }
                Ok(OperationHead::Request { method, url })
            }
            MessageKind::Response => Ok(OperationHead::Response {
                status: parse_status_line(line)?,
            }),
        }
    }

    fn finish_operation(&mut self) -> Result<Frame> {
        let head = self
            .head
            .take()
            .ok_or_else(|| BatchError::malformed("operation headers without a start line"))?;
        let content_id = self
            .part_headers
            .get(headers::CONTENT_ID)
            .or_else(|| self.operation_headers.get(headers::CONTENT_ID))
            .map(str::to_string);

        self.tokenizer.begin_body();
        self.body.clear();
        self.phase = Phase::Body;

        Ok(Frame::Operation(ParsedOperation {
            head,
            headers: std::mem::take(&mut self.operation_headers),
            content_id,
            depends_on: Vec::new(),
            group_id: None,
            body: None,
        }))
    }
}

/// `changeset_<id>` / `changesetresponse_<id>` → `<id>`; other boundaries are used as is.
pub(crate) fn group_id_from_boundary(boundary: &str) -> String {
    boundary
        .strip_prefix(boundaries::CHANGESET_RESPONSE)
        .or_else(|| boundary.strip_prefix(boundaries::CHANGESET_REQUEST))
        .filter(|id| !id.is_empty())
        .unwrap_or(boundary)
        .to_string()
}

fn is_query_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(kind: MessageKind, payload: &str) -> Result<Vec<Frame>> {
        let mut reader = MimeFrameReader::new("batch_1", kind);
        reader.feed(payload.as_bytes());
        reader.finish();
        let mut out = Vec::new();
        loop {
            let frame = reader.next_frame()?.expect("complete input");
            let end = matches!(frame, Frame::End);
            out.push(frame);
            if end {
                return Ok(out);
            }
        }
    }

    #[test]
    fn test_group_id_from_boundary() {
        assert_eq!(group_id_from_boundary("changeset_abc"), "abc");
        assert_eq!(group_id_from_boundary("changesetresponse_abc"), "abc");
        assert_eq!(group_id_from_boundary("cs"), "cs");
    }

    #[test]
    fn test_single_operation() {
        let payload = "--batch_1\r\n\
            Content-Type: application/http\r\n\
            Content-Transfer-Encoding: binary\r\n\
            \r\n\
            GET Customers HTTP/1.1\r\n\
            Accept: application/json\r\n\
            \r\n\
            \r\n\
            --batch_1--\r\n";
        let out = frames(MessageKind::Request, payload).unwrap();
        assert_eq!(out.len(), 2);
        match &out[0] {
            Frame::Operation(op) => {
                assert!(matches!(&op.head, OperationHead::Request { method, url }
                    if *method == Method::GET && url == "Customers"));
                assert_eq!(op.headers.get("accept"), Some("application/json"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_skipped_body_is_not_buffered() {
        let mut reader = MimeFrameReader::new("batch_1", MessageKind::Request);
        reader.feed(
            b"--batch_1\r\n\
            Content-Type: application/http\r\n\
            \r\n\
            POST Blobs HTTP/1.1\r\n\
            \r\n",
        );
        assert!(matches!(reader.next_frame().unwrap(), Some(Frame::Operation(_))));

        let piece = [b'a'; 100];
        for _ in 0..1000 {
            reader.feed(&piece);
            assert!(reader.next_frame().unwrap().is_none());
            assert!(reader.tokenizer.buffered() <= piece.len() + "--batch_1".len() + 3);
            assert!(reader.body.is_empty());
        }

        reader.feed(b"\r\n--batch_1--\r\n");
        reader.finish();
        assert!(matches!(reader.next_frame().unwrap(), Some(Frame::End)));
    }

    #[test]
    fn test_nested_changeset_rejected() {
        let payload = "--batch_1\r\n\
            Content-Type: multipart/mixed; boundary=changeset_a\r\n\
            \r\n\
            --changeset_a\r\n\
            Content-Type: multipart/mixed; boundary=changeset_b\r\n\
            \r\n";
        let err = frames(MessageKind::Request, payload).unwrap_err();
        assert!(err.to_string().contains("nested"));
    }

    #[test]
    fn test_get_in_changeset_rejected() {
        let payload = "--batch_1\r\n\
            Content-Type: multipart/mixed; boundary=changeset_a\r\n\
            \r\n\
            --changeset_a\r\n\
            Content-Type: application/http\r\n\
            \r\n\
            GET Customers HTTP/1.1\r\n\
            \r\n\
            \r\n\
            --changeset_a--\r\n\
            --batch_1--\r\n";
        let err = frames(MessageKind::Request, payload).unwrap_err();
        assert!(matches!(err, BatchError::InvalidMethodInChangeset(ref m) if m == "GET"));
    }

    #[test]
    fn test_unknown_part_type_rejected() {
        let payload = "--batch_1\r\nContent-Type: text/plain\r\n\r\nhello\r\n--batch_1--\r\n";
        assert!(matches!(
            frames(MessageKind::Request, payload),
            Err(BatchError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_missing_close_delimiter() {
        let payload = "--batch_1\r\n\
            Content-Type: application/http\r\n\
            \r\n\
            HTTP/1.1 200 OK\r\n\
            \r\n\
            body\r\n";
        assert!(matches!(
            frames(MessageKind::Response, payload),
            Err(BatchError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_content_id_falls_back_to_operation_headers() {
        let payload = "--batch_1\r\n\
            Content-Type: application/http\r\n\
            \r\n\
            HTTP/1.1 204 No Content\r\n\
            Content-ID: 7\r\n\
            \r\n\
            \r\n\
            --batch_1--\r\n";
        let out = frames(MessageKind::Response, payload).unwrap();
        match &out[0] {
            Frame::Operation(op) => assert_eq!(op.content_id.as_deref(), Some("7")),
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
