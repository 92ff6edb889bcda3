//! Multipart framing for the batch writer.
//!
//! ```text
//! --batch_1
//! Content-Type: application/http
//! Content-Transfer-Encoding: binary
//! Content-ID: 1
//!
//! POST Customers HTTP/1.1
//! Content-Type: application/json
//!
//! {"Name":"x"}
//! --batch_1--
//! ```
//!
//! The CRLF before each delimiter belongs to the delimiter, so it is only
//! emitted when a part precedes it at the same level.

use super::{PendingHead, PendingOperation};
use crate::batch::protocol::constants::{boundaries, headers, media_types};
use crate::batch::protocol::headers::{format_request_line, format_status_line, write_header};
use crate::batch::types::MessageKind;
use bytes::BytesMut;

#[derive(Debug)]
struct Level {
    boundary: String,
    has_parts: bool,
}

#[derive(Debug)]
pub(crate) struct MimeFramer {
    kind: MessageKind,
    levels: Vec<Level>,
}

impl MimeFramer {
    pub(crate) fn new(boundary: &str, kind: MessageKind) -> Self {
        Self {
            kind,
            levels: vec![Level {
                boundary: boundary.to_string(),
                has_parts: false,
            }],
        }
    }

    /// Boundary of a changeset with the given group id.
    pub(crate) fn changeset_boundary(&self, group_id: &str) -> String {
        let prefix = match self.kind {
            MessageKind::Request => boundaries::CHANGESET_REQUEST,
            MessageKind::Response => boundaries::CHANGESET_RESPONSE,
        };
        format!("{}{}", prefix, group_id)
    }

    fn delimiter(&mut self, out: &mut BytesMut) {
        if let Some(level) = self.levels.last_mut() {
            if level.has_parts {
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"--");
            out.extend_from_slice(level.boundary.as_bytes());
            out.extend_from_slice(b"\r\n");
            level.has_parts = true;
        }
    }

    fn close(&mut self, out: &mut BytesMut) {
        if let Some(level) = self.levels.pop() {
            if level.has_parts {
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"--");
            out.extend_from_slice(level.boundary.as_bytes());
            out.extend_from_slice(b"--");
        }
    }

    pub(crate) fn start_changeset(&mut self, out: &mut BytesMut, group_id: &str) {
        let boundary = self.changeset_boundary(group_id);
        self.delimiter(out);
        write_header(
            out,
            headers::CONTENT_TYPE,
            &format!("{}; boundary={}", media_types::MULTIPART_MIXED, boundary),
        );
        out.extend_from_slice(b"\r\n");
        self.levels.push(Level {
            boundary,
            has_parts: false,
        });
    }

    pub(crate) fn end_changeset(&mut self, out: &mut BytesMut) {
        self.close(out);
    }

    pub(crate) fn end_batch(&mut self, out: &mut BytesMut) {
        self.close(out);
        out.extend_from_slice(b"\r\n");
    }

    /// Part headers, start line and operation headers, up to the blank line before the body.
    pub(crate) fn write_head(&mut self, out: &mut BytesMut, op: &PendingOperation) {
        self.delimiter(out);
        write_header(out, headers::CONTENT_TYPE, media_types::APPLICATION_HTTP);
        write_header(
            out,
            headers::CONTENT_TRANSFER_ENCODING,
            media_types::BINARY_TRANSFER_ENCODING,
        );
        if let Some(content_id) = &op.content_id {
            write_header(out, headers::CONTENT_ID, content_id);
        }
        out.extend_from_slice(b"\r\n");

        let start_line = match &op.head {
            PendingHead::Request { method, target, .. } => format_request_line(method, target),
            PendingHead::Response { status } => format_status_line(*status),
        };
        out.extend_from_slice(start_line.as_bytes());
        out.extend_from_slice(b"\r\n");

        if let PendingHead::Request {
            host: Some(host), ..
        } = &op.head
        {
            write_header(out, headers::HOST, host);
        }
        for (name, value) in op.headers.iter() {
            write_header(out, name, value);
        }
        out.extend_from_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::types::{DependsOnIds, HeaderList};
    use http::{Method, StatusCode};

    fn request(method: Method, target: &str) -> PendingOperation {
        PendingOperation {
            head: PendingHead::Request {
                method,
                target: target.to_string(),
                host: None,
            },
            headers: HeaderList::new(),
            content_id: None,
            group_id: None,
            depends_on: DependsOnIds::empty(),
            body: BytesMut::new(),
            body_started: false,
        }
    }

    #[test]
    fn test_single_get_keeps_trailing_blank_line() {
        let mut framer = MimeFramer::new("batch_1", MessageKind::Request);
        let mut out = BytesMut::new();
        framer.write_head(&mut out, &request(Method::GET, "Customers"));
        framer.end_batch(&mut out);
        assert_eq!(
            std::str::from_utf8(&out).unwrap(),
            "--batch_1\r\n\
             Content-Type: application/http\r\n\
             Content-Transfer-Encoding: binary\r\n\
             \r\n\
             GET Customers HTTP/1.1\r\n\
             \r\n\
             \r\n\
             --batch_1--\r\n"
        );
    }

    #[test]
    fn test_changeset_framing() {
        let mut framer = MimeFramer::new("batchresponse_1", MessageKind::Response);
        let mut out = BytesMut::new();
        framer.start_changeset(&mut out, "g");
        let mut op = request(Method::POST, "");
        op.head = PendingHead::Response {
            status: StatusCode::CREATED,
        };
        op.content_id = Some("1".into());
        framer.write_head(&mut out, &op);
        framer.end_changeset(&mut out);
        framer.end_batch(&mut out);

        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.starts_with(
            "--batchresponse_1\r\nContent-Type: multipart/mixed; boundary=changesetresponse_g\r\n\r\n--changesetresponse_g\r\n"
        ));
        assert!(text.contains("Content-ID: 1\r\n\r\nHTTP/1.1 201 Created\r\n\r\n"));
        assert!(text.ends_with("\r\n--changesetresponse_g--\r\n--batchresponse_1--\r\n"));
    }

    #[test]
    fn test_empty_batch() {
        let mut framer = MimeFramer::new("b", MessageKind::Request);
        let mut out = BytesMut::new();
        framer.end_batch(&mut out);
        assert_eq!(&out[..], b"--b--\r\n");
    }
}
