//! Operation messages handed out by the batch reader.
//!
//! | Type | Start line | Extra field |
//! |------|------------|-------------|
//! | [`OperationRequestMessage`] | `METHOD URL HTTP/1.1` | `method`, `url` |
//! | [`OperationResponseMessage`] | `HTTP/1.1 CODE REASON` | `status` |
//!
//! Both carry the ordered header list, the Content-ID, the enclosing
//! atomicity group and the resolved `dependsOn` list. The body is opened
//! lazily and at most once.

use super::body::{BodyGuard, BodyStream};
use super::headers::HeaderList;
use super::operation_url::OperationUrl;
use crate::batch::error::{Result, UsageError};
use bytes::Bytes;
use http::{Method, StatusCode};
use std::ops::Deref;
use std::sync::Arc;

/// Ordered, de-duplicated list of ids an operation depends on.
///
/// The list is an immutable shared value: cloning is cheap and no caller can
/// observe a change made through another handle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DependsOnIds(Arc<[String]>);

impl DependsOnIds {
    /// Builds a list, keeping the first occurrence of each id.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for id in ids {
            let id = id.into();
            if !out.contains(&id) {
                out.push(id);
            }
        }
        DependsOnIds(out.into())
    }

    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.to_vec()
    }
}

impl Deref for DependsOnIds {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for DependsOnIds {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        DependsOnIds::new(iter)
    }
}

#[derive(Debug, Default)]
struct BodySlot {
    data: Bytes,
    guard: Option<BodyGuard>,
    requested: bool,
}

impl BodySlot {
    fn open(&mut self) -> Result<BodyStream> {
        if self.requested {
            return Err(UsageError::BodyAlreadyRequested.into());
        }
        self.requested = true;
        let data = std::mem::take(&mut self.data);
        Ok(match self.guard.take() {
            Some(guard) => BodyStream::guarded(data, guard),
            None => BodyStream::new(data),
        })
    }
}

/// Fields shared by request and response messages.
#[derive(Debug, Default)]
struct Envelope {
    headers: HeaderList,
    content_id: Option<String>,
    group_id: Option<String>,
    depends_on: DependsOnIds,
    body: BodySlot,
}

impl Envelope {
    fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        if self.body.requested {
            return Err(UsageError::HeadersFrozen.into());
        }
        self.headers.insert(name, value);
        Ok(())
    }
}

/// One batched request.
#[derive(Debug)]
pub struct OperationRequestMessage {
    method: Method,
    url: OperationUrl,
    envelope: Envelope,
}

impl OperationRequestMessage {
    pub fn new(method: Method, url: OperationUrl) -> Self {
        Self {
            method,
            url,
            envelope: Envelope::default(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderList) -> Self {
        self.envelope.headers = headers;
        self
    }

    pub fn with_content_id(mut self, content_id: Option<String>) -> Self {
        self.envelope.content_id = content_id;
        self
    }

    pub fn with_group_id(mut self, group_id: Option<String>) -> Self {
        self.envelope.group_id = group_id;
        self
    }

    pub fn with_depends_on(mut self, depends_on: DependsOnIds) -> Self {
        self.envelope.depends_on = depends_on;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.envelope.body.data = body;
        self
    }

    pub(crate) fn with_guard(mut self, guard: BodyGuard) -> Self {
        self.envelope.body.guard = Some(guard);
        self
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    pub fn url(&self) -> &OperationUrl {
        &self.url
    }

    #[inline]
    pub fn headers(&self) -> &HeaderList {
        &self.envelope.headers
    }

    pub fn content_id(&self) -> Option<&str> {
        self.envelope.content_id.as_deref()
    }

    pub fn group_id(&self) -> Option<&str> {
        self.envelope.group_id.as_deref()
    }

    /// Resolved dependencies; the returned value is independent of the message.
    pub fn depends_on_ids(&self) -> DependsOnIds {
        self.envelope.depends_on.clone()
    }

    /// Replaces a header. Fails once the body stream was requested.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.envelope.set_header(name, value)
    }

    /// Opens the body. May be called once per message.
    pub fn body_stream(&mut self) -> Result<BodyStream> {
        self.envelope.body.open()
    }
}

/// One batched response.
#[derive(Debug)]
pub struct OperationResponseMessage {
    status: StatusCode,
    envelope: Envelope,
}

impl OperationResponseMessage {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            envelope: Envelope::default(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderList) -> Self {
        self.envelope.headers = headers;
        self
    }

    pub fn with_content_id(mut self, content_id: Option<String>) -> Self {
        self.envelope.content_id = content_id;
        self
    }

    pub fn with_group_id(mut self, group_id: Option<String>) -> Self {
        self.envelope.group_id = group_id;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.envelope.body.data = body;
        self
    }

    pub(crate) fn with_guard(mut self, guard: BodyGuard) -> Self {
        self.envelope.body.guard = Some(guard);
        self
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn headers(&self) -> &HeaderList {
        &self.envelope.headers
    }

    pub fn content_id(&self) -> Option<&str> {
        self.envelope.content_id.as_deref()
    }

    pub fn group_id(&self) -> Option<&str> {
        self.envelope.group_id.as_deref()
    }

    /// Always empty for responses read from the wire.
    pub fn depends_on_ids(&self) -> DependsOnIds {
        self.envelope.depends_on.clone()
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.envelope.set_header(name, value)
    }

    pub fn body_stream(&mut self) -> Result<BodyStream> {
        self.envelope.body.open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::error::BatchError;
    use std::io::Read;

    fn request() -> OperationRequestMessage {
        OperationRequestMessage::new(Method::POST, OperationUrl::parse("Customers").unwrap())
            .with_content_id(Some("1".into()))
            .with_body(Bytes::from_static(b"{}"))
    }

    #[test]
    fn test_depends_on_ids_dedup_preserves_order() {
        let ids = DependsOnIds::new(["b", "a", "b", "c"]);
        assert_eq!(ids.to_vec(), vec!["b", "a", "c"]);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_depends_on_ids_are_independent_copies() {
        let op = request().with_depends_on(DependsOnIds::new(["0"]));
        let mut copy = op.depends_on_ids().to_vec();
        copy.push("x".into());
        assert_eq!(op.depends_on_ids().to_vec(), vec!["0"]);
    }

    #[test]
    fn test_body_stream_once() {
        let mut op = request();
        let mut body = op.body_stream().unwrap();
        let mut out = Vec::new();
        body.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"{}");

        let err = op.body_stream().unwrap_err();
        assert!(matches!(
            err,
            BatchError::Usage(UsageError::BodyAlreadyRequested)
        ));
    }

    #[test]
    fn test_set_header_after_body_is_usage_error() {
        let mut op = request();
        op.set_header("Prefer", "return=minimal").unwrap();
        assert_eq!(op.headers().get("prefer"), Some("return=minimal"));

        let _body = op.body_stream().unwrap();
        let err = op.set_header("Prefer", "x").unwrap_err();
        assert!(matches!(err, BatchError::Usage(UsageError::HeadersFrozen)));
    }

    #[test]
    fn test_response_accessors() {
        let mut op = OperationResponseMessage::new(StatusCode::CREATED)
            .with_content_id(Some("1".into()))
            .with_group_id(Some("g1".into()));
        assert_eq!(op.status(), StatusCode::CREATED);
        assert_eq!(op.group_id(), Some("g1"));
        assert!(op.depends_on_ids().is_empty());
        assert_eq!(op.body_stream().unwrap().remaining(), 0);
    }
}
