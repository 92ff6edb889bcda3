//! Sans-IO batch reader state machine.
//!
//! [`ReaderCore`] owns the frame reader selected for the payload format,
//! the dependency resolver and the reader state. Drivers feed it bytes and
//! call [`ReaderCore::step`] until it yields a state; `Ok(None)` means the
//! buffered input ran out before the next state was complete.
//!
//! # State Transitions
//!
//! | From | Frame | To |
//! |------|-------|----|
//! | `Initial`, `Operation`, `ChangesetEnd` | operation | `Operation` |
//! | `ChangesetStart`, `Operation` (in changeset) | operation | `Operation` |
//! | `Initial`, `Operation`, `ChangesetEnd` | changeset start | `ChangesetStart` |
//! | `ChangesetStart`, `Operation` (in changeset) | changeset end | `ChangesetEnd` |
//! | any | batch end | `Completed` |
//!
//! Any error moves the reader to `Exception`.

use super::json::JsonFrameReader;
use super::mime::MimeFrameReader;
use crate::batch::config::BatchConfig;
use crate::batch::error::{BatchError, Result, UsageError};
use crate::batch::protocol::BatchFormat;
use crate::batch::resolver::DependencyResolver;
use crate::batch::types::{
    BatchReaderState, BodyGuard, DependsOnIds, HeaderList, MessageKind, OperationRequestMessage,
    OperationResponseMessage, OperationUrl,
};
use bytes::Bytes;
use http::{Method, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) enum OperationHead {
    Request { method: Method, url: String },
    Response { status: StatusCode },
}

/// One operation as framed on the wire, before validation.
#[derive(Debug)]
pub(crate) struct ParsedOperation {
    pub(crate) head: OperationHead,
    pub(crate) headers: HeaderList,
    pub(crate) content_id: Option<String>,
    /// Declared `dependsOn` tokens (JSON only).
    pub(crate) depends_on: Vec<String>,
    /// Declared `atomicityGroup` (JSON only).
    pub(crate) group_id: Option<String>,
    /// Complete body when the format carries it inline.
    pub(crate) body: Option<Bytes>,
}

#[derive(Debug)]
pub(crate) enum Frame {
    Operation(ParsedOperation),
    ChangesetStart(String),
    ChangesetEnd,
    End,
}

#[derive(Debug)]
pub(crate) enum FrameReader {
    Mime(MimeFrameReader),
    Json(JsonFrameReader),
}

impl FrameReader {
    fn new(format: &BatchFormat, kind: MessageKind) -> Self {
        match format {
            BatchFormat::Mime { boundary } => FrameReader::Mime(MimeFrameReader::new(boundary, kind)),
            BatchFormat::Json => FrameReader::Json(JsonFrameReader::new(kind)),
        }
    }

    fn feed(&mut self, data: &[u8]) {
        match self {
            FrameReader::Mime(r) => r.feed(data),
            FrameReader::Json(r) => r.feed(data),
        }
    }

    fn finish(&mut self) {
        match self {
            FrameReader::Mime(r) => r.finish(),
            FrameReader::Json(r) => r.finish(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self {
            FrameReader::Mime(r) => r.next_frame(),
            FrameReader::Json(r) => r.next_frame(),
        }
    }

    fn take_body(&mut self) -> Result<Option<Bytes>> {
        match self {
            FrameReader::Mime(r) => r.take_body(),
            FrameReader::Json(_) => Ok(Some(Bytes::new())),
        }
    }
}

/// The operation at the reader cursor, after validation.
#[derive(Debug)]
struct CurrentOperation {
    parsed: ParsedOperation,
    url: Option<OperationUrl>,
    depends_on: DependsOnIds,
}

#[derive(Debug)]
pub(crate) struct ReaderCore {
    frames: FrameReader,
    format: BatchFormat,
    kind: MessageKind,
    config: BatchConfig,
    resolver: DependencyResolver,
    state: BatchReaderState,
    generation: Arc<AtomicU64>,
    current: Option<CurrentOperation>,
    message_created: bool,
    group_id: Option<String>,
    parts: usize,
    changeset_operations: usize,
    finished: bool,
}

impl ReaderCore {
    pub(crate) fn new(content_type: &str, kind: MessageKind, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        let format = BatchFormat::select(content_type)?;
        let scope = config.content_id_scope(&format);
        tracing::debug!(?format, ?kind, ?scope, version = %config.version, "batch reader created");
        Ok(Self {
            frames: FrameReader::new(&format, kind),
            format,
            kind,
            config,
            resolver: DependencyResolver::new(scope),
            state: BatchReaderState::Initial,
            generation: Arc::new(AtomicU64::new(0)),
            current: None,
            message_created: false,
            group_id: None,
            parts: 0,
            changeset_operations: 0,
            finished: false,
        })
    }

    pub(crate) fn feed(&mut self, data: &[u8]) {
        self.frames.feed(data);
    }

    pub(crate) fn finish(&mut self) {
        self.finished = true;
        self.frames.finish();
    }

    #[inline]
    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    #[inline]
    pub(crate) fn state(&self) -> BatchReaderState {
        self.state
    }

    #[inline]
    pub(crate) fn format(&self) -> &BatchFormat {
        &self.format
    }

    #[inline]
    pub(crate) fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub(crate) fn current_group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub(crate) fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub(crate) fn resolver_mut(&mut self) -> &mut DependencyResolver {
        &mut self.resolver
    }

    /// Advances by one state, or returns `Ok(None)` when more input is needed.
    pub(crate) fn step(&mut self) -> Result<Option<BatchReaderState>> {
        match self.state {
            BatchReaderState::Exception => return Err(UsageError::ReaderInException.into()),
            BatchReaderState::Completed => return Ok(Some(BatchReaderState::Completed)),
            _ => {}
        }
        match self.advance() {
            Ok(state) => Ok(state),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Moves the reader to `Exception` unless `error` is API misuse.
    pub(crate) fn fail(&mut self, error: BatchError) -> BatchError {
        if !error.is_usage_error() {
            tracing::warn!(error = %error, state = ?self.state, "batch reader failed");
            self.state = BatchReaderState::Exception;
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        error
    }

    fn advance(&mut self) -> Result<Option<BatchReaderState>> {
        if self.current.take().is_some() {
            // Bodies handed out for the previous operation go stale from here on.
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.message_created = false;
        }

        let Some(frame) = self.frames.next_frame()? else {
            return Ok(None);
        };

        let next = match frame {
            Frame::ChangesetStart(group_id) => self.start_changeset(group_id)?,
            Frame::ChangesetEnd => self.end_changeset()?,
            Frame::Operation(op) => self.start_operation(op)?,
            Frame::End => {
                if let Some(group_id) = &self.group_id {
                    return Err(BatchError::malformed(format!(
                        "batch ended inside changeset '{}'",
                        group_id
                    )));
                }
                BatchReaderState::Completed
            }
        };
        tracing::trace!(from = ?self.state, to = ?next, "batch reader transition");
        self.state = next;
        Ok(Some(next))
    }

    fn start_changeset(&mut self, group_id: String) -> Result<BatchReaderState> {
        if self.group_id.is_some() {
            return Err(BatchError::malformed("changesets cannot be nested"));
        }
        self.count_part()?;
        if self.kind == MessageKind::Request {
            self.resolver.begin_group(&group_id)?;
        }
        self.group_id = Some(group_id);
        self.changeset_operations = 0;
        Ok(BatchReaderState::ChangesetStart)
    }

    fn end_changeset(&mut self) -> Result<BatchReaderState> {
        if self.group_id.take().is_none() {
            return Err(BatchError::malformed("changeset end without a changeset start"));
        }
        if self.kind == MessageKind::Request {
            self.resolver.end_group();
        }
        Ok(BatchReaderState::ChangesetEnd)
    }

    fn count_part(&mut self) -> Result<()> {
        self.parts += 1;
        if self.parts > self.config.max_parts_per_batch {
            return Err(BatchError::QuotaExceeded(format!(
                "batch has more than {} parts",
                self.config.max_parts_per_batch
            )));
        }
        Ok(())
    }

    fn start_operation(&mut self, mut parsed: ParsedOperation) -> Result<BatchReaderState> {
        match &self.group_id {
            Some(group_id) => {
                self.changeset_operations += 1;
                if self.changeset_operations > self.config.max_operations_per_changeset {
                    return Err(BatchError::QuotaExceeded(format!(
                        "changeset '{}' has more than {} operations",
                        group_id, self.config.max_operations_per_changeset
                    )));
                }
            }
            None => self.count_part()?,
        }
        parsed.group_id = self.group_id.clone();

        let (url, depends_on) = match &parsed.head {
            OperationHead::Request { url, .. } => {
                let url = OperationUrl::parse(url)?;
                let content_id = parsed.content_id.as_deref();
                let group_id = parsed.group_id.as_deref();
                DependencyResolver::check_self_reference(content_id, &url)?;

                let depends_on = match self.format {
                    BatchFormat::Json => {
                        let resolved = self.resolver.resolve(content_id, group_id, &parsed.depends_on)?;
                        if let Some(reference) = url.reference_id() {
                            if !resolved.iter().any(|id| id == reference) {
                                return Err(BatchError::ReferenceNotInDependsOn {
                                    reference: reference.to_string(),
                                    url: url.to_string(),
                                    content_id: content_id.unwrap_or_default().to_string(),
                                });
                            }
                        }
                        resolved
                    }
                    BatchFormat::Mime { .. } => {
                        self.resolver.resolve_reference(content_id, group_id, &url)?
                    }
                };
                (Some(url), depends_on)
            }
            OperationHead::Response { .. } => (None, DependsOnIds::empty()),
        };

        tracing::debug!(
            content_id = parsed.content_id.as_deref().unwrap_or(""),
            group_id = parsed.group_id.as_deref().unwrap_or(""),
            "operation read"
        );
        self.current = Some(CurrentOperation {
            parsed,
            url,
            depends_on,
        });
        Ok(BatchReaderState::Operation)
    }

    fn check_can_create(&self, expected: MessageKind) -> Result<()> {
        if self.state == BatchReaderState::Exception {
            return Err(UsageError::ReaderInException.into());
        }
        if self.state != BatchReaderState::Operation || self.current.is_none() {
            return Err(UsageError::InvalidReaderState {
                action: "create an operation message",
                state: self.state,
            }
            .into());
        }
        if self.message_created {
            return Err(UsageError::MessageAlreadyCreated.into());
        }
        if self.kind != expected {
            return Err(UsageError::WrongMessageKind {
                expected,
                actual: self.kind,
            }
            .into());
        }
        Ok(())
    }

    /// Body of the current operation, once all of it is buffered.
    fn poll_body(&mut self) -> Result<Option<Bytes>> {
        let inline = self
            .current
            .as_mut()
            .and_then(|current| current.parsed.body.take());
        if let Some(body) = inline {
            return Ok(Some(body));
        }
        match self.frames.take_body() {
            Ok(body) => Ok(body),
            Err(e) => Err(self.fail(e)),
        }
    }

    pub(crate) fn poll_request_message(&mut self) -> Result<Option<OperationRequestMessage>> {
        self.check_can_create(MessageKind::Request)?;
        let Some(body) = self.poll_body()? else {
            return Ok(None);
        };
        let Some(current) = self.current.as_mut() else {
            return Err(BatchError::malformed("no operation at the reader cursor"));
        };
        let (OperationHead::Request { method, .. }, Some(url)) = (&current.parsed.head, &current.url) else {
            return Err(BatchError::malformed("operation is not a request"));
        };

        let message = OperationRequestMessage::new(method.clone(), url.clone())
            .with_headers(std::mem::take(&mut current.parsed.headers))
            .with_content_id(current.parsed.content_id.clone())
            .with_group_id(current.parsed.group_id.clone())
            .with_depends_on(current.depends_on.clone())
            .with_body(body)
            .with_guard(BodyGuard::new(self.generation.clone()));
        self.message_created = true;
        Ok(Some(message))
    }

    pub(crate) fn poll_response_message(&mut self) -> Result<Option<OperationResponseMessage>> {
        self.check_can_create(MessageKind::Response)?;
        let Some(body) = self.poll_body()? else {
            return Ok(None);
        };
        let Some(current) = self.current.as_mut() else {
            return Err(BatchError::malformed("no operation at the reader cursor"));
        };
        let OperationHead::Response { status } = current.parsed.head else {
            return Err(BatchError::malformed("operation is not a response"));
        };

        let message = OperationResponseMessage::new(status)
            .with_headers(std::mem::take(&mut current.parsed.headers))
            .with_content_id(current.parsed.content_id.clone())
            .with_group_id(current.parsed.group_id.clone())
            .with_body(body)
            .with_guard(BodyGuard::new(self.generation.clone()));
        self.message_created = true;
        Ok(Some(message))
    }
}
