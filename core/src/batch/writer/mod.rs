//! Batch writers.
//!
//! The writer mirrors the reader state machine:
//!
//! ```text
//! write_start_batch
//!   create_operation_*_message   -> OperationWriter (headers, body, finish)
//!   write_start_changeset
//!     create_operation_*_message
//!   write_end_changeset
//! write_end_batch
//! ```
//!
//! Calls out of this order fail with [`UsageError::InvalidWriterTransition`].
//! The writer trusts its caller: Content-IDs and `dependsOn` lists are
//! written as given, without validation.
//!
//! # Examples
//!
//! ```
//! use odata_batch::{BatchConfig, BatchWriter, MessageKind, PayloadUriOption};
//! use http::Method;
//!
//! let mut writer = BatchWriter::json(Vec::new(), MessageKind::Request, BatchConfig::default());
//! writer.write_start_batch()?;
//! let mut op = writer.create_operation_request_message(
//!     Method::GET,
//!     "Customers('ALFKI')",
//!     Some("1"),
//!     PayloadUriOption::RelativeUri,
//!     &[],
//! )?;
//! op.finish()?;
//! writer.write_end_batch()?;
//!
//! let bytes = writer.into_inner()?;
//! assert!(String::from_utf8(bytes).unwrap().starts_with(r#"{"requests":[{"id":"1""#));
//! # Ok::<(), odata_batch::BatchError>(())
//! ```

#[cfg(feature = "async")]
mod async_writer;
mod json;
mod mime;

#[cfg(feature = "async")]
pub use async_writer::AsyncBatchWriter;

use crate::batch::config::BatchConfig;
use crate::batch::error::{BatchError, Result, UsageError};
use crate::batch::protocol::headers::is_valid_boundary;
use crate::batch::protocol::BatchFormat;
use crate::batch::types::{
    DependsOnIds, HeaderList, MessageKind, OperationUrl, PayloadUriOption, WriterState,
};
use bytes::BytesMut;
use http::{Method, StatusCode};
use json::JsonFramer;
use mime::MimeFramer;
use std::io::{self, Write};

#[derive(Debug)]
pub(crate) enum PendingHead {
    Request {
        method: Method,
        target: String,
        host: Option<String>,
    },
    Response {
        status: StatusCode,
    },
}

/// An operation whose framing is not closed yet.
#[derive(Debug)]
pub(crate) struct PendingOperation {
    head: PendingHead,
    headers: HeaderList,
    content_id: Option<String>,
    group_id: Option<String>,
    depends_on: DependsOnIds,
    body: BytesMut,
    body_started: bool,
}

#[derive(Debug)]
enum Framer {
    Mime(MimeFramer),
    Json(JsonFramer),
}

/// Sans-IO writer state machine. Output accumulates in `out` until drained.
#[derive(Debug)]
pub(crate) struct WriterCore {
    framer: Framer,
    format: BatchFormat,
    kind: MessageKind,
    config: BatchConfig,
    state: WriterState,
    out: BytesMut,
    open: Option<PendingOperation>,
    group_id: Option<String>,
    parts: usize,
    changeset_operations: usize,
}

impl WriterCore {
    pub(crate) fn new(format: BatchFormat, kind: MessageKind, config: BatchConfig) -> Self {
        let framer = match &format {
            BatchFormat::Mime { boundary } => Framer::Mime(MimeFramer::new(boundary, kind)),
            BatchFormat::Json => Framer::Json(JsonFramer::new(kind)),
        };
        Self {
            framer,
            format,
            kind,
            config,
            state: WriterState::Start,
            out: BytesMut::new(),
            open: None,
            group_id: None,
            parts: 0,
            changeset_operations: 0,
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> WriterState {
        self.state
    }

    pub(crate) fn format(&self) -> &BatchFormat {
        &self.format
    }

    pub(crate) fn take_output(&mut self) -> BytesMut {
        self.out.split()
    }

    fn transition_error(&self, action: &'static str) -> BatchError {
        UsageError::InvalidWriterTransition {
            action,
            state: self.state,
        }
        .into()
    }

    /// Records a failure; usage errors leave the writer usable.
    fn fail(&mut self, error: BatchError) -> BatchError {
        if !error.is_usage_error() {
            tracing::warn!(error = %error, "batch writer failed");
            self.state = WriterState::Error;
        }
        error
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        result.map_err(|e| self.fail(e))
    }

    /// Closes the framing of an operation left open by a dropped `OperationWriter`.
    fn finalize_open(&mut self) -> Result<()> {
        let Some(op) = self.open.take() else {
            return Ok(());
        };
        self.write_operation(op)
    }

    fn write_operation(&mut self, mut op: PendingOperation) -> Result<()> {
        match &mut self.framer {
            Framer::Mime(framer) => {
                if !op.body_started {
                    framer.write_head(&mut self.out, &op);
                }
                op.body_started = true;
            }
            Framer::Json(framer) => {
                let result = framer.write_operation(&mut self.out, &op);
                return self.guard(result);
            }
        }
        Ok(())
    }

    fn write_body(&mut self, op: &mut PendingOperation, data: &[u8]) {
        match &mut self.framer {
            Framer::Mime(framer) => {
                if !op.body_started {
                    framer.write_head(&mut self.out, op);
                }
                self.out.extend_from_slice(data);
            }
            Framer::Json(_) => op.body.extend_from_slice(data),
        }
        op.body_started = true;
    }

    pub(crate) fn write_start_batch(&mut self) -> Result<()> {
        if self.state != WriterState::Start {
            return Err(self.transition_error("start the batch"));
        }
        if let Framer::Json(framer) = &mut self.framer {
            let result = framer.start_batch(&mut self.out);
            self.guard(result)?;
        }
        tracing::debug!(format = ?self.format, kind = ?self.kind, "batch writer started");
        self.state = WriterState::BatchStarted;
        Ok(())
    }

    fn begin_operation(&mut self, action: &'static str) -> Result<()> {
        match self.state {
            WriterState::BatchStarted
            | WriterState::ChangesetStarted
            | WriterState::OperationCreated
            | WriterState::ChangesetCompleted => {}
            _ => return Err(self.transition_error(action)),
        }
        self.finalize_open()?;
        match &self.group_id {
            Some(group_id) => {
                self.changeset_operations += 1;
                if self.changeset_operations > self.config.max_operations_per_changeset {
                    let error = BatchError::QuotaExceeded(format!(
                        "changeset '{}' has more than {} operations",
                        group_id, self.config.max_operations_per_changeset
                    ));
                    return Err(self.fail(error));
                }
            }
            None => self.count_part()?,
        }
        Ok(())
    }

    fn count_part(&mut self) -> Result<()> {
        self.parts += 1;
        if self.parts > self.config.max_parts_per_batch {
            let error = BatchError::QuotaExceeded(format!(
                "batch has more than {} parts",
                self.config.max_parts_per_batch
            ));
            return Err(self.fail(error));
        }
        Ok(())
    }

    pub(crate) fn create_request(
        &mut self,
        method: Method,
        url: &str,
        content_id: Option<&str>,
        option: PayloadUriOption,
        depends_on: &[String],
    ) -> Result<PendingOperation> {
        if self.kind != MessageKind::Request {
            return Err(UsageError::WrongMessageKind {
                expected: MessageKind::Request,
                actual: self.kind,
            }
            .into());
        }
        let url = OperationUrl::parse(url)?;
        self.begin_operation("create a request operation")?;

        let (target, host) = url.to_payload(option, self.config.base_uri.as_ref());
        let content_id = match (content_id, &self.format) {
            (Some(id), _) => Some(id.to_string()),
            (None, BatchFormat::Json) => Some(uuid::Uuid::new_v4().to_string()),
            (None, BatchFormat::Mime { .. }) => None,
        };
        self.state = WriterState::OperationCreated;
        Ok(PendingOperation {
            head: PendingHead::Request {
                method,
                target,
                host,
            },
            headers: HeaderList::new(),
            content_id,
            group_id: self.group_id.clone(),
            depends_on: DependsOnIds::new(depends_on.iter().cloned()),
            body: BytesMut::new(),
            body_started: false,
        })
    }

    pub(crate) fn create_response(&mut self, content_id: Option<&str>) -> Result<PendingOperation> {
        if self.kind != MessageKind::Response {
            return Err(UsageError::WrongMessageKind {
                expected: MessageKind::Response,
                actual: self.kind,
            }
            .into());
        }
        self.begin_operation("create a response operation")?;
        self.state = WriterState::OperationCreated;
        Ok(PendingOperation {
            head: PendingHead::Response {
                status: StatusCode::OK,
            },
            headers: HeaderList::new(),
            content_id: content_id.map(str::to_string),
            group_id: self.group_id.clone(),
            depends_on: DependsOnIds::empty(),
            body: BytesMut::new(),
            body_started: false,
        })
    }

    /// Opens a changeset; `None` generates a fresh group id.
    pub(crate) fn write_start_changeset(&mut self, group_id: Option<&str>) -> Result<String> {
        let allowed = matches!(
            self.state,
            WriterState::BatchStarted | WriterState::OperationCreated | WriterState::ChangesetCompleted
        );
        if !allowed || self.group_id.is_some() {
            return Err(self.transition_error("start a changeset"));
        }
        let group_id = match group_id {
            Some("") => return Err(UsageError::NullGroupId.into()),
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        if let Framer::Mime(framer) = &self.framer {
            if !is_valid_boundary(&framer.changeset_boundary(&group_id)) {
                return Err(UsageError::InvalidGroupId(group_id).into());
            }
        }

        self.finalize_open()?;
        self.count_part()?;
        if let Framer::Mime(framer) = &mut self.framer {
            framer.start_changeset(&mut self.out, &group_id);
        }
        tracing::debug!(group_id = %group_id, "changeset started");
        self.group_id = Some(group_id.clone());
        self.changeset_operations = 0;
        self.state = WriterState::ChangesetStarted;
        Ok(group_id)
    }

    pub(crate) fn write_end_changeset(&mut self) -> Result<()> {
        let allowed = matches!(
            self.state,
            WriterState::ChangesetStarted | WriterState::OperationCreated
        );
        if !allowed || self.group_id.is_none() {
            return Err(self.transition_error("end a changeset"));
        }
        self.finalize_open()?;
        if let Framer::Mime(framer) = &mut self.framer {
            framer.end_changeset(&mut self.out);
        }
        self.group_id = None;
        self.state = WriterState::ChangesetCompleted;
        Ok(())
    }

    pub(crate) fn write_end_batch(&mut self) -> Result<()> {
        let allowed = matches!(
            self.state,
            WriterState::BatchStarted | WriterState::OperationCreated | WriterState::ChangesetCompleted
        );
        if !allowed || self.group_id.is_some() {
            return Err(self.transition_error("end the batch"));
        }
        self.finalize_open()?;
        match &mut self.framer {
            Framer::Mime(framer) => framer.end_batch(&mut self.out),
            Framer::Json(framer) => framer.end_batch(&mut self.out),
        }
        tracing::debug!(parts = self.parts, "batch writer completed");
        self.state = WriterState::BatchCompleted;
        Ok(())
    }
}

/// Scope for writing one operation's headers and body.
///
/// Dropping it without [`finish`](Self::finish) leaves the operation open;
/// the next writer call closes it.
#[derive(Debug)]
pub struct OperationWriter<'a> {
    core: &'a mut WriterCore,
    op: Option<PendingOperation>,
}

impl<'a> OperationWriter<'a> {
    fn new(core: &'a mut WriterCore, op: PendingOperation) -> Self {
        Self { core, op: Some(op) }
    }

    fn pending(&mut self) -> Result<&mut PendingOperation> {
        self.op.as_mut().ok_or_else(|| {
            UsageError::InvalidWriterTransition {
                action: "write to a finished operation",
                state: WriterState::OperationCreated,
            }
            .into()
        })
    }

    /// Sets a header, replacing earlier values of the same name.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let op = self.pending()?;
        if op.body_started {
            return Err(UsageError::HeadersFrozen.into());
        }
        op.headers.insert(name, value);
        Ok(())
    }

    /// Adds a header, keeping earlier values of the same name.
    pub fn append_header(&mut self, name: &str, value: &str) -> Result<()> {
        let op = self.pending()?;
        if op.body_started {
            return Err(UsageError::HeadersFrozen.into());
        }
        op.headers.append(name, value);
        Ok(())
    }

    /// Status of a response operation. Defaults to `200 OK`.
    pub fn set_status(&mut self, status: StatusCode) -> Result<()> {
        let op = self.pending()?;
        if op.body_started {
            return Err(UsageError::HeadersFrozen.into());
        }
        match &mut op.head {
            PendingHead::Response { status: current } => {
                *current = status;
                Ok(())
            }
            PendingHead::Request { .. } => Err(UsageError::StatusOnRequest.into()),
        }
    }

    pub fn content_id(&self) -> Option<&str> {
        self.op.as_ref().and_then(|op| op.content_id.as_deref())
    }

    pub fn group_id(&self) -> Option<&str> {
        self.op.as_ref().and_then(|op| op.group_id.as_deref())
    }

    pub fn write_body(&mut self, data: &[u8]) -> Result<()> {
        let mut op = self
            .op
            .take()
            .ok_or_else(|| BatchError::from(UsageError::InvalidWriterTransition {
                action: "write to a finished operation",
                state: WriterState::OperationCreated,
            }))?;
        self.core.write_body(&mut op, data);
        self.op = Some(op);
        Ok(())
    }

    /// Closes the operation's framing.
    pub fn finish(mut self) -> Result<()> {
        match self.op.take() {
            Some(op) => self.core.write_operation(op),
            None => Ok(()),
        }
    }
}

impl Write for OperationWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_body(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for OperationWriter<'_> {
    fn drop(&mut self) {
        if let Some(op) = self.op.take() {
            self.core.open = Some(op);
        }
    }
}

/// Synchronous batch writer.
///
/// Framing is pushed to the sink after every batch-level call; operation
/// bodies are buffered until the next one.
#[derive(Debug)]
pub struct BatchWriter<W: Write> {
    sink: W,
    core: WriterCore,
}

impl<W: Write> BatchWriter<W> {
    pub fn new(sink: W, format: BatchFormat, kind: MessageKind, config: BatchConfig) -> Self {
        Self {
            sink,
            core: WriterCore::new(format, kind, config),
        }
    }

    /// Multipart writer with a generated batch boundary.
    pub fn mime(sink: W, kind: MessageKind, config: BatchConfig) -> Self {
        Self::new(sink, BatchFormat::new_mime(kind), kind, config)
    }

    pub fn json(sink: W, kind: MessageKind, config: BatchConfig) -> Self {
        Self::new(sink, BatchFormat::Json, kind, config)
    }

    /// `Content-Type` header value for the produced payload.
    pub fn content_type(&self) -> String {
        self.core.format().content_type()
    }

    #[inline]
    pub fn state(&self) -> WriterState {
        self.core.state()
    }

    pub fn write_start_batch(&mut self) -> Result<()> {
        self.core.write_start_batch()?;
        self.drain()
    }

    pub fn create_operation_request_message(
        &mut self,
        method: Method,
        url: &str,
        content_id: Option<&str>,
        payload_uri_option: PayloadUriOption,
        depends_on_ids: &[String],
    ) -> Result<OperationWriter<'_>> {
        let op = self
            .core
            .create_request(method, url, content_id, payload_uri_option, depends_on_ids)?;
        self.drain()?;
        Ok(OperationWriter::new(&mut self.core, op))
    }

    pub fn create_operation_response_message(
        &mut self,
        content_id: Option<&str>,
    ) -> Result<OperationWriter<'_>> {
        let op = self.core.create_response(content_id)?;
        self.drain()?;
        Ok(OperationWriter::new(&mut self.core, op))
    }

    /// Opens a changeset with a generated group id, which is returned.
    pub fn write_start_changeset(&mut self) -> Result<String> {
        let group_id = self.core.write_start_changeset(None)?;
        self.drain()?;
        Ok(group_id)
    }

    /// Opens a changeset with an explicit group id. An empty id is rejected.
    pub fn write_start_changeset_with_id(&mut self, group_id: &str) -> Result<String> {
        let group_id = self.core.write_start_changeset(Some(group_id))?;
        self.drain()?;
        Ok(group_id)
    }

    pub fn write_end_changeset(&mut self) -> Result<()> {
        self.core.write_end_changeset()?;
        self.drain()
    }

    pub fn write_end_batch(&mut self) -> Result<()> {
        self.core.write_end_batch()?;
        self.drain()?;
        self.sink.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.drain()?;
        self.sink.flush()?;
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.sink)
    }

    fn drain(&mut self) -> Result<()> {
        let out = self.core.take_output();
        if !out.is_empty() {
            self.sink.write_all(&out)?;
        }
        Ok(())
    }
}
