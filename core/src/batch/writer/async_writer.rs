//! Asynchronous batch writer over tokio I/O.

use super::{OperationWriter, WriterCore};
use crate::batch::config::BatchConfig;
use crate::batch::error::{BatchError, Result};
use crate::batch::protocol::BatchFormat;
use crate::batch::types::{MessageKind, PayloadUriOption, WriterState};
use http::Method;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Batch writer that flushes framing to a tokio sink.
///
/// Operation writers are synchronous: their output is buffered and pushed
/// by the next awaited call.
#[derive(Debug)]
pub struct AsyncBatchWriter<W> {
    sink: W,
    core: WriterCore,
    cancel: CancellationToken,
}

impl<W: AsyncWrite + Unpin> AsyncBatchWriter<W> {
    pub fn new(sink: W, format: BatchFormat, kind: MessageKind, config: BatchConfig) -> Self {
        Self {
            sink,
            core: WriterCore::new(format, kind, config),
            cancel: CancellationToken::new(),
        }
    }

    pub fn mime(sink: W, kind: MessageKind, config: BatchConfig) -> Self {
        Self::new(sink, BatchFormat::new_mime(kind), kind, config)
    }

    pub fn json(sink: W, kind: MessageKind, config: BatchConfig) -> Self {
        Self::new(sink, BatchFormat::Json, kind, config)
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn content_type(&self) -> String {
        self.core.format().content_type()
    }

    #[inline]
    pub fn state(&self) -> WriterState {
        self.core.state()
    }

    pub async fn write_start_batch(&mut self) -> Result<()> {
        self.core.write_start_batch()?;
        self.drain().await
    }

    pub async fn create_operation_request_message(
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
        self.drain().await?;
        Ok(OperationWriter::new(&mut self.core, op))
    }

    pub async fn create_operation_response_message(
        &mut self,
        content_id: Option<&str>,
    ) -> Result<OperationWriter<'_>> {
        let op = self.core.create_response(content_id)?;
        self.drain().await?;
        Ok(OperationWriter::new(&mut self.core, op))
    }

    pub async fn write_start_changeset(&mut self) -> Result<String> {
        let group_id = self.core.write_start_changeset(None)?;
        self.drain().await?;
        Ok(group_id)
    }

    pub async fn write_start_changeset_with_id(&mut self, group_id: &str) -> Result<String> {
        let group_id = self.core.write_start_changeset(Some(group_id))?;
        self.drain().await?;
        Ok(group_id)
    }

    pub async fn write_end_changeset(&mut self) -> Result<()> {
        self.core.write_end_changeset()?;
        self.drain().await
    }

    pub async fn write_end_batch(&mut self) -> Result<()> {
        self.core.write_end_batch()?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.drain().await?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(BatchError::Cancelled),
            res = self.sink.flush() => res?,
        }
        Ok(())
    }

    pub async fn into_inner(mut self) -> Result<W> {
        self.flush().await?;
        Ok(self.sink)
    }

    async fn drain(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BatchError::Cancelled);
        }
        let out = self.core.take_output();
        if out.is_empty() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(BatchError::Cancelled),
            res = self.sink.write_all(&out) => res?,
        }
        Ok(())
    }
}
