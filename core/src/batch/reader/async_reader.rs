//! Asynchronous batch reader over tokio I/O.

use super::machine::ReaderCore;
use crate::batch::config::BatchConfig;
use crate::batch::error::{BatchError, Result};
use crate::batch::protocol::BatchFormat;
use crate::batch::resolver::DependencyResolver;
use crate::batch::types::{
    BatchReaderState, MessageKind, OperationRequestMessage, OperationResponseMessage,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// Batch reader that awaits its source only when the buffered input runs out.
///
/// Every fill checks the cancellation token first; a cancelled reader fails
/// with [`BatchError::Cancelled`] and should be dropped.
#[derive(Debug)]
pub struct AsyncBatchReader<R> {
    source: R,
    core: ReaderCore,
    chunk: Vec<u8>,
    cancel: CancellationToken,
}

impl<R: AsyncRead + Unpin> AsyncBatchReader<R> {
    pub fn new(source: R, content_type: &str, kind: MessageKind, config: BatchConfig) -> Result<Self> {
        let chunk = vec![0u8; config.read_chunk_size];
        let core = ReaderCore::new(content_type, kind, config)?;
        Ok(Self {
            source,
            core,
            chunk,
            cancel: CancellationToken::new(),
        })
    }

    pub fn for_requests(source: R, content_type: &str, config: BatchConfig) -> Result<Self> {
        Self::new(source, content_type, MessageKind::Request, config)
    }

    pub fn for_responses(source: R, content_type: &str, config: BatchConfig) -> Result<Self> {
        Self::new(source, content_type, MessageKind::Response, config)
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn read(&mut self) -> Result<bool> {
        if self.core.state() == BatchReaderState::Completed {
            return Ok(false);
        }
        loop {
            if let Some(state) = self.core.step()? {
                return Ok(state != BatchReaderState::Completed);
            }
            self.fill().await?;
        }
    }

    #[inline]
    pub fn state(&self) -> BatchReaderState {
        self.core.state()
    }

    pub fn current_group_id(&self) -> Option<&str> {
        self.core.current_group_id()
    }

    pub fn format(&self) -> &BatchFormat {
        self.core.format()
    }

    pub fn resolver(&self) -> &DependencyResolver {
        self.core.resolver()
    }

    pub fn resolver_mut(&mut self) -> &mut DependencyResolver {
        self.core.resolver_mut()
    }

    pub async fn create_operation_request_message(&mut self) -> Result<OperationRequestMessage> {
        loop {
            if let Some(message) = self.core.poll_request_message()? {
                return Ok(message);
            }
            self.fill().await?;
        }
    }

    pub async fn create_operation_response_message(&mut self) -> Result<OperationResponseMessage> {
        loop {
            if let Some(message) = self.core.poll_response_message()? {
                return Ok(message);
            }
            self.fill().await?;
        }
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    async fn fill(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(self.core.fail(BatchError::Cancelled));
        }
        if self.core.is_finished() {
            return Err(self.core.fail(BatchError::malformed("unexpected end of stream")));
        }
        let res = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BatchError::Cancelled),
            res = self.source.read(&mut self.chunk) => res.map_err(BatchError::from),
        };
        let n = match res {
            Ok(n) => n,
            Err(e) => return Err(self.core.fail(e)),
        };
        if n == 0 {
            tracing::trace!("batch source exhausted");
            self.core.finish();
        } else {
            self.core.feed(&self.chunk[..n]);
        }
        Ok(())
    }
}
