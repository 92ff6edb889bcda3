//! Batch readers.
//!
//! [`BatchReader`] pulls from a [`std::io::Read`] source; with the `async`
//! feature, [`AsyncBatchReader`] pulls from a tokio
//! [`AsyncRead`](tokio::io::AsyncRead). Both drive the same state machine and
//! only touch the source when the tokenizer runs out of buffered input.
//!
//! # Examples
//!
//! ```
//! use odata_batch::{BatchReader, BatchReaderState, BatchConfig};
//!
//! let payload = br#"{"requests": [
//!     {"id": "1", "method": "GET", "url": "Customers('ALFKI')"}
//! ]}"#;
//!
//! let mut reader = BatchReader::for_requests(&payload[..], "application/json", BatchConfig::default())?;
//! while reader.read()? {
//!     if reader.state() == BatchReaderState::Operation {
//!         let op = reader.create_operation_request_message()?;
//!         assert_eq!(op.method(), "GET");
//!     }
//! }
//! assert_eq!(reader.state(), BatchReaderState::Completed);
//! # Ok::<(), odata_batch::BatchError>(())
//! ```

#[cfg(feature = "async")]
mod async_reader;
mod json;
mod machine;
mod mime;

#[cfg(feature = "async")]
pub use async_reader::AsyncBatchReader;

use crate::batch::config::BatchConfig;
use crate::batch::error::{BatchError, Result};
use crate::batch::protocol::BatchFormat;
use crate::batch::resolver::DependencyResolver;
use crate::batch::types::{
    BatchReaderState, MessageKind, OperationRequestMessage, OperationResponseMessage,
};
use machine::ReaderCore;
use std::io::{self, Read};

/// Synchronous batch reader.
#[derive(Debug)]
pub struct BatchReader<R> {
    source: R,
    core: ReaderCore,
    chunk: Vec<u8>,
}

impl<R: Read> BatchReader<R> {
    /// Creates a reader for a batch with the given `Content-Type`.
    ///
    /// Fails immediately when the content type selects no known format.
    pub fn new(source: R, content_type: &str, kind: MessageKind, config: BatchConfig) -> Result<Self> {
        let chunk = vec![0u8; config.read_chunk_size];
        let core = ReaderCore::new(content_type, kind, config)?;
        Ok(Self {
            source,
            core,
            chunk,
        })
    }

    pub fn for_requests(source: R, content_type: &str, config: BatchConfig) -> Result<Self> {
        Self::new(source, content_type, MessageKind::Request, config)
    }

    pub fn for_responses(source: R, content_type: &str, config: BatchConfig) -> Result<Self> {
        Self::new(source, content_type, MessageKind::Response, config)
    }

    /// Moves to the next state.
    ///
    /// Returns `false` once the batch is completed, and on every call after that.
    pub fn read(&mut self) -> Result<bool> {
        if self.core.state() == BatchReaderState::Completed {
            return Ok(false);
        }
        loop {
            if let Some(state) = self.core.step()? {
                return Ok(state != BatchReaderState::Completed);
            }
            self.fill()?;
        }
    }

    #[inline]
    pub fn state(&self) -> BatchReaderState {
        self.core.state()
    }

    /// Id of the changeset the cursor is in.
    pub fn current_group_id(&self) -> Option<&str> {
        self.core.current_group_id()
    }

    pub fn format(&self) -> &BatchFormat {
        self.core.format()
    }

    pub fn config(&self) -> &BatchConfig {
        self.core.config()
    }

    pub fn resolver(&self) -> &DependencyResolver {
        self.core.resolver()
    }

    /// Access for registering operation locations used in `$<id>` substitution.
    pub fn resolver_mut(&mut self) -> &mut DependencyResolver {
        self.core.resolver_mut()
    }

    /// Message for the request at the cursor. Valid once per `Operation` state.
    pub fn create_operation_request_message(&mut self) -> Result<OperationRequestMessage> {
        loop {
            if let Some(message) = self.core.poll_request_message()? {
                return Ok(message);
            }
            self.fill()?;
        }
    }

    /// Message for the response at the cursor. Valid once per `Operation` state.
    pub fn create_operation_response_message(&mut self) -> Result<OperationResponseMessage> {
        loop {
            if let Some(message) = self.core.poll_response_message()? {
                return Ok(message);
            }
            self.fill()?;
        }
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    fn fill(&mut self) -> Result<()> {
        if self.core.is_finished() {
            return Err(self.core.fail(BatchError::malformed("unexpected end of stream")));
        }
        let n = loop {
            match self.source.read(&mut self.chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.core.fail(e.into())),
            }
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
