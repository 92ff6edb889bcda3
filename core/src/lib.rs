//! odata_batch: reader and writer for OData batch payloads.
//!
//! A batch bundles many HTTP operations into one request or response. Two
//! wire formats are supported:
//!
//! - **multipart/mixed**: MIME parts, with changesets as nested multiparts.
//! - **application/json**: a `requests` / `responses` array, with atomicity
//!   groups and `dependsOn` lists (OData 4.01).
//!
//! The [`BatchReader`] walks a payload as a state machine and validates
//! Content-ID and `dependsOn` references through a [`DependencyResolver`].
//! The [`BatchWriter`] produces either format from the same call sequence.
//! With the `async` feature, [`AsyncBatchReader`] and [`AsyncBatchWriter`]
//! do the same over tokio I/O.

pub mod batch;

// Top-level re-exports for common usage
pub use crate::batch::error::{BatchError, Result, UsageError};
pub use crate::batch::types;
pub use crate::batch::types::{
    BatchReaderState, BodyStream, DependsOnIds, HeaderList, MessageKind, OperationRequestMessage,
    OperationResponseMessage, OperationUrl, PayloadUriOption, WriterState,
};
pub use crate::batch::{BatchConfig, BatchFormat, ContentIdScope, DependencyResolver, ProtocolVersion};
pub use crate::batch::{BatchReader, BatchWriter, OperationWriter};

#[cfg(feature = "async")]
pub use crate::batch::{AsyncBatchReader, AsyncBatchWriter};
