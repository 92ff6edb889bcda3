//! OData batch protocol implementation.

pub mod config;
pub mod error;
pub mod protocol;
pub mod reader;
pub mod resolver;
pub mod types;
pub mod writer;

pub use config::{BatchConfig, ProtocolVersion};
pub use error::{BatchError, Result, UsageError};
pub use protocol::{BatchFormat, BodyEncoding};
pub use resolver::{ContentIdScope, DependencyResolver};
pub use types::{
    BatchReaderState, BodyStream, DependsOnIds, HeaderList, MessageKind, OperationRequestMessage,
    OperationResponseMessage, OperationUrl, PayloadUriOption, WriterState,
};

pub use reader::BatchReader;
#[cfg(feature = "async")]
pub use reader::AsyncBatchReader;
pub use writer::{BatchWriter, OperationWriter};
#[cfg(feature = "async")]
pub use writer::AsyncBatchWriter;
