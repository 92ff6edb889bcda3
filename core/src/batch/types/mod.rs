//! Core types for OData batch payloads.

mod body;
mod headers;
mod operation;
mod operation_url;
mod state;

pub(crate) use body::BodyGuard;

pub use body::BodyStream;
pub use bytes::Bytes;
pub use headers::HeaderList;
pub use operation::{DependsOnIds, OperationRequestMessage, OperationResponseMessage};
pub use operation_url::{OperationUrl, PayloadUriOption};
pub use state::{BatchReaderState, MessageKind, WriterState};
