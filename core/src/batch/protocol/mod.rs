//! Wire-level building blocks: format selection, tokenizers and line codecs.

pub mod constants;
pub mod format;
pub mod headers;
pub mod json;
pub mod mime;

pub use format::{decode_json_body, encode_json_body, parse_media_type, BatchFormat, BodyEncoding};
pub use json::{JsonToken, JsonTokenizer};
pub use mime::{BodyToken, BoundaryLine, HeaderToken, MimeTokenizer};
