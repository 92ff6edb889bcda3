//! Batch format selection and JSON body encoding.
//!
//! The batch `Content-Type` decides the wire format once, at reader or
//! writer construction:
//!
//! | Content-Type | Format |
//! |--------------|--------|
//! | `multipart/mixed; boundary=<b>` | [`BatchFormat::Mime`] |
//! | `application/json` | [`BatchFormat::Json`] |
//! | anything else | [`BatchError::UnsupportedContentType`] |
//!
//! # Examples
//!
//! ```
//! use odata_batch::BatchFormat;
//!
//! let format = BatchFormat::select("multipart/mixed; boundary=batch_36522ad7").unwrap();
//! assert_eq!(format, BatchFormat::Mime { boundary: "batch_36522ad7".into() });
//!
//! assert!(BatchFormat::select("text/plain").is_err());
//! ```

use super::constants::{boundaries, media_types};
use super::headers::is_valid_boundary;
use crate::batch::error::{BatchError, Result};
use crate::batch::types::MessageKind;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::value::RawValue;

/// Wire format of a batch payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchFormat {
    Mime { boundary: String },
    Json,
}

impl BatchFormat {
    /// Picks the format from a batch `Content-Type` header value.
    pub fn select(content_type: &str) -> Result<Self> {
        let (essence, params) = parse_media_type(content_type);
        match essence.as_str() {
            media_types::MULTIPART_MIXED => {
                let boundary = params
                    .into_iter()
                    .find(|(k, _)| k == "boundary")
                    .map(|(_, v)| v)
                    .ok_or_else(|| {
                        BatchError::malformed(format!(
                            "multipart batch content type '{}' has no boundary parameter",
                            content_type
                        ))
                    })?;
                if !is_valid_boundary(&boundary) {
                    return Err(BatchError::malformed(format!(
                        "invalid multipart boundary '{}'",
                        boundary
                    )));
                }
                Ok(BatchFormat::Mime { boundary })
            }
            media_types::APPLICATION_JSON => Ok(BatchFormat::Json),
            _ => Err(BatchError::UnsupportedContentType(content_type.to_string())),
        }
    }

    /// A multipart format with a fresh `batch_<uuid>` / `batchresponse_<uuid>` boundary.
    pub fn new_mime(kind: MessageKind) -> Self {
        let prefix = match kind {
            MessageKind::Request => boundaries::BATCH_REQUEST,
            MessageKind::Response => boundaries::BATCH_RESPONSE,
        };
        BatchFormat::Mime {
            boundary: format!("{}{}", prefix, uuid::Uuid::new_v4()),
        }
    }

    /// The `Content-Type` header value announcing this format.
    pub fn content_type(&self) -> String {
        match self {
            BatchFormat::Mime { boundary } => {
                format!("{}; boundary={}", media_types::MULTIPART_MIXED, boundary)
            }
            BatchFormat::Json => media_types::APPLICATION_JSON.to_string(),
        }
    }

    #[inline]
    pub fn is_json(&self) -> bool {
        matches!(self, BatchFormat::Json)
    }
}

/// Splits a media type into its lowercase essence and its parameters.
///
/// Parameter names are lowercased, values are unquoted.
pub fn parse_media_type(value: &str) -> (String, Vec<(String, String)>) {
    let mut parts = value.split(';');
    let essence = parts.next().unwrap_or("").trim().to_ascii_lowercase();
    let params = parts
        .filter_map(|p| {
            let (k, v) = p.split_once('=')?;
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(v);
            Some((k.trim().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    (essence, params)
}

/// How an operation body is represented in the JSON `body` property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyEncoding {
    /// Embedded verbatim as a JSON value.
    Json,
    /// A JSON string holding the text.
    Text,
    /// A JSON string holding base64.
    Binary,
    /// No `Content-Type`: JSON if it parses as an object or array, text otherwise.
    Unspecified,
}

impl BodyEncoding {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return BodyEncoding::Unspecified;
        };
        let (essence, _) = parse_media_type(content_type);
        if essence == media_types::APPLICATION_JSON || essence.ends_with("+json") {
            BodyEncoding::Json
        } else if essence.starts_with("text/")
            || essence.ends_with("/xml")
            || essence.ends_with("+xml")
            || essence == "application/x-www-form-urlencoded"
        {
            BodyEncoding::Text
        } else {
            BodyEncoding::Binary
        }
    }
}

/// Renders body bytes as the JSON text of a `body` property value.
///
/// Returns `None` for an empty body, which omits the property.
pub fn encode_json_body(body: &[u8], content_type: Option<&str>) -> Result<Option<String>> {
    if body.is_empty() {
        return Ok(None);
    }

    let encoded = match BodyEncoding::from_content_type(content_type) {
        BodyEncoding::Json => raw_json(body)?,
        BodyEncoding::Text => serde_json::to_string(utf8(body)?)?,
        BodyEncoding::Binary => serde_json::to_string(&STANDARD.encode(body))?,
        BodyEncoding::Unspecified => {
            let text = utf8(body)?;
            let trimmed = text.trim_start();
            if (trimmed.starts_with('{') || trimmed.starts_with('['))
                && serde_json::from_str::<&RawValue>(text).is_ok()
            {
                text.trim().to_string()
            } else {
                serde_json::to_string(text)?
            }
        }
    };
    Ok(Some(encoded))
}

/// Turns the raw JSON text of a `body` property back into body bytes.
pub fn decode_json_body(raw: &str, content_type: Option<&str>) -> Result<Bytes> {
    let raw = raw.trim();
    if raw == "null" {
        return Ok(Bytes::new());
    }

    let as_string = || -> Result<Option<String>> {
        if raw.starts_with('"') {
            Ok(Some(serde_json::from_str::<String>(raw)?))
        } else {
            Ok(None)
        }
    };

    match BodyEncoding::from_content_type(content_type) {
        BodyEncoding::Json => Ok(Bytes::copy_from_slice(raw.as_bytes())),
        BodyEncoding::Binary => match as_string()? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map(Bytes::from)
                .map_err(|e| BatchError::InvalidBody(format!("invalid base64 body: {}", e))),
            None => Ok(Bytes::copy_from_slice(raw.as_bytes())),
        },
        BodyEncoding::Text | BodyEncoding::Unspecified => match as_string()? {
            Some(text) => Ok(Bytes::from(text)),
            None => Ok(Bytes::copy_from_slice(raw.as_bytes())),
        },
    }
}

fn utf8(body: &[u8]) -> Result<&str> {
    std::str::from_utf8(body).map_err(|_| {
        BatchError::InvalidBody("body is not valid UTF-8; declare a binary Content-Type".into())
    })
}

fn raw_json(body: &[u8]) -> Result<String> {
    let text = utf8(body)?;
    serde_json::from_str::<&RawValue>(text)
        .map_err(|e| BatchError::InvalidBody(format!("JSON body does not parse: {}", e)))?;
    Ok(text.trim().to_string())
}
