//! Configuration for batch readers and writers.
//!
//! # Configuration Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `version` | `4.0` | OData protocol version; selects Content-ID scoping |
//! | `base_uri` | none | Service root used to resolve and render relative URLs |
//! | `max_parts_per_batch` | 100 | Top-level operations plus changesets |
//! | `max_operations_per_changeset` | 1000 | Operations inside one changeset |
//! | `read_chunk_size` | 8192 | Bytes pulled from the source per fill |
//!
//! # Examples
//!
//! ```
//! use odata_batch::{BatchConfig, ProtocolVersion};
//!
//! let config = BatchConfig::default().with_version(ProtocolVersion::V401);
//! assert_eq!(config.max_parts_per_batch, 100);
//!
//! let config = BatchConfig::from_json(r#"{"version": "4.01", "max_parts_per_batch": 10}"#).unwrap();
//! assert_eq!(config.version, ProtocolVersion::V401);
//! assert_eq!(config.read_chunk_size, 8192);
//! ```

use crate::batch::error::{BatchError, Result};
use crate::batch::protocol::BatchFormat;
use crate::batch::resolver::ContentIdScope;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use url::Url;

/// OData protocol version carried in the `OData-Version` header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[default]
    #[serde(rename = "4.0")]
    V4,
    #[serde(rename = "4.01")]
    V401,
}

impl ProtocolVersion {
    /// Parses an `OData-Version` header value.
    pub fn from_header(value: &str) -> Result<Self> {
        match value.trim() {
            "4.0" | "4" => Ok(ProtocolVersion::V4),
            "4.01" => Ok(ProtocolVersion::V401),
            other => Err(BatchError::Config(format!(
                "unsupported OData-Version '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V4 => "4.0",
            ProtocolVersion::V401 => "4.01",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings shared by [`BatchReader`](crate::BatchReader) and
/// [`BatchWriter`](crate::BatchWriter).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub version: ProtocolVersion,

    /// Service root. Relative operation URLs are resolved against it.
    #[serde(default)]
    pub base_uri: Option<Url>,

    /// Limit on top-level operations plus changesets in one batch.
    #[serde(default = "default_max_parts_per_batch")]
    pub max_parts_per_batch: usize,

    #[serde(default = "default_max_operations_per_changeset")]
    pub max_operations_per_changeset: usize,

    /// Bytes requested from the source per read call.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

fn default_max_parts_per_batch() -> usize {
    100
}

fn default_max_operations_per_changeset() -> usize {
    1000
}

fn default_read_chunk_size() -> usize {
    8192
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            version: ProtocolVersion::default(),
            base_uri: None,
            max_parts_per_batch: default_max_parts_per_batch(),
            max_operations_per_changeset: default_max_operations_per_changeset(),
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

impl BatchConfig {
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_base_uri(mut self, base_uri: Url) -> Self {
        self.base_uri = Some(base_uri);
        self
    }

    pub fn with_max_parts_per_batch(mut self, max: usize) -> Self {
        self.max_parts_per_batch = max;
        self
    }

    pub fn with_max_operations_per_changeset(mut self, max: usize) -> Self {
        self.max_operations_per_changeset = max;
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: BatchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading batch configuration");
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_chunk_size == 0 {
            return Err(BatchError::Config("read_chunk_size must be positive".into()));
        }
        if self.max_parts_per_batch == 0 || self.max_operations_per_changeset == 0 {
            return Err(BatchError::Config("message quotas must be positive".into()));
        }
        Ok(())
    }

    /// Content-ID scoping for a payload in `format`.
    ///
    /// Multipart changesets at 4.0 keep their ids private; everything else
    /// shares one batch-wide namespace.
    pub fn content_id_scope(&self, format: &BatchFormat) -> ContentIdScope {
        match (format, self.version) {
            (BatchFormat::Mime { .. }, ProtocolVersion::V4) => ContentIdScope::Changeset,
            _ => ContentIdScope::Batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BatchConfig::default();
        assert_eq!(config.version, ProtocolVersion::V4);
        assert_eq!(config.max_parts_per_batch, 100);
        assert_eq!(config.max_operations_per_changeset, 1000);
        assert_eq!(config.read_chunk_size, 8192);
        assert!(config.base_uri.is_none());
    }

    #[test]
    fn test_from_json_partial() {
        let config = BatchConfig::from_json(
            r#"{"version": "4.01", "base_uri": "http://host/service/"}"#,
        )
        .unwrap();
        assert_eq!(config.version, ProtocolVersion::V401);
        assert_eq!(config.base_uri.unwrap().as_str(), "http://host/service/");
        assert_eq!(config.max_parts_per_batch, 100);
    }

    #[test]
    fn test_from_json_rejects_zero_chunk() {
        let err = BatchConfig::from_json(r#"{"read_chunk_size": 0}"#).unwrap_err();
        assert!(matches!(err, BatchError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_operations_per_changeset": 5}}"#).unwrap();
        let config = BatchConfig::load(file.path()).unwrap();
        assert_eq!(config.max_operations_per_changeset, 5);
    }

    #[test]
    fn test_protocol_version_from_header() {
        assert_eq!(ProtocolVersion::from_header("4.0").unwrap(), ProtocolVersion::V4);
        assert_eq!(ProtocolVersion::from_header(" 4.01").unwrap(), ProtocolVersion::V401);
        assert!(ProtocolVersion::from_header("3.0").is_err());
        assert_eq!(ProtocolVersion::V401.to_string(), "4.01");
    }

    #[test]
    fn test_content_id_scope() {
        let mime = BatchFormat::Mime {
            boundary: "b".into(),
        };
        let v4 = BatchConfig::default();
        let v401 = BatchConfig::default().with_version(ProtocolVersion::V401);
        assert_eq!(v4.content_id_scope(&mime), ContentIdScope::Changeset);
        assert_eq!(v401.content_id_scope(&mime), ContentIdScope::Batch);
        assert_eq!(v4.content_id_scope(&BatchFormat::Json), ContentIdScope::Batch);
    }
}
