//! Operation URLs and the `$<content-id>` reference form.
//!
//! A batched operation addresses its resource in one of three ways:
//!
//! | Form | Example |
//! |------|---------|
//! | Absolute | `http://host/service/Customers('ALFKI')` |
//! | Relative | `Customers('ALFKI')`, or `/service/Customers` with a `Host` header |
//! | Reference | `$1/Orders` (the resource created by operation `1`) |

use crate::batch::error::{BatchError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// `$name` tokens that address service resources rather than operations.
const SYSTEM_RESOURCES: &[&str] = &["metadata", "batch", "entity", "all", "crossjoin", "root"];

static CONTENT_ID_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|/)\$([A-Za-z0-9_.~\-]+)").expect("valid regex"));

/// How a writer renders operation URLs on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadUriOption {
    /// `POST http://host/service/Customers HTTP/1.1`
    #[default]
    AbsoluteUri,
    /// `POST /service/Customers HTTP/1.1` followed by `Host: host`
    AbsoluteUriUsingHostHeader,
    /// `POST Customers HTTP/1.1`, relative to the service root
    RelativeUri,
}

/// URL of one batched operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationUrl {
    Absolute(Url),
    Relative(String),
    /// `$<content_id><rest>`, where `rest` is empty or starts with `/`, `?` or `(`.
    Reference { content_id: String, rest: String },
}

impl OperationUrl {
    /// Classifies a raw URL as found in a request line or JSON `url` property.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(BatchError::malformed("operation URL is empty"));
        }

        if let Some(tail) = raw.strip_prefix('$') {
            let end = tail
                .find(|c: char| matches!(c, '/' | '?' | '(' | '#'))
                .unwrap_or(tail.len());
            let id = &tail[..end];
            if !id.is_empty() && !SYSTEM_RESOURCES.contains(&id) {
                return Ok(OperationUrl::Reference {
                    content_id: id.to_string(),
                    rest: tail[end..].to_string(),
                });
            }
        }

        match Url::parse(raw) {
            Ok(url) => Ok(OperationUrl::Absolute(url)),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(OperationUrl::Relative(raw.to_string())),
            Err(e) => Err(BatchError::malformed(format!("invalid operation URL '{}': {}", raw, e))),
        }
    }

    /// The Content-ID this URL is rooted at, for `$<id>` references.
    pub fn reference_id(&self) -> Option<&str> {
        match self {
            OperationUrl::Reference { content_id, .. } => Some(content_id),
            _ => None,
        }
    }

    /// Returns `true` if `$<content_id>` appears as a path segment anywhere in the URL.
    pub fn mentions_content_id(&self, content_id: &str) -> bool {
        let raw = self.to_string();
        CONTENT_ID_REFERENCE
            .captures_iter(&raw)
            .any(|caps| caps.get(1).is_some_and(|m| m.as_str() == content_id))
    }

    /// Resolves the URL to an absolute one.
    ///
    /// Relative URLs starting with `/` are combined with `host` when given
    /// (the `Host`-header form), otherwise resolved against `base`.
    /// References cannot be resolved here; see
    /// [`DependencyResolver::substitute`](crate::DependencyResolver::substitute).
    pub fn resolve(&self, base: Option<&Url>, host: Option<&str>) -> Option<Url> {
        match self {
            OperationUrl::Absolute(url) => Some(url.clone()),
            OperationUrl::Relative(path) => {
                if let (true, Some(host)) = (path.starts_with('/'), host) {
                    let scheme = base.map(Url::scheme).unwrap_or("http");
                    return Url::parse(&format!("{}://{}{}", scheme, host, path)).ok();
                }
                let root = service_root(base?);
                root.join(path).ok()
            }
            OperationUrl::Reference { .. } => None,
        }
    }

    /// Renders the URL for the wire, returning the target and an optional `Host` value.
    pub fn to_payload(&self, option: PayloadUriOption, base: Option<&Url>) -> (String, Option<String>) {
        if let OperationUrl::Reference { .. } = self {
            return (self.to_string(), None);
        }

        match option {
            PayloadUriOption::AbsoluteUri => match self.resolve(base, None) {
                Some(url) => (url.to_string(), None),
                None => (self.to_string(), None),
            },
            PayloadUriOption::RelativeUri => match (self, base) {
                (OperationUrl::Absolute(url), Some(base)) => {
                    let root = service_root(base);
                    match url.as_str().strip_prefix(root.as_str()) {
                        Some(relative) => (relative.to_string(), None),
                        None => (url.to_string(), None),
                    }
                }
                _ => (self.to_string(), None),
            },
            PayloadUriOption::AbsoluteUriUsingHostHeader => match self.resolve(base, None) {
                Some(url) => {
                    let mut target = url.path().to_string();
                    if let Some(query) = url.query() {
                        target.push('?');
                        target.push_str(query);
                    }
                    let host = url.host_str().map(|h| match url.port() {
                        Some(port) => format!("{}:{}", h, port),
                        None => h.to_string(),
                    });
                    (target, host)
                }
                None => (self.to_string(), None),
            },
        }
    }
}

impl fmt::Display for OperationUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationUrl::Absolute(url) => f.write_str(url.as_str()),
            OperationUrl::Relative(path) => f.write_str(path),
            OperationUrl::Reference { content_id, rest } => write!(f, "${}{}", content_id, rest),
        }
    }
}

/// The base URI with a trailing slash, so relative paths extend it instead of replacing its last segment.
pub(crate) fn service_root(base: &Url) -> Url {
    if base.path().ends_with('/') {
        return base.clone();
    }
    let mut root = base.clone();
    let path = format!("{}/", base.path());
    root.set_path(&path);
    root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://host/service").unwrap()
    }

    #[test]
    fn test_parse_absolute() {
        let url = OperationUrl::parse("http://host/service/Customers").unwrap();
        assert!(matches!(url, OperationUrl::Absolute(_)));
        assert_eq!(url.to_string(), "http://host/service/Customers");
    }

    #[test]
    fn test_parse_relative() {
        let url = OperationUrl::parse("Customers('ALFKI')").unwrap();
        assert_eq!(url, OperationUrl::Relative("Customers('ALFKI')".into()));
    }

    #[test]
    fn test_parse_reference() {
        let url = OperationUrl::parse("$1/Orders").unwrap();
        assert_eq!(url.reference_id(), Some("1"));
        assert_eq!(url.to_string(), "$1/Orders");
    }

    #[test]
    fn test_system_resource_is_not_a_reference() {
        let url = OperationUrl::parse("$metadata").unwrap();
        assert_eq!(url.reference_id(), None);
        assert!(matches!(url, OperationUrl::Relative(_)));
    }

    #[test]
    fn test_parse_empty_is_malformed() {
        assert!(matches!(OperationUrl::parse("  "), Err(BatchError::MalformedFrame(_))));
    }

    #[test]
    fn test_mentions_content_id_matches_whole_token() {
        let url = OperationUrl::parse("$10/Orders").unwrap();
        assert!(url.mentions_content_id("10"));
        assert!(!url.mentions_content_id("1"));

        let nested = OperationUrl::parse("Customers/$2").unwrap();
        assert!(nested.mentions_content_id("2"));
    }

    #[test]
    fn test_resolve_relative_against_base() {
        let url = OperationUrl::parse("Customers").unwrap();
        let resolved = url.resolve(Some(&base()), None).unwrap();
        assert_eq!(resolved.as_str(), "http://host/service/Customers");
    }

    #[test]
    fn test_resolve_host_header_form() {
        let url = OperationUrl::parse("/service/Customers").unwrap();
        let resolved = url.resolve(None, Some("example.org:8080")).unwrap();
        assert_eq!(resolved.as_str(), "http://example.org:8080/service/Customers");
    }

    #[test]
    fn test_to_payload_relative_strips_service_root() {
        let url = OperationUrl::parse("http://host/service/Customers('ALFKI')").unwrap();
        let (target, host) = url.to_payload(PayloadUriOption::RelativeUri, Some(&base()));
        assert_eq!(target, "Customers('ALFKI')");
        assert!(host.is_none());
    }

    #[test]
    fn test_to_payload_host_header() {
        let url = OperationUrl::parse("Customers?$top=1").unwrap();
        let (target, host) =
            url.to_payload(PayloadUriOption::AbsoluteUriUsingHostHeader, Some(&base()));
        assert_eq!(target, "/service/Customers?$top=1");
        assert_eq!(host.as_deref(), Some("host"));
    }

    #[test]
    fn test_to_payload_keeps_references() {
        let url = OperationUrl::parse("$1").unwrap();
        let (target, _) = url.to_payload(PayloadUriOption::AbsoluteUri, Some(&base()));
        assert_eq!(target, "$1");
    }
}
