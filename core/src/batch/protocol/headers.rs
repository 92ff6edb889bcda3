//! Start-line and header-line parsing and formatting for framed operations.

use super::constants::{boundaries, HTTP_VERSION};
use crate::batch::error::{BatchError, Result};
use bytes::BytesMut;
use http::{Method, StatusCode};
use once_cell::sync::Lazy;
use regex::Regex;

static STATUS_LINE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^HTTP/1\.1 (\d{3})(?: .*)?$").expect("valid regex"));

/// Parse a `Name: value` line.
pub fn parse_header_line(line: &str) -> Result<(String, String)> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| BatchError::malformed(format!("header line without ':': '{}'", line)))?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(BatchError::malformed(format!("invalid header name in '{}'", line)));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Append a `Name: value\r\n` line.
pub fn write_header(buffer: &mut BytesMut, key: &str, value: &str) {
    buffer.extend_from_slice(key.as_bytes());
    buffer.extend_from_slice(b": ");
    buffer.extend_from_slice(value.as_bytes());
    buffer.extend_from_slice(b"\r\n");
}

/// Parse `METHOD SP URL SP HTTP/1.1`.
///
/// The method ends at the first space and the version starts after the last
/// one; everything in between is the URL, spaces included.
pub fn parse_request_line(line: &str) -> Result<(Method, String)> {
    let invalid = || {
        BatchError::malformed(format!(
            "invalid request line '{}': expected 'METHOD URL {}'",
            line, HTTP_VERSION
        ))
    };
    let (method, rest) = line.split_once(' ').ok_or_else(invalid)?;
    let (url, version) = rest.rsplit_once(' ').ok_or_else(invalid)?;
    if version != HTTP_VERSION {
        return Err(BatchError::malformed(format!(
            "unsupported HTTP version '{}' in request line",
            version
        )));
    }
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| BatchError::malformed(format!("invalid HTTP method '{}'", method)))?;
    if url.trim().is_empty() {
        return Err(BatchError::malformed("request line has an empty URL"));
    }
    Ok((method, url.to_string()))
}

/// Parse `HTTP/1.1 SP CODE [SP reason]`.
pub fn parse_status_line(line: &str) -> Result<StatusCode> {
    let caps = STATUS_LINE_REGEX
        .captures(line)
        .ok_or_else(|| BatchError::malformed(format!("invalid status line '{}'", line)))?;
    let code = caps
        .get(1)
        .map(|m| m.as_str())
        .unwrap_or_default();
    StatusCode::from_bytes(code.as_bytes())
        .map_err(|_| BatchError::malformed(format!("invalid status code '{}'", code)))
}

#[inline]
pub fn format_request_line(method: &Method, target: &str) -> String {
    format!("{} {} {}", method, target, HTTP_VERSION)
}

pub fn format_status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {} {}", HTTP_VERSION, status.as_u16(), reason),
        None => format!("{} {}", HTTP_VERSION, status.as_u16()),
    }
}

/// RFC 2046 boundary: 1 to 70 `bchars`, not ending in a space.
pub fn is_valid_boundary(boundary: &str) -> bool {
    !boundary.is_empty()
        && boundary.len() <= boundaries::MAX_LENGTH
        && !boundary.ends_with(' ')
        && boundary.chars().all(|c| {
            c.is_ascii_alphanumeric() || "'()+_,-./:=? ".contains(c)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_line() {
        let (k, v) = parse_header_line("Content-Type:  application/http ").unwrap();
        assert_eq!(k, "Content-Type");
        assert_eq!(v, "application/http");
    }

    #[test]
    fn test_parse_header_line_without_colon() {
        assert!(matches!(
            parse_header_line("not a header"),
            Err(BatchError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_parse_request_line() {
        let (method, url) = parse_request_line("PATCH Customers('ALFKI') HTTP/1.1").unwrap();
        assert_eq!(method, Method::PATCH);
        assert_eq!(url, "Customers('ALFKI')");
    }

    #[test]
    fn test_parse_request_line_rejects_wrong_version() {
        assert!(parse_request_line("GET Customers HTTP/2").is_err());
        assert!(parse_request_line("GET Customers").is_err());
        assert!(parse_request_line("GET  HTTP/1.1").is_err());
    }

    #[test]
    fn test_parse_request_line_keeps_spaces_in_url() {
        let (method, url) =
            parse_request_line("GET Customers?$filter=Name eq 'x' HTTP/1.1").unwrap();
        assert_eq!(method, Method::GET);
        assert_eq!(url, "Customers?$filter=Name eq 'x'");
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(
            parse_status_line("HTTP/1.1 201 Created").unwrap(),
            StatusCode::CREATED
        );
        assert_eq!(parse_status_line("HTTP/1.1 204").unwrap(), StatusCode::NO_CONTENT);
        assert!(parse_status_line("HTTP/1.1 abc").is_err());
    }

    #[test]
    fn test_format_lines() {
        assert_eq!(
            format_request_line(&Method::GET, "Products"),
            "GET Products HTTP/1.1"
        );
        assert_eq!(format_status_line(StatusCode::OK), "HTTP/1.1 200 OK");
    }

    #[test]
    fn test_write_header() {
        let mut buf = BytesMut::new();
        write_header(&mut buf, "Content-ID", "1");
        assert_eq!(&buf[..], b"Content-ID: 1\r\n");
    }

    #[test]
    fn test_is_valid_boundary() {
        assert!(is_valid_boundary("changeset_77162fcd-b8da-41ac-a9f8-9357efbbd621"));
        assert!(!is_valid_boundary(""));
        assert!(!is_valid_boundary("a;b"));
        assert!(!is_valid_boundary("trailing "));
        assert!(!is_valid_boundary(&"x".repeat(71)));
    }
}
