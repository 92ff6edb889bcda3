//! JSON batch framing for the batch writer.

use super::{PendingHead, PendingOperation};
use crate::batch::error::Result;
use crate::batch::protocol::constants::json_props;
use crate::batch::protocol::encode_json_body;
use crate::batch::types::{HeaderList, MessageKind};
use bytes::BytesMut;

#[derive(Debug)]
pub(crate) struct JsonFramer {
    kind: MessageKind,
    has_items: bool,
}

impl JsonFramer {
    pub(crate) fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            has_items: false,
        }
    }

    pub(crate) fn start_batch(&mut self, out: &mut BytesMut) -> Result<()> {
        let name = match self.kind {
            MessageKind::Request => json_props::REQUESTS,
            MessageKind::Response => json_props::RESPONSES,
        };
        out.extend_from_slice(b"{");
        write_key(out, name)?;
        out.extend_from_slice(b"[");
        Ok(())
    }

    pub(crate) fn end_batch(&mut self, out: &mut BytesMut) {
        out.extend_from_slice(b"]}");
    }

    pub(crate) fn write_operation(&mut self, out: &mut BytesMut, op: &PendingOperation) -> Result<()> {
        let body = encode_json_body(&op.body, op.headers.content_type())?;

        if self.has_items {
            out.extend_from_slice(b",");
        }
        self.has_items = true;

        out.extend_from_slice(b"{");
        let mut first = true;
        let mut field = |out: &mut BytesMut, key: &str| -> Result<()> {
            if !first {
                out.extend_from_slice(b",");
            }
            first = false;
            write_key(out, key)
        };

        if let Some(id) = &op.content_id {
            field(out, json_props::ID)?;
            write_string(out, id)?;
        }
        if let Some(group_id) = &op.group_id {
            field(out, json_props::ATOMICITY_GROUP)?;
            write_string(out, group_id)?;
        }
        match &op.head {
            PendingHead::Request { method, target, .. } => {
                if !op.depends_on.is_empty() {
                    field(out, json_props::DEPENDS_ON)?;
                    out.extend_from_slice(serde_json::to_string(&*op.depends_on)?.as_bytes());
                }
                field(out, json_props::METHOD)?;
                write_string(out, method.as_str())?;
                field(out, json_props::URL)?;
                write_string(out, target)?;
            }
            PendingHead::Response { status } => {
                field(out, json_props::STATUS)?;
                out.extend_from_slice(status.as_u16().to_string().as_bytes());
            }
        }

        let host = match &op.head {
            PendingHead::Request { host, .. } => host.as_deref(),
            PendingHead::Response { .. } => None,
        };
        if host.is_some() || !op.headers.is_empty() {
            field(out, json_props::HEADERS)?;
            write_headers(out, host, &op.headers)?;
        }
        if let Some(body) = body {
            field(out, json_props::BODY)?;
            out.extend_from_slice(body.as_bytes());
        }
        out.extend_from_slice(b"}");
        Ok(())
    }
}

fn write_key(out: &mut BytesMut, key: &str) -> Result<()> {
    write_string(out, key)?;
    out.extend_from_slice(b":");
    Ok(())
}

fn write_string(out: &mut BytesMut, value: &str) -> Result<()> {
    out.extend_from_slice(serde_json::to_string(value)?.as_bytes());
    Ok(())
}

/// Repeated header names are folded into one comma-separated value.
fn write_headers(out: &mut BytesMut, host: Option<&str>, headers: &HeaderList) -> Result<()> {
    out.extend_from_slice(b"{");
    let mut written: Vec<&str> = Vec::new();
    if let Some(host) = host {
        write_key(out, "Host")?;
        write_string(out, host)?;
        written.push("Host");
    }
    for (name, _) in headers.iter() {
        if written.iter().any(|w| w.eq_ignore_ascii_case(name)) {
            continue;
        }
        if !written.is_empty() {
            out.extend_from_slice(b",");
        }
        let value = headers.get_all(name).collect::<Vec<_>>().join(", ");
        write_key(out, name)?;
        write_string(out, &value)?;
        written.push(name);
    }
    out.extend_from_slice(b"}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::types::DependsOnIds;
    use http::Method;

    #[test]
    fn test_request_item() {
        let mut framer = JsonFramer::new(MessageKind::Request);
        let mut out = BytesMut::new();
        framer.start_batch(&mut out).unwrap();

        let mut headers = HeaderList::new();
        headers.append("Content-Type", "application/json");
        let op = PendingOperation {
            head: PendingHead::Request {
                method: Method::PATCH,
                target: "Customers('ALFKI')".into(),
                host: None,
            },
            headers,
            content_id: Some("2".into()),
            group_id: Some("g".into()),
            depends_on: DependsOnIds::new(["1"]),
            body: BytesMut::from(&b"{\"Name\":\"y\"}"[..]),
            body_started: true,
        };
        framer.write_operation(&mut out, &op).unwrap();
        framer.end_batch(&mut out);

        let text = std::str::from_utf8(&out).unwrap();
        assert_eq!(
            text,
            r#"{"requests":[{"id":"2","atomicityGroup":"g","dependsOn":["1"],"method":"PATCH","url":"Customers('ALFKI')","headers":{"Content-Type":"application/json"},"body":{"Name":"y"}}]}"#
        );
        let parsed: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["requests"][0]["body"]["Name"], "y");
    }

    #[test]
    fn test_repeated_headers_are_folded() {
        let mut headers = HeaderList::new();
        headers.append("Prefer", "a");
        headers.append("Accept", "b");
        headers.append("prefer", "c");
        let mut out = BytesMut::new();
        write_headers(&mut out, None, &headers).unwrap();
        assert_eq!(&out[..], br#"{"Prefer":"a, c","Accept":"b"}"#);
    }
}
