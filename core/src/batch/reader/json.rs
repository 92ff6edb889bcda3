//! JSON batch frame reader.
//!
//! Items of the `requests` / `responses` array become operation frames.
//! Changeset frames are synthesised from `atomicityGroup`: the reader looks
//! one item ahead, opening a changeset when the group changes to a new value
//! and closing it when the next item (or the end of the array) leaves it.

use super::machine::{Frame, OperationHead, ParsedOperation};
use crate::batch::error::{BatchError, Result};
use crate::batch::protocol::constants::json_props;
use crate::batch::protocol::{decode_json_body, JsonToken, JsonTokenizer};
use crate::batch::types::{HeaderList, MessageKind};
use http::{Method, StatusCode};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Envelope,
    EnvelopeKey,
    ItemsStart,
    Items,
    Trailer,
    Done,
}

/// Properties of one array item, filled in whatever order they appear.
#[derive(Debug, Default)]
struct PartialItem {
    id: Option<String>,
    group: Option<String>,
    depends_on: Vec<String>,
    method: Option<Method>,
    url: Option<String>,
    status: Option<StatusCode>,
    headers: HeaderList,
    body: Option<String>,
}

#[derive(Debug)]
pub(crate) struct JsonFrameReader {
    tokenizer: JsonTokenizer,
    kind: MessageKind,
    phase: Phase,
    items_seen: bool,
    partial: Option<PartialItem>,
    pending_key: Option<String>,
    lookahead: Option<ParsedOperation>,
    items_done: bool,
    current_group: Option<String>,
}

impl JsonFrameReader {
    pub(crate) fn new(kind: MessageKind) -> Self {
        Self {
            tokenizer: JsonTokenizer::new(),
            kind,
            phase: Phase::Envelope,
            items_seen: false,
            partial: None,
            pending_key: None,
            lookahead: None,
            items_done: false,
            current_group: None,
        }
    }

    pub(crate) fn feed(&mut self, data: &[u8]) {
        self.tokenizer.feed(data);
    }

    pub(crate) fn finish(&mut self) {
        self.tokenizer.finish();
    }

    fn array_name(&self) -> &'static str {
        match self.kind {
            MessageKind::Request => json_props::REQUESTS,
            MessageKind::Response => json_props::RESPONSES,
        }
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.phase {
                Phase::Envelope => match self.tokenizer.next_token()? {
                    None => return Ok(None),
                    Some(JsonToken::ObjectStart) => self.phase = Phase::EnvelopeKey,
                    Some(_) => {
                        return Err(BatchError::malformed("JSON batch must be an object"))
                    }
                },
                Phase::EnvelopeKey => match self.tokenizer.next_token()? {
                    None => return Ok(None),
                    Some(JsonToken::Key(key)) if key == self.array_name() && !self.items_seen => {
                        self.items_seen = true;
                        self.phase = Phase::ItemsStart;
                    }
                    Some(JsonToken::Key(key)) if key.starts_with('@') => {
                        self.pending_key = Some(key);
                        self.phase = Phase::Trailer;
                    }
                    Some(JsonToken::Key(key)) => {
                        return Err(BatchError::malformed(format!(
                            "unexpected property '{}' in JSON batch",
                            key
                        )))
                    }
                    Some(JsonToken::ObjectEnd) => {
                        if !self.items_seen {
                            return Err(BatchError::malformed(format!(
                                "JSON batch has no '{}' array",
                                self.array_name()
                            )));
                        }
                        self.phase = Phase::Done;
                    }
                    Some(other) => {
                        return Err(BatchError::malformed(format!(
                            "unexpected {:?} in JSON batch envelope",
                            other
                        )))
                    }
                },
                Phase::Trailer => {
                    // Skips the value of an envelope annotation.
                    if self.tokenizer.next_raw_value()?.is_none() {
                        return Ok(None);
                    }
                    self.pending_key = None;
                    self.phase = Phase::EnvelopeKey;
                }
                Phase::ItemsStart => match self.tokenizer.next_token()? {
                    None => return Ok(None),
                    Some(JsonToken::ArrayStart) => self.phase = Phase::Items,
                    Some(_) => {
                        return Err(BatchError::malformed(format!(
                            "'{}' must be an array",
                            self.array_name()
                        )))
                    }
                },
                Phase::Items => return self.next_item_frame(),
                Phase::Done => {
                    if !self.tokenizer.finish_document()? {
                        return Ok(None);
                    }
                    return Ok(Some(Frame::End));
                }
            }
        }
    }

    fn next_item_frame(&mut self) -> Result<Option<Frame>> {
        if self.lookahead.is_none() && !self.items_done {
            match self.parse_item()? {
                None => return Ok(None),
                Some(Some(op)) => self.lookahead = Some(op),
                Some(None) => self.items_done = true,
            }
        }

        let next_group = self.lookahead.as_ref().and_then(|op| op.group_id.clone());
        if let Some(current) = &self.current_group {
            if next_group.as_ref() != Some(current) {
                self.current_group = None;
                return Ok(Some(Frame::ChangesetEnd));
            }
        } else if let Some(group) = next_group {
            self.current_group = Some(group.clone());
            return Ok(Some(Frame::ChangesetStart(group)));
        }

        match self.lookahead.take() {
            Some(op) => Ok(Some(Frame::Operation(op))),
            None => {
                self.phase = Phase::EnvelopeKey;
                self.next_frame()
            }
        }
    }

    /// `Some(None)` at the end of the array.
    fn parse_item(&mut self) -> Result<Option<Option<ParsedOperation>>> {
        if self.partial.is_none() {
            match self.tokenizer.next_token()? {
                None => return Ok(None),
                Some(JsonToken::ObjectStart) => self.partial = Some(PartialItem::default()),
                Some(JsonToken::ArrayEnd) => return Ok(Some(None)),
                Some(_) => {
                    return Err(BatchError::malformed(format!(
                        "items of '{}' must be objects",
                        self.array_name()
                    )))
                }
            }
        }

        loop {
            if let Some(key) = self.pending_key.take() {
                let Some(raw) = self.tokenizer.next_raw_value()? else {
                    self.pending_key = Some(key);
                    return Ok(None);
                };
                let raw = std::str::from_utf8(&raw)
                    .map_err(|_| BatchError::malformed("JSON batch is not valid UTF-8"))?;
                self.assign(&key, raw)?;
                continue;
            }

            match self.tokenizer.next_token()? {
                None => return Ok(None),
                Some(JsonToken::Key(key)) => {
                    if !self.is_known_property(&key) {
                        return Err(BatchError::malformed(format!(
                            "unknown property '{}' in batch {}",
                            key,
                            self.item_name()
                        )));
                    }
                    self.pending_key = Some(key);
                }
                Some(JsonToken::ObjectEnd) => {
                    let item = self.partial.take().unwrap_or_default();
                    return self.finish_item(item).map(|op| Some(Some(op)));
                }
                Some(other) => {
                    return Err(BatchError::malformed(format!(
                        "unexpected {:?} in batch {}",
                        other,
                        self.item_name()
                    )))
                }
            }
        }
    }

    fn item_name(&self) -> &'static str {
        match self.kind {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
        }
    }

    fn is_known_property(&self, key: &str) -> bool {
        if key.starts_with('@') {
            return true;
        }
        let shared = [
            json_props::ID,
            json_props::ATOMICITY_GROUP,
            json_props::HEADERS,
            json_props::BODY,
        ];
        if shared.contains(&key) {
            return true;
        }
        match self.kind {
            MessageKind::Request => {
                [json_props::DEPENDS_ON, json_props::METHOD, json_props::URL].contains(&key)
            }
            MessageKind::Response => key == json_props::STATUS,
        }
    }

    fn assign(&mut self, key: &str, raw: &str) -> Result<()> {
        let Some(item) = self.partial.as_mut() else {
            return Err(BatchError::malformed("property outside of a batch item"));
        };
        if key.starts_with('@') {
            return Ok(());
        }
        if key == json_props::BODY {
            item.body = Some(raw.to_string());
            return Ok(());
        }
        if key == json_props::HEADERS {
            item.headers = parse_headers(raw)?;
            return Ok(());
        }

        let value: Value = serde_json::from_str(raw)?;
        match key {
            json_props::ID => item.id = optional_string(key, value)?,
            json_props::ATOMICITY_GROUP => item.group = optional_string(key, value)?,
            json_props::URL => item.url = optional_string(key, value)?,
            json_props::METHOD => {
                item.method = optional_string(key, value)?
                    .map(|m| {
                        Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| {
                            BatchError::malformed(format!("invalid HTTP method '{}'", m))
                        })
                    })
                    .transpose()?;
            }
            json_props::STATUS => {
                let code = value
                    .as_u64()
                    .and_then(|c| u16::try_from(c).ok())
                    .ok_or_else(|| BatchError::malformed("'status' must be an integer"))?;
                item.status = Some(StatusCode::from_u16(code).map_err(|_| {
                    BatchError::malformed(format!("invalid status code {}", code))
                })?);
            }
            json_props::DEPENDS_ON => {
                let Value::Array(ids) = value else {
                    return Err(BatchError::malformed("'dependsOn' must be an array of strings"));
                };
                item.depends_on = ids
                    .into_iter()
                    .map(|id| match id {
                        Value::String(s) => Ok(s),
                        _ => Err(BatchError::malformed("'dependsOn' must be an array of strings")),
                    })
                    .collect::<Result<_>>()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn finish_item(&self, item: PartialItem) -> Result<ParsedOperation> {
        let missing = |name: &str| {
            BatchError::malformed(format!(
                "batch {} is missing required property '{}'",
                self.item_name(),
                name
            ))
        };

        let head = match self.kind {
            MessageKind::Request => {
                if item.id.is_none() {
                    return Err(missing(json_props::ID));
                }
                OperationHead::Request {
                    method: item.method.ok_or_else(|| missing(json_props::METHOD))?,
                    url: item.url.ok_or_else(|| missing(json_props::URL))?,
                }
            }
            MessageKind::Response => OperationHead::Response {
                status: item.status.ok_or_else(|| missing(json_props::STATUS))?,
            },
        };

        let body = match &item.body {
            Some(raw) => decode_json_body(raw, item.headers.content_type())?,
            None => bytes::Bytes::new(),
        };

        Ok(ParsedOperation {
            head,
            headers: item.headers,
            content_id: item.id,
            depends_on: item.depends_on,
            group_id: item.group,
            body: Some(body),
        })
    }
}

fn optional_string(key: &str, value: Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        _ => Err(BatchError::malformed(format!("'{}' must be a string", key))),
    }
}

/// Reads a `headers` object keeping property order.
fn parse_headers(raw: &str) -> Result<HeaderList> {
    let mut tokenizer = JsonTokenizer::new();
    tokenizer.feed(raw.as_bytes());
    tokenizer.finish();

    let mut headers = HeaderList::new();
    if tokenizer.next_token()? != Some(JsonToken::ObjectStart) {
        return Err(BatchError::malformed("'headers' must be an object"));
    }
    loop {
        match tokenizer.next_token()? {
            Some(JsonToken::ObjectEnd) => return Ok(headers),
            Some(JsonToken::Key(name)) => match tokenizer.next_token()? {
                Some(JsonToken::Value(Value::String(value))) => headers.append(name, value),
                Some(JsonToken::Value(value @ (Value::Number(_) | Value::Bool(_)))) => {
                    headers.append(name, value.to_string())
                }
                _ => {
                    return Err(BatchError::malformed(format!(
                        "header '{}' must have a string value",
                        name
                    )))
                }
            },
            _ => return Err(BatchError::malformed("'headers' must be an object")),
        }
    }
}
