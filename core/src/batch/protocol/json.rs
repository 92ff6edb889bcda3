//! Pull tokenizer for JSON batch payloads.
//!
//! Emits structural tokens (`{`, `}`, `[`, `]`), object keys and scalar
//! values. [`JsonTokenizer::next_raw_value`] captures a complete value
//! verbatim instead, which is how operation bodies are taken out of the
//! stream without re-encoding them.
//!
//! Like the multipart tokenizer, every pull returns `Ok(None)` when the
//! buffered input does not hold a complete token, and consumes nothing
//! but insignificant whitespace in that case.

use crate::batch::error::{BatchError, Result};
use bytes::{Buf, Bytes, BytesMut};
use serde_json::value::RawValue;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum JsonToken {
    ObjectStart,
    ObjectEnd,
    ArrayStart,
    ArrayEnd,
    Key(String),
    Value(Value),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ObjectState {
    KeyOrEnd,
    Key,
    Value,
    CommaOrEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArrayState {
    ValueOrEnd,
    Value,
    CommaOrEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Frame {
    Object(ObjectState),
    Array(ArrayState),
}

/// What the grammar allows at the cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Expect {
    Value,
    ValueOrArrayEnd,
    KeyOrObjectEnd,
    Key,
    CommaOrEnd,
    Nothing,
}

#[derive(Debug, Default)]
pub struct JsonTokenizer {
    buffer: BytesMut,
    eof: bool,
    stack: Vec<Frame>,
    root_done: bool,
}

impl JsonTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn finish(&mut self) {
        self.eof = true;
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.eof
    }

    /// Nesting depth of the cursor; 0 outside the root value.
    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Checks that nothing but whitespace follows the root value.
    ///
    /// Returns `Ok(false)` while more input may still arrive.
    pub fn finish_document(&mut self) -> Result<bool> {
        self.skip_whitespace();
        if !self.buffer.is_empty() {
            return Err(BatchError::malformed(
                "unexpected characters after the end of the JSON batch",
            ));
        }
        if !self.root_done {
            return Err(BatchError::malformed("JSON batch is not complete"));
        }
        Ok(self.eof)
    }

    pub fn next_token(&mut self) -> Result<Option<JsonToken>> {
        loop {
            self.skip_whitespace();
            let Some(&c) = self.buffer.first() else {
                return self.need_more();
            };

            match (self.expect(), c) {
                (Expect::Nothing, _) => {
                    return Err(BatchError::malformed(
                        "unexpected characters after the end of the JSON batch",
                    ))
                }
                (Expect::CommaOrEnd, b',') => {
                    self.buffer.advance(1);
                    self.set_top(Frame::Object(ObjectState::Key), Frame::Array(ArrayState::Value));
                }
                (Expect::CommaOrEnd | Expect::KeyOrObjectEnd, b'}')
                    if matches!(self.stack.last(), Some(Frame::Object(_))) =>
                {
                    self.buffer.advance(1);
                    self.close_frame();
                    return Ok(Some(JsonToken::ObjectEnd));
                }
                (Expect::CommaOrEnd | Expect::ValueOrArrayEnd, b']')
                    if matches!(self.stack.last(), Some(Frame::Array(_))) =>
                {
                    self.buffer.advance(1);
                    self.close_frame();
                    return Ok(Some(JsonToken::ArrayEnd));
                }
                (Expect::Key | Expect::KeyOrObjectEnd, b'"') => return self.next_key(),
                (Expect::Value | Expect::ValueOrArrayEnd, b'{') => {
                    self.buffer.advance(1);
                    self.value_taken();
                    self.stack.push(Frame::Object(ObjectState::KeyOrEnd));
                    return Ok(Some(JsonToken::ObjectStart));
                }
                (Expect::Value | Expect::ValueOrArrayEnd, b'[') => {
                    self.buffer.advance(1);
                    self.value_taken();
                    self.stack.push(Frame::Array(ArrayState::ValueOrEnd));
                    return Ok(Some(JsonToken::ArrayStart));
                }
                (Expect::Value | Expect::ValueOrArrayEnd, _) => {
                    let Some(end) = self.scan_scalar()? else {
                        return self.need_more();
                    };
                    let raw = self.buffer.split_to(end);
                    let value: Value = serde_json::from_slice(&raw).map_err(|e| {
                        BatchError::malformed(format!("invalid JSON value: {}", e))
                    })?;
                    self.value_taken();
                    return Ok(Some(JsonToken::Value(value)));
                }
                (_, c) => {
                    return Err(BatchError::malformed(format!(
                        "unexpected '{}' in JSON batch",
                        c as char
                    )))
                }
            }
        }
    }

    /// Takes the next complete value verbatim.
    ///
    /// Only valid where the grammar expects a value.
    pub fn next_raw_value(&mut self) -> Result<Option<Bytes>> {
        self.skip_whitespace();
        let Some(&c) = self.buffer.first() else {
            return self.need_more();
        };
        if !matches!(self.expect(), Expect::Value | Expect::ValueOrArrayEnd) || c == b']' {
            return Err(BatchError::malformed(format!(
                "expected a JSON value, found '{}'",
                c as char
            )));
        }

        let end = match c {
            b'{' | b'[' => self.scan_composite()?,
            _ => self.scan_scalar()?,
        };
        let Some(end) = end else {
            return self.need_more();
        };

        let raw = self.buffer.split_to(end).freeze();
        serde_json::from_slice::<&RawValue>(&raw)
            .map_err(|e| BatchError::malformed(format!("invalid JSON value: {}", e)))?;
        self.value_taken();
        Ok(Some(raw))
    }

    fn next_key(&mut self) -> Result<Option<JsonToken>> {
        let Some(end) = scan_string(&self.buffer, 0) else {
            return self.need_more();
        };
        let mut colon = end;
        while colon < self.buffer.len() && self.buffer[colon].is_ascii_whitespace() {
            colon += 1;
        }
        match self.buffer.get(colon) {
            None => return self.need_more(),
            Some(b':') => {}
            Some(&c) => {
                return Err(BatchError::malformed(format!(
                    "expected ':' after object key, found '{}'",
                    c as char
                )))
            }
        }

        let key: String = serde_json::from_slice(&self.buffer[..end])
            .map_err(|e| BatchError::malformed(format!("invalid object key: {}", e)))?;
        self.buffer.advance(colon + 1);
        self.set_top(Frame::Object(ObjectState::Value), Frame::Array(ArrayState::Value));
        Ok(Some(JsonToken::Key(key)))
    }

    fn expect(&self) -> Expect {
        match self.stack.last() {
            None if self.root_done => Expect::Nothing,
            None => Expect::Value,
            Some(Frame::Object(ObjectState::KeyOrEnd)) => Expect::KeyOrObjectEnd,
            Some(Frame::Object(ObjectState::Key)) => Expect::Key,
            Some(Frame::Object(ObjectState::Value)) => Expect::Value,
            Some(Frame::Array(ArrayState::ValueOrEnd)) => Expect::ValueOrArrayEnd,
            Some(Frame::Array(ArrayState::Value)) => Expect::Value,
            Some(Frame::Object(ObjectState::CommaOrEnd) | Frame::Array(ArrayState::CommaOrEnd)) => {
                Expect::CommaOrEnd
            }
        }
    }

    fn set_top(&mut self, object: Frame, array: Frame) {
        if let Some(top) = self.stack.last_mut() {
            *top = match top {
                Frame::Object(_) => object,
                Frame::Array(_) => array,
            };
        }
    }

    /// The value at the cursor was consumed (or opened).
    fn value_taken(&mut self) {
        if self.stack.is_empty() {
            self.root_done = true;
        } else {
            self.set_top(
                Frame::Object(ObjectState::CommaOrEnd),
                Frame::Array(ArrayState::CommaOrEnd),
            );
        }
    }

    fn close_frame(&mut self) {
        self.stack.pop();
    }

    fn skip_whitespace(&mut self) {
        let n = self
            .buffer
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.buffer.advance(n);
    }

    fn need_more<T>(&self) -> Result<Option<T>> {
        if self.eof {
            Err(BatchError::malformed("unexpected end of JSON batch"))
        } else {
            Ok(None)
        }
    }

    fn scan_scalar(&self) -> Result<Option<usize>> {
        if self.buffer.first() == Some(&b'"') {
            return Ok(scan_string(&self.buffer, 0));
        }
        let end = self
            .buffer
            .iter()
            .position(|b| b.is_ascii_whitespace() || matches!(b, b',' | b'}' | b']' | b':'))
            .unwrap_or(self.buffer.len());
        if end == self.buffer.len() && !self.eof {
            return Ok(None);
        }
        if end == 0 {
            return Err(BatchError::malformed("expected a JSON value"));
        }
        Ok(Some(end))
    }

    fn scan_composite(&self) -> Result<Option<usize>> {
        let mut depth = 0usize;
        let mut i = 0;
        while i < self.buffer.len() {
            match self.buffer[i] {
                b'"' => match scan_string(&self.buffer, i) {
                    Some(end) => {
                        i = end;
                        continue;
                    }
                    None => return Ok(None),
                },
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| BatchError::malformed("unbalanced JSON value"))?;
                    if depth == 0 {
                        return Ok(Some(i + 1));
                    }
                }
                _ => {}
            }
            i += 1;
        }
        Ok(None)
    }
}

/// End (exclusive) of the string literal starting at `start`, if complete.
fn scan_string(buf: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < buf.len() {
        match buf[i] {
            b'\\' => i += 2,
            b'"' => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}
