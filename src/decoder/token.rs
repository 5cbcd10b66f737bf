//! Forward-only JSON token reader.
//!
//! Tokens are produced one at a time from any [`BufRead`]; nothing is
//! buffered beyond the reader's own buffer, and a token can never be read
//! twice. The reader keeps a count of consumed bytes so callers can locate
//! tokens inside the source document.

use std::io::BufRead;
use std::ops::Range;
use std::str::FromStr;

use serde_json::{Map, Number, Value};

use super::error::DecodeError;

const HIGH_SURROGATES: Range<u32> = 0xD800..0xDC00;
const LOW_SURROGATES: Range<u32> = 0xDC00..0xE000;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    FieldName(String),
    String(String),
    // kept as written, so passthrough values keep their exact digits
    Number(String),
    Bool(bool),
    Null,
}

impl Token {
    pub fn describe(&self) -> &'static str {
        match self {
            Token::StartObject => "an object",
            Token::EndObject => "the end of an object",
            Token::StartArray => "an array",
            Token::EndArray => "the end of an array",
            Token::FieldName(_) => "a field name",
            Token::String(_) => "a string",
            Token::Number(_) => "a number",
            Token::Bool(_) => "a boolean",
            Token::Null => "null",
        }
    }

    pub fn is_container_start(&self) -> bool {
        matches!(self, Token::StartObject | Token::StartArray)
    }

    /// Text of a scalar value. `None` for null and structural tokens.
    pub fn into_scalar_text(self) -> Option<String> {
        match self {
            Token::String(text) | Token::Number(text) => Some(text),
            Token::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    // container just opened
    Open,
    // object key read, value expected
    Value,
    // value read, separator or close expected
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Object(Slot),
    Array(Slot),
}

pub struct TokenReader<R> {
    reader: R,
    offset: u64,
    token_start: u64,
    stack: Vec<Frame>,
    root_read: bool,
}

impl<R: BufRead> TokenReader<R> {
    pub fn new(reader: R) -> Self {
        TokenReader {
            reader,
            offset: 0,
            token_start: 0,
            stack: Vec::new(),
            root_read: false,
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Offset of the first byte of the most recent token.
    pub fn token_start(&self) -> u64 {
        self.token_start
    }

    /// Number of containers currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Next token, or `None` once the document's root value is complete.
    pub fn next_token(&mut self) -> Result<Option<Token>, DecodeError> {
        if self.offset == 0 {
            self.skip_bom()?;
        }
        self.skip_whitespace()?;
        self.token_start = self.offset;

        let Some(frame) = self.stack.last().copied() else {
            if !self.root_read {
                return self.value().map(Some);
            }
            return match self.peek()? {
                None => Ok(None),
                Some(byte) => Err(self.unexpected(byte)),
            };
        };

        let byte = self.peek_required()?;
        match frame {
            Frame::Object(slot) => match (slot, byte) {
                (Slot::Open | Slot::Next, b'}') => {
                    self.bump();
                    self.stack.pop();
                    Ok(Some(Token::EndObject))
                }
                (Slot::Open, b'"') => self.field_name().map(Some),
                (Slot::Next, b',') => {
                    self.bump();
                    self.skip_whitespace()?;
                    self.token_start = self.offset;
                    match self.peek_required()? {
                        b'"' => self.field_name().map(Some),
                        other => Err(self.unexpected(other)),
                    }
                }
                (Slot::Value, _) => self.value().map(Some),
                _ => Err(self.unexpected(byte)),
            },
            Frame::Array(slot) => match (slot, byte) {
                (Slot::Open | Slot::Next, b']') => {
                    self.bump();
                    self.stack.pop();
                    Ok(Some(Token::EndArray))
                }
                (Slot::Next, b',') => {
                    self.bump();
                    self.skip_whitespace()?;
                    self.token_start = self.offset;
                    self.value().map(Some)
                }
                (Slot::Open, _) => self.value().map(Some),
                _ => Err(self.unexpected(byte)),
            },
        }
    }

    /// Like [`TokenReader::next_token`], but the end of input is an error.
    pub fn require_token(&mut self) -> Result<Token, DecodeError> {
        match self.next_token()? {
            Some(token) => Ok(token),
            None => Err(self.syntax("unexpected end of input")),
        }
    }

    /// Materialize the value that begins with `first`.
    ///
    /// Object keys keep their document order, so the tree serializes back to
    /// the same JSON text modulo whitespace.
    pub fn read_tree(&mut self, first: Token) -> Result<Value, DecodeError> {
        match first {
            Token::StartObject => {
                let mut map = Map::new();
                loop {
                    match self.require_token()? {
                        Token::EndObject => return Ok(Value::Object(map)),
                        Token::FieldName(name) => {
                            let token = self.require_token()?;
                            let value = self.read_tree(token)?;
                            map.insert(name, value);
                        }
                        other => {
                            return Err(self.syntax(format!("unexpected {}", other.describe())));
                        }
                    }
                }
            }
            Token::StartArray => {
                let mut items = Vec::new();
                loop {
                    match self.require_token()? {
                        Token::EndArray => return Ok(Value::Array(items)),
                        token => items.push(self.read_tree(token)?),
                    }
                }
            }
            Token::String(text) => Ok(Value::String(text)),
            Token::Number(text) => Number::from_str(&text)
                .map(Value::Number)
                .map_err(|_| self.syntax(format!("invalid number {text:?}"))),
            Token::Bool(value) => Ok(Value::Bool(value)),
            Token::Null => Ok(Value::Null),
            other @ (Token::EndObject | Token::EndArray | Token::FieldName(_)) => {
                Err(self.syntax(format!("unexpected {}", other.describe())))
            }
        }
    }

    /// Discard tokens until fewer than `depth` containers are open.
    pub fn skip_to_depth(&mut self, depth: usize) -> Result<(), DecodeError> {
        while depth > 0 && self.stack.len() >= depth {
            self.require_token()?;
        }
        Ok(())
    }

    fn value(&mut self) -> Result<Token, DecodeError> {
        let byte = self.peek_required()?;

        match self.stack.last_mut() {
            Some(Frame::Object(slot)) | Some(Frame::Array(slot)) => *slot = Slot::Next,
            None => self.root_read = true,
        }

        match byte {
            b'{' => {
                self.bump();
                self.stack.push(Frame::Object(Slot::Open));
                Ok(Token::StartObject)
            }
            b'[' => {
                self.bump();
                self.stack.push(Frame::Array(Slot::Open));
                Ok(Token::StartArray)
            }
            b'"' => self.string().map(Token::String),
            b't' => self.literal(b"true", Token::Bool(true)),
            b'f' => self.literal(b"false", Token::Bool(false)),
            b'n' => self.literal(b"null", Token::Null),
            b'-' | b'0'..=b'9' => self.number(),
            other => Err(self.unexpected(other)),
        }
    }

    fn field_name(&mut self) -> Result<Token, DecodeError> {
        let name = self.string()?;
        self.skip_whitespace()?;
        match self.peek_required()? {
            b':' => self.bump(),
            other => return Err(self.unexpected(other)),
        }
        if let Some(Frame::Object(slot)) = self.stack.last_mut() {
            *slot = Slot::Value;
        }
        Ok(Token::FieldName(name))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        // opening quote
        self.bump();

        let mut raw = Vec::new();
        loop {
            match self.next_byte()? {
                b'"' => break,
                b'\\' => self.escape(&mut raw)?,
                byte => raw.push(byte),
            }
        }

        String::from_utf8(raw).map_err(|_| self.syntax("string is not valid UTF-8"))
    }

    // The backslash has been consumed.
    fn escape(&mut self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        let decoded = match self.next_byte()? {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{8}',
            b'f' => '\u{c}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => {
                let code = self.hex_escape()?;
                return self.unicode_escape(code, out);
            }
            other => return Err(self.syntax(format!("invalid escape \\{}", other as char))),
        };
        push_char(out, decoded);
        Ok(())
    }

    /// Decode a `\uXXXX` escape, pairing surrogates.
    ///
    /// A surrogate without its partner becomes U+FFFD.
    fn unicode_escape(&mut self, mut code: u32, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        loop {
            if !HIGH_SURROGATES.contains(&code) {
                push_char(out, char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                return Ok(());
            }

            if self.peek()? != Some(b'\\') {
                push_char(out, char::REPLACEMENT_CHARACTER);
                return Ok(());
            }
            self.bump();
            if self.peek_required()? != b'u' {
                push_char(out, char::REPLACEMENT_CHARACTER);
                return self.escape(out);
            }
            self.bump();

            let low = self.hex_escape()?;
            if LOW_SURROGATES.contains(&low) {
                let combined = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                push_char(out, char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER));
                return Ok(());
            }

            // the second escape may itself start a pair
            push_char(out, char::REPLACEMENT_CHARACTER);
            code = low;
        }
    }

    fn hex_escape(&mut self) -> Result<u32, DecodeError> {
        let mut code = 0;
        for _ in 0..4 {
            let byte = self.next_byte()?;
            match (byte as char).to_digit(16) {
                Some(digit) => code = code * 16 + digit,
                None => return Err(self.unexpected(byte)),
            }
        }
        Ok(code)
    }

    fn number(&mut self) -> Result<Token, DecodeError> {
        let mut text = String::new();
        while let Some(byte) = self.peek()? {
            if !matches!(byte, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
                break;
            }
            text.push(byte as char);
            self.bump();
        }

        if !is_json_number(&text) {
            return Err(self.syntax(format!("invalid number {text:?}")));
        }
        Ok(Token::Number(text))
    }

    fn literal(&mut self, expected: &[u8], token: Token) -> Result<Token, DecodeError> {
        for &want in expected {
            let byte = self.next_byte()?;
            if byte != want {
                return Err(self.unexpected(byte));
            }
        }
        Ok(token)
    }

    fn skip_whitespace(&mut self) -> Result<(), DecodeError> {
        while let Some(byte) = self.peek()? {
            if !matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
                break;
            }
            self.bump();
        }
        Ok(())
    }

    fn skip_bom(&mut self) -> Result<(), DecodeError> {
        const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
        let buffered = self.reader.fill_buf()?;
        if buffered.starts_with(&BOM) {
            self.reader.consume(BOM.len());
            self.offset += BOM.len() as u64;
        }
        Ok(())
    }

    fn peek(&mut self) -> Result<Option<u8>, DecodeError> {
        Ok(self.reader.fill_buf()?.first().copied())
    }

    fn peek_required(&mut self) -> Result<u8, DecodeError> {
        match self.peek()? {
            Some(byte) => Ok(byte),
            None => Err(self.syntax("unexpected end of input")),
        }
    }

    fn next_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = self.peek_required()?;
        self.bump();
        Ok(byte)
    }

    // only called after a successful peek
    fn bump(&mut self) {
        self.reader.consume(1);
        self.offset += 1;
    }

    fn unexpected(&self, byte: u8) -> DecodeError {
        self.syntax(format!("unexpected character {:?}", byte as char))
    }

    fn syntax(&self, message: impl Into<String>) -> DecodeError {
        DecodeError::Syntax {
            offset: self.offset,
            message: message.into(),
        }
    }
}

fn push_char(out: &mut Vec<u8>, ch: char) {
    let mut buf = [0; 4];
    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
}

/// `-? (0 | [1-9][0-9]*) (. [0-9]+)? ([eE] [+-]? [0-9]+)?`, with no range limit.
fn is_json_number(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut at = 0;
    let digits = |at: &mut usize| {
        let start = *at;
        while bytes.get(*at).is_some_and(u8::is_ascii_digit) {
            *at += 1;
        }
        *at - start
    };

    if bytes.first() == Some(&b'-') {
        at += 1;
    }
    match bytes.get(at) {
        Some(b'0') => at += 1,
        Some(b'1'..=b'9') => {
            digits(&mut at);
        }
        _ => return false,
    }
    if bytes.get(at) == Some(&b'.') {
        at += 1;
        if digits(&mut at) == 0 {
            return false;
        }
    }
    if matches!(bytes.get(at), Some(b'e' | b'E')) {
        at += 1;
        if matches!(bytes.get(at), Some(b'+' | b'-')) {
            at += 1;
        }
        if digits(&mut at) == 0 {
            return false;
        }
    }
    at == bytes.len()
}
