//! RFC 5322 messages
//!
//! Just enough MIME to take a message apart, swap its body, and put it
//! back together without disturbing headers the body doesn't describe.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, FixedOffset};
use std::fmt;

/// One header field. `raw` holds the source lines (folding and bytes
/// untouched) until the value is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    name: String,
    value: String,
    raw: Option<Vec<u8>>,
}

impl Field {
    /// Parse the first line of a field. `None` unless the line starts
    /// with a field name (printable ASCII, no colon) and a colon.
    fn parse(line: &[u8]) -> Option<Self> {
        let content = trim_line_end(line);
        let colon = content.iter().position(|&b| b == b':')?;
        let name = &content[..colon];
        if name.is_empty() || !name.iter().all(|b| (33..=126).contains(b)) {
            return None;
        }
        Some(Self {
            name: String::from_utf8_lossy(name).into_owned(),
            value: String::from_utf8_lossy(&content[colon + 1..]).trim().to_string(),
            raw: Some(line.to_vec()),
        })
    }

    fn unfold(&mut self, line: &[u8]) {
        let piece = String::from_utf8_lossy(trim_line_end(line));
        let piece = piece.trim();
        if !self.value.is_empty() && !piece.is_empty() {
            self.value.push(' ');
        }
        self.value.push_str(piece);
        if let Some(raw) = self.raw.as_mut() {
            raw.extend_from_slice(line);
        }
    }

    fn write(&self, out: &mut Vec<u8>, newline: &str) {
        match &self.raw {
            Some(raw) => {
                for line in raw.split_inclusive(|&b| b == b'\n') {
                    out.extend_from_slice(trim_line_end(line));
                    out.extend_from_slice(newline.as_bytes());
                }
            }
            None => {
                out.extend_from_slice(self.name.as_bytes());
                out.extend_from_slice(b": ");
                out.extend_from_slice(self.value.as_bytes());
                out.extend_from_slice(newline.as_bytes());
            }
        }
    }
}

/// Ordered header list with case-insensitive names.
///
/// Names keep their original spelling and every occurrence is kept in
/// the order it appeared, so `Received` chains survive a round trip.
/// Parsed fields serialize byte for byte, 8-bit content included; only
/// fields set through [`set`](Self::set) or [`add`](Self::add) are
/// written from their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Field>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any existing occurrences.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Field {
            name: name.into(),
            value: value.into(),
            raw: None,
        });
    }

    /// Replace the first occurrence of `name` and drop the rest; append
    /// if absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter().position(|f| f.name.eq_ignore_ascii_case(name)) {
            Some(first) => {
                let field = &mut self.entries[first];
                field.value = value;
                field.raw = None;
                let mut index = 0;
                self.entries.retain(|f| {
                    let keep = index <= first || !f.name.eq_ignore_ascii_case(name);
                    index += 1;
                    keep
                });
            }
            None => self.add(name, value),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|f| !f.name.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|f| (f.name.as_str(), f.value.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add every header of `other` whose name `self` does not already
    /// carry. Existing headers are never overwritten.
    ///
    /// Presence is decided against `self` as it was before the merge, so
    /// all occurrences of a missing repeated header are carried over.
    ///
    /// ```
    /// use imap_bulk_decrypt::message::Headers;
    ///
    /// let mut inner = Headers::new();
    /// inner.add("Content-Type", "text/plain");
    /// let mut outer = Headers::new();
    /// outer.add("Content-Type", "multipart/encrypted");
    /// outer.add("Subject", "Hi");
    ///
    /// inner.merge_missing(&outer);
    /// assert_eq!(inner.get("content-type"), Some("text/plain"));
    /// assert_eq!(inner.get("Subject"), Some("Hi"));
    /// ```
    pub fn merge_missing(&mut self, other: &Self) {
        let missing: Vec<Field> = other
            .entries
            .iter()
            .filter(|f| !self.contains(&f.name))
            .cloned()
            .collect();
        self.entries.extend(missing);
    }

    /// Parse a header block. Folded continuation lines are joined with a
    /// single space.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        Self::parse_block(raw).0
    }

    /// Parse headers up to the blank separator line, or up to the first
    /// line that is neither a field nor a continuation. Returns the
    /// headers and the offset where the body starts; a message whose
    /// first line is not a field has no headers at all.
    fn parse_block(raw: &[u8]) -> (Self, usize) {
        let mut headers = Self::new();
        let mut offset = 0;

        for line in raw.split_inclusive(|&b| b == b'\n') {
            let content = trim_line_end(line);
            if content.is_empty() {
                offset += line.len();
                break;
            }

            if content.starts_with(b" ") || content.starts_with(b"\t") {
                // A leading continuation has nothing to fold into.
                if let Some(field) = headers.entries.last_mut() {
                    field.unfold(line);
                }
            } else if let Some(field) = Field::parse(line) {
                headers.entries.push(field);
            } else {
                break;
            }
            offset += line.len();
        }

        (headers, offset)
    }

    fn write(&self, out: &mut Vec<u8>, newline: &str) {
        for field in &self.entries {
            field.write(out, newline);
        }
    }
}

/// A parsed `Content-Type` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub main_type: String,
    pub sub_type: String,
    /// Parameters in header order, names lowercased.
    pub parameters: Vec<(String, String)>,
}

impl ContentType {
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: Vec::new(),
        }
    }

    /// RFC 2045 default for messages without a `Content-Type`.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    /// Parse `type/subtype; name=value; ...`. Unparsable values fall back
    /// to `text/plain`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let mut parts = split_parameters(s).into_iter();
        let type_str = parts.next().unwrap_or_default();

        let Some((main, sub)) = type_str.trim().split_once('/') else {
            return Self::text_plain();
        };
        let mut content_type = Self::new(main.trim().to_lowercase(), sub.trim().to_lowercase());

        for param in parts {
            if let Some((key, value)) = param.split_once('=') {
                content_type.parameters.push((
                    key.trim().to_lowercase(),
                    value.trim().trim_matches('"').to_string(),
                ));
            }
        }
        content_type
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace or add a parameter.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.parameters.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value,
            None => self.parameters.push((name.to_lowercase(), value)),
        }
    }

    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameter("charset")
    }

    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameter("boundary")
    }

    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)?;
        for (key, value) in &self.parameters {
            if value.is_empty()
                || value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c))
            {
                write!(f, "; {key}=\"{value}\"")?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }
        Ok(())
    }
}

/// Split on `;` outside double quotes.
fn split_parameters(s: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ';' if !quoted => {
                pieces.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&s[start..]);
    pieces
}

/// A message: headers plus the undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Line ending used when serializing, taken from the parsed source.
    newline: &'static str,
}

impl Message {
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            body,
            newline: "\r\n",
        }
    }

    /// Split raw RFC 5322 bytes into headers and body.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let (headers, body_start) = Headers::parse_block(raw);
        let newline = match raw.iter().position(|&b| b == b'\n') {
            Some(i) if i == 0 || raw[i - 1] != b'\r' => "\n",
            _ => "\r\n",
        };

        Self {
            headers,
            body: raw[body_start..].to_vec(),
            newline,
        }
    }

    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("Content-Type")
            .map_or_else(ContentType::text_plain, ContentType::parse)
    }

    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.content_type().is_multipart()
    }

    /// Lowercased `Content-Transfer-Encoding`, `7bit` when absent.
    #[must_use]
    pub fn transfer_encoding(&self) -> String {
        self.headers
            .get("Content-Transfer-Encoding")
            .map_or_else(|| "7bit".to_string(), |v| v.trim().to_lowercase())
    }

    /// Direct sub-parts of a multipart message, in order. The preamble
    /// and epilogue are dropped.
    pub fn parts(&self) -> Result<Vec<Self>> {
        let content_type = self.content_type();
        let boundary = content_type.boundary().ok_or_else(|| {
            Error::MultipartEncrypted(format!(
                "{}/{} without boundary",
                content_type.main_type, content_type.sub_type
            ))
        })?;
        let delimiter = format!("--{boundary}");
        let closing = format!("--{boundary}--");

        let mut parts = Vec::new();
        let mut current: Option<Vec<u8>> = None;

        for line in self.body.split_inclusive(|&b| b == b'\n') {
            let trimmed = trim_line_end(line);
            if trimmed == closing.as_bytes() {
                if let Some(part) = current.take() {
                    parts.push(Self::parse(trim_line_end(&part)));
                }
                break;
            }
            if trimmed == delimiter.as_bytes() {
                if let Some(part) = current.take() {
                    parts.push(Self::parse(trim_line_end(&part)));
                }
                current = Some(Vec::new());
                continue;
            }
            if let Some(part) = current.as_mut() {
                part.extend_from_slice(line);
            }
        }

        Ok(parts)
    }

    /// Body with the transfer encoding removed.
    pub fn decoded_body(&self) -> Result<Vec<u8>> {
        match self.transfer_encoding().as_str() {
            "base64" => {
                let cleaned: Vec<u8> = self
                    .body
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                STANDARD
                    .decode(cleaned)
                    .map_err(|e| Error::Encoding(format!("Invalid base64 body: {e}")))
            }
            "quoted-printable" => Ok(decode_quoted_printable(&self.body)),
            _ => Ok(self.body.clone()),
        }
    }

    /// Replace the body with UTF-8 text and rewrite the headers that
    /// describe it. All other headers stay as they are.
    pub fn set_text_body(&mut self, text: &str) {
        let mut content_type = self.content_type();
        content_type.set_parameter("charset", "utf-8");
        self.headers.set("Content-Type", content_type.to_string());
        self.headers.set("Content-Transfer-Encoding", "8bit");
        self.body = text.as_bytes().to_vec();
    }

    /// The `Date` header, if present and well formed.
    #[must_use]
    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        let value = self.headers.get("Date")?;
        DateTime::parse_from_rfc2822(value.trim()).ok()
    }

    /// Serialize with the line ending of the parsed source.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 1024);
        self.headers.write(&mut out, self.newline);
        out.extend_from_slice(self.newline.as_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Serialize with every line ending as CRLF, as IMAP literals
    /// require. Bare CR and bare LF in the body both become CRLF.
    #[must_use]
    pub fn to_crlf_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 1024);
        self.headers.write(&mut out, "\r\n");
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&to_crlf(&self.body));
        out
    }
}

fn to_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut bytes = data.iter().copied().peekable();
    while let Some(b) = bytes.next() {
        match b {
            b'\r' => {
                if bytes.peek() == Some(&b'\n') {
                    bytes.next();
                }
                out.extend_from_slice(b"\r\n");
            }
            b'\n' => out.extend_from_slice(b"\r\n"),
            _ => out.push(b),
        }
    }
    out
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Quoted-printable (RFC 2045). Malformed escapes are kept literally.
fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        if data[i] != b'=' {
            out.push(data[i]);
            i += 1;
            continue;
        }

        let rest = &data[i + 1..];
        if rest.starts_with(b"\r\n") {
            i += 3;
        } else if rest.starts_with(b"\n") {
            i += 2;
        } else if let Some(byte) = rest
            .get(..2)
            .and_then(|hex| std::str::from_utf8(hex).ok())
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        {
            out.push(byte);
            i += 3;
        } else {
            out.push(b'=');
            i += 1;
        }
    }
    out
}
