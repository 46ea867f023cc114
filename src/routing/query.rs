//! Query string and path decoding helpers.
//!
//! # Responsibilities
//! - Decode `application/x-www-form-urlencoded` query strings into a
//!   case-insensitive multi-map
//! - Support an explicit charset for legacy clients
//! - Normalize request paths (unreserved percent-decoding, dot segments)
//!
//! # Design Decisions
//! - Malformed escapes or undecodable bytes are rejected rather than guessed
//! - Keys keep their original spelling; lookups ignore ASCII case

use axum::http::StatusCode;
use percent_encoding::percent_decode;

use crate::routing::error::HttpStatusError;

/// Character encodings understood by the query decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Charset {
    #[default]
    Utf8,
    /// ISO-8859-1; every byte maps to the code point of the same value.
    Latin1,
}

/// Ordered multi-valued map with case-insensitive keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiMap {
    entries: Vec<(String, String)>,
}

impl MultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in arrival order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Distinct keys, first spelling wins.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (k, _) in &self.entries {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(k)) {
                names.push(k);
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Decode a raw query string.
pub fn decode_query(query: &str, charset: Charset) -> Result<MultiMap, HttpStatusError> {
    let mut params = MultiMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.add(decode_component(key, charset)?, decode_component(value, charset)?);
    }
    Ok(params)
}

fn decode_component(raw: &str, charset: Charset) -> Result<String, HttpStatusError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() >= i + 3
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(malformed("invalid escape sequence"));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let plus_as_space = raw.replace('+', " ");
    let decoded: Vec<u8> = percent_decode(plus_as_space.as_bytes()).collect();
    match charset {
        Charset::Utf8 => String::from_utf8(decoded).map_err(|_| malformed("invalid UTF-8 sequence")),
        Charset::Latin1 => Ok(decoded.into_iter().map(char::from).collect()),
    }
}

fn malformed(detail: &str) -> HttpStatusError {
    HttpStatusError::new(
        StatusCode::BAD_REQUEST,
        format!("Error while decoding query params: {detail}"),
    )
}

/// Normalize a request path: decode percent-encoded unreserved characters,
/// upper-case remaining escapes and remove `.`/`..` segments.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let bytes = path.as_bytes();
    let mut decoded = String::with_capacity(path.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hex = &path[i + 1..i + 3];
            if let Ok(value) = u8::from_str_radix(hex, 16) {
                let c = value as char;
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~') {
                    decoded.push(c);
                } else {
                    decoded.push('%');
                    decoded.push_str(&hex.to_ascii_uppercase());
                }
                i += 3;
                continue;
            }
        }
        // Multi-byte characters are copied whole.
        let ch = path[i..].chars().next().unwrap_or('\u{FFFD}');
        decoded.push(ch);
        i += ch.len_utf8();
    }

    remove_dot_segments(&decoded)
}

fn remove_dot_segments(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let trailing = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    for segment in path.split('/').skip(1) {
        match segment {
            "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    // A trailing slash already produced an empty last segment.
    if segments.last() == Some(&"") {
        segments.pop();
    }

    let mut out = String::with_capacity(path.len());
    for s in &segments {
        out.push('/');
        out.push_str(s);
    }
    if trailing || out.is_empty() {
        out.push('/');
    }
    out
}
