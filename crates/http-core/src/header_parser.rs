//! Streaming, line-oriented parser for HTTP response headers, invoked per
//! callback from the transfer library (one call per line, no reassembly
//! required of the caller).

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Put,
    Head,
    Delete,
    Options,
    PropFind,
    Mkcol,
}

/// Bitset of HTTP verbs an endpoint permits, per an `Allow:` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerbSet(u8);

impl VerbSet {
    const fn bit(verb: Verb) -> u8 {
        match verb {
            Verb::Get => 1 << 0,
            Verb::Put => 1 << 1,
            Verb::Head => 1 << 2,
            Verb::Delete => 1 << 3,
            Verb::Options => 1 << 4,
            Verb::PropFind => 1 << 5,
            Verb::Mkcol => 1 << 6,
        }
    }

    pub fn insert(&mut self, verb: Verb) {
        self.0 |= Self::bit(verb);
    }

    pub fn contains(&self, verb: Verb) -> bool {
        self.0 & Self::bit(verb) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

fn parse_verb(token: &str) -> Option<Verb> {
    match token.to_ascii_uppercase().as_str() {
        "GET" => Some(Verb::Get),
        "PUT" => Some(Verb::Put),
        "HEAD" => Some(Verb::Head),
        "DELETE" => Some(Verb::Delete),
        "OPTIONS" => Some(Verb::Options),
        "PROPFIND" => Some(Verb::PropFind),
        "MKCOL" => Some(Verb::Mkcol),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("header line contains a disallowed control character")]
    InvalidLine,
    #[error("status line is malformed: {0:?}")]
    MalformedStatusLine(String),
}

/// One completed response's accumulated header state (one per redirect
/// hop).
#[derive(Debug, Clone, Default)]
pub struct ResponseInfo {
    pub status_code: u16,
    pub status_message: String,
    pub content_length: i64,
    pub response_offset: u64,
    pub location: Option<String>,
    pub etag: Option<String>,
    pub cache_control: Option<String>,
    pub allow: VerbSet,
    pub checksums: BTreeMap<String, Vec<u8>>,
    pub multipart_boundary: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl ResponseInfo {
    fn new() -> Self {
        ResponseInfo { content_length: -1, ..Default::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingStatusLine,
    Receiving,
    Done,
}

/// Accumulates one HTTP response's headers across repeated [`Self::feed_line`]
/// calls (each called with one line, with or without its trailing CRLF).
pub struct HeaderParser {
    state: State,
    current: ResponseInfo,
    responses: Vec<ResponseInfo>,
}

impl Default for HeaderParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderParser {
    pub fn new() -> Self {
        HeaderParser { state: State::AwaitingStatusLine, current: ResponseInfo::new(), responses: Vec::new() }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Finished response records, oldest (first redirect hop) first.
    pub fn responses(&self) -> &[ResponseInfo] {
        &self.responses
    }

    /// Starts a fresh response record -- called by the driving worker
    /// before following a redirect.
    pub fn reset_for_redirect(&mut self) {
        self.state = State::AwaitingStatusLine;
        self.current = ResponseInfo::new();
    }

    /// Feeds one line (status line, header line, or the empty
    /// headers-done line), without its trailing CRLF.
    pub fn feed_line(&mut self, line: &str) -> Result<(), Error> {
        if line.bytes().any(|b| b.is_ascii_control() && b != b'\t') {
            return Err(Error::InvalidLine);
        }

        match self.state {
            State::AwaitingStatusLine => {
                self.parse_status_line(line)?;
                self.state = State::Receiving;
            }
            State::Receiving => {
                if line.is_empty() {
                    self.responses.push(std::mem::replace(&mut self.current, ResponseInfo::new()));
                    self.state = State::Done;
                } else {
                    self.parse_header_line(line);
                }
            }
            State::Done => {
                // A new status line starts a fresh response (e.g. a 100
                // Continue interim response preceding the real one).
                self.state = State::AwaitingStatusLine;
                return self.feed_line(line);
            }
        }
        Ok(())
    }

    fn parse_status_line(&mut self, line: &str) -> Result<(), Error> {
        let mut parts = line.splitn(3, ' ');
        let _version = parts.next().ok_or_else(|| Error::MalformedStatusLine(line.to_string()))?;
        let code = parts
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| Error::MalformedStatusLine(line.to_string()))?;
        let message = parts.next().unwrap_or("").to_string();

        self.current.status_code = code;
        self.current.status_message = message;
        Ok(())
    }

    fn parse_header_line(&mut self, line: &str) {
        let Some((key, value)) = line.split_once(':') else {
            return;
        };
        let key = key.trim();
        let value = value.trim();
        let canonical = train_case(key);

        self.current.headers.push((canonical.clone(), value.to_string()));

        match canonical.as_str() {
            "Content-Length" => {
                if let Ok(len) = value.parse() {
                    self.current.content_length = len;
                }
            }
            "Content-Range" => {
                if let Some(offset) = parse_content_range_offset(value) {
                    self.current.response_offset = offset;
                }
            }
            "Location" => {
                self.current.location.get_or_insert_with(|| value.to_string());
            }
            "Etag" => {
                self.current.etag.get_or_insert_with(|| value.to_string());
            }
            "Cache-Control" => {
                self.current.cache_control.get_or_insert_with(|| value.to_string());
            }
            "Allow" => {
                for verb in value.split(',') {
                    if let Some(verb) = parse_verb(verb.trim()) {
                        self.current.allow.insert(verb);
                    }
                }
            }
            "Content-Type" => {
                if value.starts_with("multipart/byteranges") {
                    if let Some(boundary) = value.split("boundary=").nth(1) {
                        self.current.multipart_boundary = Some(boundary.trim_matches('"').to_string());
                    }
                }
            }
            "Digest" => parse_digest_header(value, &mut self.current.checksums),
            _ => {}
        }
    }
}

/// Canonicalizes a header key to Train-Case (`content-length` ->
/// `Content-Length`), preserving the first-seen casing is the caller's
/// job via `ResponseInfo::headers`, which stores the original value
/// alongside the canonical key used for dispatch.
fn train_case(key: &str) -> String {
    key.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(c) => c.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn parse_content_range_offset(value: &str) -> Option<u64> {
    // "bytes 1000-1999/5000" -> 1000
    let after_unit = value.split_once(' ')?.1;
    let range = after_unit.split('/').next()?;
    range.split('-').next()?.trim().parse().ok()
}

fn parse_digest_header(value: &str, out: &mut BTreeMap<String, Vec<u8>>) {
    use base64::Engine;
    for entry in value.split(',') {
        let Some((alg, encoded)) = entry.trim().split_once('=') else { continue };
        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
            continue;
        };
        out.insert(alg.trim().to_ascii_lowercase(), bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_response() {
        let mut parser = HeaderParser::new();
        parser.feed_line("HTTP/1.1 200 OK").unwrap();
        parser.feed_line("Content-Length: 42").unwrap();
        parser.feed_line("ETag: \"abc\"").unwrap();
        parser.feed_line("").unwrap();

        assert!(parser.is_done());
        let response = &parser.responses()[0];
        assert_eq!(response.status_code, 200);
        assert_eq!(response.content_length, 42);
        assert_eq!(response.etag.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn allow_header_builds_a_verb_bitset() {
        let mut parser = HeaderParser::new();
        parser.feed_line("HTTP/1.1 200 OK").unwrap();
        parser.feed_line("Allow: GET, PUT, PROPFIND").unwrap();
        parser.feed_line("").unwrap();

        let response = &parser.responses()[0];
        assert!(response.allow.contains(Verb::Get));
        assert!(response.allow.contains(Verb::Put));
        assert!(response.allow.contains(Verb::PropFind));
        assert!(!response.allow.contains(Verb::Delete));
    }

    #[test]
    fn digest_header_decodes_rfc_3230_base64_digests() {
        let mut parser = HeaderParser::new();
        parser.feed_line("HTTP/1.1 200 OK").unwrap();
        // base64("abc" adler32 big-endian bytes 0x02 0x4d 0x01 0x27)
        parser.feed_line("Digest: adler32=Ak0BJw==").unwrap();
        parser.feed_line("").unwrap();

        let response = &parser.responses()[0];
        assert_eq!(response.checksums.get("adler32"), Some(&vec![0x02, 0x4d, 0x01, 0x27]));
    }

    #[test]
    fn control_characters_outside_tab_are_rejected() {
        let mut parser = HeaderParser::new();
        parser.feed_line("HTTP/1.1 200 OK").unwrap();
        let err = parser.feed_line("X-Bad: \u{0007}bell").unwrap_err();
        assert!(matches!(err, Error::InvalidLine));
    }

    #[test]
    fn redirect_resets_into_a_second_response_record() {
        let mut parser = HeaderParser::new();
        parser.feed_line("HTTP/1.1 302 Found").unwrap();
        parser.feed_line("Location: /elsewhere").unwrap();
        parser.feed_line("").unwrap();

        parser.reset_for_redirect();
        parser.feed_line("HTTP/1.1 200 OK").unwrap();
        parser.feed_line("").unwrap();

        assert_eq!(parser.responses().len(), 2);
        assert_eq!(parser.responses()[0].status_code, 302);
        assert_eq!(parser.responses()[1].status_code, 200);
    }
}
