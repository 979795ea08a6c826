use http::{Method, StatusCode, header::HeaderName};

use crate::proxy::{
    error::ParseError,
    headers::{HeaderEntry, HeaderTable},
};

use super::{CRLF, ChunkParser, MAX_LINE_LENGTH, RequestTarget, find_crlf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// Parser progress. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParserState {
    Initialized,
    LineReceived,
    ReceivingHeaders,
    HeadersComplete,
    ReceivingBody,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    None,
    Length(usize),
    Chunked,
    UntilClose,
}

/// Incremental parser for a single HTTP/1.x request or response.
///
/// Bytes are fed through [`MessageParser::parse`] in whatever pieces the
/// socket delivers them. The start line and headers are consumed line by line;
/// body bytes are framed by `Content-Length`, chunked encoding, or (for
/// responses only) the origin closing the connection. Bytes that arrive after
/// the message is complete are kept as the remainder.
#[derive(Debug, Clone)]
pub struct MessageParser {
    kind: MessageKind,
    state: ParserState,
    retain: bool,
    raw: Vec<u8>,
    buffer: Vec<u8>,
    headers: HeaderTable,
    body: Option<Vec<u8>>,
    body_len: usize,
    method: Option<Method>,
    target: Option<RequestTarget>,
    target_text: Option<String>,
    version: Option<String>,
    status: Option<StatusCode>,
    reason: Option<String>,
    framing: BodyFraming,
    chunk_parser: Option<ChunkParser>,
}

impl MessageParser {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            state: ParserState::Initialized,
            retain: true,
            raw: Vec::new(),
            buffer: Vec::new(),
            headers: HeaderTable::new(),
            body: None,
            body_len: 0,
            method: None,
            target: None,
            target_text: None,
            version: None,
            status: None,
            reason: None,
            framing: BodyFraming::None,
            chunk_parser: None,
        }
    }

    pub fn request() -> Self {
        Self::new(MessageKind::Request)
    }

    pub fn response() -> Self {
        Self::new(MessageKind::Response)
    }

    /// A response parser that follows framing without keeping raw or body
    /// bytes. Only lengths and completion are tracked.
    pub fn tracking_only() -> Self {
        Self {
            retain: false,
            ..Self::response()
        }
    }

    pub fn parse(&mut self, data: &[u8]) -> Result<(), ParseError> {
        if self.retain {
            self.raw.extend_from_slice(data);
        }
        if self.state == ParserState::Complete {
            if self.retain {
                self.buffer.extend_from_slice(data);
            }
            return Ok(());
        }

        let mut input = std::mem::take(&mut self.buffer);
        input.extend_from_slice(data);
        let mut pos = 0;

        while self.state < ParserState::HeadersComplete {
            let Some(idx) = find_crlf(&input[pos..]) else {
                if input.len() - pos > MAX_LINE_LENGTH {
                    return Err(ParseError::LineTooLong(MAX_LINE_LENGTH));
                }
                break;
            };
            if idx > MAX_LINE_LENGTH {
                return Err(ParseError::LineTooLong(MAX_LINE_LENGTH));
            }
            let line = &input[pos..pos + idx];
            pos += idx + CRLF.len();
            self.process_line(line)?;
        }

        if self.state >= ParserState::HeadersComplete && self.state < ParserState::Complete {
            pos += self.consume_body(&input[pos..])?;
        }

        if self.state < ParserState::HeadersComplete || self.retain {
            input.drain(..pos);
            self.buffer = input;
        }
        Ok(())
    }

    fn process_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        match self.state {
            ParserState::Initialized if line.is_empty() => Ok(()),
            ParserState::Initialized => {
                self.parse_start_line(line)?;
                self.advance(ParserState::LineReceived);
                Ok(())
            }
            ParserState::LineReceived | ParserState::ReceivingHeaders if line.is_empty() => {
                self.finish_headers()
            }
            ParserState::LineReceived | ParserState::ReceivingHeaders => {
                self.parse_header(line)?;
                self.advance(ParserState::ReceivingHeaders);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn parse_start_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let malformed = || ParseError::MalformedStartLine(String::from_utf8_lossy(line).into_owned());
        let text = std::str::from_utf8(line).map_err(|_| malformed())?;
        let tokens: Vec<&str> = text.split_ascii_whitespace().collect();

        match self.kind {
            MessageKind::Request => {
                let [method, target, version, ..] = tokens.as_slice() else {
                    return Err(malformed());
                };
                if !version.starts_with("HTTP/") {
                    return Err(malformed());
                }
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| malformed())?;
                self.target = Some(RequestTarget::parse(target)?);
                self.target_text = Some((*target).to_string());
                self.method = Some(method);
                self.version = Some((*version).to_string());
            }
            MessageKind::Response => {
                let [version, code, reason @ ..] = tokens.as_slice() else {
                    return Err(malformed());
                };
                if !version.starts_with("HTTP/") {
                    return Err(malformed());
                }
                let status = StatusCode::from_bytes(code.as_bytes()).map_err(|_| malformed())?;
                self.version = Some((*version).to_string());
                self.status = Some(status);
                self.reason = Some(reason.join(" "));
            }
        }
        Ok(())
    }

    fn parse_header(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let malformed = || ParseError::MalformedHeader(String::from_utf8_lossy(line).into_owned());
        let colon = line.iter().position(|b| *b == b':').ok_or_else(malformed)?;
        let name = line[..colon].trim_ascii();
        let value = line[colon + 1..].trim_ascii();
        HeaderName::from_bytes(name).map_err(|_| malformed())?;
        let name = std::str::from_utf8(name).map_err(|_| malformed())?;
        self.headers.insert(name, value.to_vec());
        Ok(())
    }

    fn finish_headers(&mut self) -> Result<(), ParseError> {
        self.advance(ParserState::HeadersComplete);
        self.framing = self.body_framing()?;
        match self.framing {
            // Complete at the blank line even if more bytes follow; they become the remainder.
            BodyFraming::None => self.advance(ParserState::Complete),
            BodyFraming::Length(_) | BodyFraming::Chunked | BodyFraming::UntilClose => {
                if self.retain {
                    self.body = Some(Vec::new());
                }
                if self.framing == BodyFraming::Chunked {
                    self.chunk_parser = Some(ChunkParser::with_retention(self.retain));
                }
                self.advance(ParserState::ReceivingBody);
            }
        }
        Ok(())
    }

    fn body_framing(&self) -> Result<BodyFraming, ParseError> {
        if self.is_connect() {
            return Ok(BodyFraming::None);
        }
        if let Some(status) = self.status
            && (status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
        {
            return Ok(BodyFraming::None);
        }
        if let Some(entry) = self.headers.get("content-length") {
            let text = String::from_utf8_lossy(&entry.value);
            let length = text
                .trim()
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength(text.to_string()))?;
            return Ok(if length == 0 {
                BodyFraming::None
            } else {
                BodyFraming::Length(length)
            });
        }
        if let Some(entry) = self.headers.get("transfer-encoding")
            && entry
                .value
                .split(|b| *b == b',')
                .next_back()
                .is_some_and(|coding| coding.trim_ascii().eq_ignore_ascii_case(b"chunked"))
        {
            return Ok(BodyFraming::Chunked);
        }
        Ok(match self.kind {
            MessageKind::Request => BodyFraming::None,
            MessageKind::Response => BodyFraming::UntilClose,
        })
    }

    fn consume_body(&mut self, data: &[u8]) -> Result<usize, ParseError> {
        match self.framing {
            BodyFraming::None => Ok(0),
            BodyFraming::Length(expected) => {
                // Bytes past the declared length stay in the body.
                if let Some(body) = self.body.as_mut() {
                    body.extend_from_slice(data);
                }
                self.body_len += data.len();
                if self.body_len >= expected {
                    self.advance(ParserState::Complete);
                }
                Ok(data.len())
            }
            BodyFraming::Chunked => {
                let Some(chunks) = self.chunk_parser.as_mut() else {
                    return Ok(0);
                };
                let used = chunks.parse(data)?;
                self.body_len = chunks.decoded_len();
                if chunks.is_complete() {
                    if self.retain {
                        self.body = Some(chunks.take_body());
                    }
                    self.advance(ParserState::Complete);
                }
                Ok(used)
            }
            BodyFraming::UntilClose => {
                if let Some(body) = self.body.as_mut() {
                    body.extend_from_slice(data);
                }
                self.body_len += data.len();
                Ok(data.len())
            }
        }
    }

    fn advance(&mut self, to: ParserState) {
        if to > self.state {
            self.state = to;
        }
    }

    /// Mark a message delimited by connection close as complete. Returns
    /// whether the message is now complete.
    pub fn finish_on_close(&mut self) -> bool {
        if self.framing == BodyFraming::UntilClose && self.state >= ParserState::HeadersComplete {
            self.advance(ParserState::Complete);
        }
        self.is_complete()
    }

    /// Re-serialize the message, dropping headers named in `remove`
    /// (case-insensitive) and appending `add` after the remaining headers.
    ///
    /// Request targets are written in origin-form, except for CONNECT and
    /// asterisk-form targets which are written as received. A chunked body
    /// is written back as a single chunk. Returns `None` until the start line
    /// has been parsed.
    pub fn build(&self, remove: &[&str], add: &[(&str, &str)]) -> Option<Vec<u8>> {
        let version = self.version.as_deref()?;
        let mut out = Vec::with_capacity(self.raw.len() + 64);

        match self.kind {
            MessageKind::Request => {
                let method = self.method.as_ref()?;
                let target = self.target.as_ref()?;
                let uri = if self.is_connect() || target.path == "*" {
                    self.target_text.clone()?
                } else {
                    target.request_uri()
                };
                out.extend_from_slice(method.as_str().as_bytes());
                out.push(b' ');
                out.extend_from_slice(uri.as_bytes());
                out.push(b' ');
                out.extend_from_slice(version.as_bytes());
            }
            MessageKind::Response => {
                let status = self.status?;
                out.extend_from_slice(version.as_bytes());
                out.push(b' ');
                out.extend_from_slice(status.as_str().as_bytes());
                out.push(b' ');
                out.extend_from_slice(self.reason.as_deref().unwrap_or_default().as_bytes());
            }
        }
        out.extend_from_slice(CRLF);

        for (lower, entry) in self.headers.iter() {
            if remove.iter().any(|name| name.eq_ignore_ascii_case(lower)) {
                continue;
            }
            write_header(&mut out, &entry.name, &entry.value);
        }
        for (name, value) in add {
            write_header(&mut out, name, value.as_bytes());
        }
        out.extend_from_slice(CRLF);

        if let Some(body) = self.body.as_deref() {
            if self.framing == BodyFraming::Chunked {
                if !body.is_empty() {
                    out.extend_from_slice(format!("{:x}", body.len()).as_bytes());
                    out.extend_from_slice(CRLF);
                    out.extend_from_slice(body);
                    out.extend_from_slice(CRLF);
                }
                out.extend_from_slice(b"0\r\n\r\n");
            } else {
                out.extend_from_slice(body);
            }
        }
        Some(out)
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParserState::Complete
    }

    pub fn is_connect(&self) -> bool {
        self.method.as_ref() == Some(&Method::CONNECT)
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn target(&self) -> Option<&RequestTarget> {
        self.target.as_ref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn headers(&self) -> &HeaderTable {
        &self.headers
    }

    pub fn header(&self, lower_name: &str) -> Option<&HeaderEntry> {
        self.headers.get(lower_name)
    }

    /// Body bytes received so far; `None` before body reception begins or
    /// when the parser does not retain bytes.
    pub fn body(&self) -> Option<&[u8]> {
        if !self.is_complete()
            && let Some(chunks) = self.chunk_parser.as_ref()
            && self.retain
        {
            return Some(chunks.body());
        }
        self.body.as_deref()
    }

    /// Decoded body length, tracked even when bytes are not retained.
    pub fn body_len(&self) -> usize {
        self.body_len
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Bytes received after the message completed, or still waiting for a
    /// line terminator.
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    pub fn take_remainder(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(CRLF);
}
