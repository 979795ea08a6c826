use crate::proxy::error::ParseError;

use super::CRLF;

const MAX_CHUNK_LINE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    WaitingForSize,
    WaitingForData,
    WaitingForTrailers,
    Complete,
}

/// Incremental decoder for a `Transfer-Encoding: chunked` body.
///
/// Input may be split at any byte boundary; partial size lines and partial
/// chunk data are carried over to the next call.
#[derive(Debug, Clone)]
pub struct ChunkParser {
    state: ChunkState,
    retain: bool,
    body: Vec<u8>,
    decoded_len: usize,
    line: Vec<u8>,
    remaining: usize,
    terminator_seen: usize,
}

impl Default for ChunkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkParser {
    pub fn new() -> Self {
        Self::with_retention(true)
    }

    /// With `retain` off only the decoded length is tracked.
    pub fn with_retention(retain: bool) -> Self {
        Self {
            state: ChunkState::WaitingForSize,
            retain,
            body: Vec::new(),
            decoded_len: 0,
            line: Vec::new(),
            remaining: 0,
            terminator_seen: 0,
        }
    }

    /// Feed raw body bytes. Returns how many bytes of `data` were consumed;
    /// anything after the terminating blank line is left untouched.
    pub fn parse(&mut self, data: &[u8]) -> Result<usize, ParseError> {
        let mut pos = 0;
        while pos < data.len() && self.state != ChunkState::Complete {
            match self.state {
                ChunkState::WaitingForSize => {
                    let Some((line, used)) = self.take_line(&data[pos..])? else {
                        return Ok(data.len());
                    };
                    pos += used;
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        self.state = ChunkState::WaitingForTrailers;
                    } else {
                        self.remaining = size;
                        self.terminator_seen = 0;
                        self.state = ChunkState::WaitingForData;
                    }
                }
                ChunkState::WaitingForData => {
                    if self.remaining > 0 {
                        let take = self.remaining.min(data.len() - pos);
                        if self.retain {
                            self.body.extend_from_slice(&data[pos..pos + take]);
                        }
                        self.decoded_len += take;
                        self.remaining -= take;
                        pos += take;
                        continue;
                    }
                    if data[pos] != CRLF[self.terminator_seen] {
                        return Err(ParseError::InvalidChunkTerminator);
                    }
                    pos += 1;
                    self.terminator_seen += 1;
                    if self.terminator_seen == CRLF.len() {
                        self.state = ChunkState::WaitingForSize;
                    }
                }
                ChunkState::WaitingForTrailers => {
                    let Some((line, used)) = self.take_line(&data[pos..])? else {
                        return Ok(data.len());
                    };
                    pos += used;
                    if line.is_empty() {
                        self.state = ChunkState::Complete;
                    }
                }
                ChunkState::Complete => break,
            }
        }
        Ok(pos)
    }

    fn take_line(&mut self, data: &[u8]) -> Result<Option<(Vec<u8>, usize)>, ParseError> {
        for (idx, byte) in data.iter().enumerate() {
            self.line.push(*byte);
            if self.line.ends_with(CRLF) {
                let mut line = std::mem::take(&mut self.line);
                line.truncate(line.len() - CRLF.len());
                return Ok(Some((line, idx + 1)));
            }
            if self.line.len() > MAX_CHUNK_LINE {
                return Err(ParseError::LineTooLong(MAX_CHUNK_LINE));
            }
        }
        Ok(None)
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ChunkState::Complete
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    pub fn decoded_len(&self) -> usize {
        self.decoded_len
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let text = String::from_utf8_lossy(line);
    let size = text.split(';').next().unwrap_or_default().trim();
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidChunkSize(text.into_owned()));
    }
    usize::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunkSize(text.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIKI: &[u8] = b"4\r\nWiki\r\n0\r\n\r\n";

    #[test]
    fn decodes_single_chunk() {
        let mut parser = ChunkParser::new();
        let consumed = parser.parse(WIKI).expect("parse");
        assert_eq!(consumed, WIKI.len());
        assert!(parser.is_complete());
        assert_eq!(parser.body(), b"Wiki");
    }

    #[test]
    fn decodes_when_fed_one_byte_at_a_time() {
        let mut parser = ChunkParser::new();
        for byte in WIKI {
            assert!(!parser.is_complete());
            parser.parse(std::slice::from_ref(byte)).expect("parse");
        }
        assert!(parser.is_complete());
        assert_eq!(parser.body(), b"Wiki");
    }

    #[test]
    fn decodes_multiple_chunks_with_extensions_and_trailers() {
        let input = b"5;name=value\r\nhello\r\n7\r\n, world\r\n0\r\nExpires: never\r\n\r\n";
        let mut parser = ChunkParser::new();
        parser.parse(input).expect("parse");
        assert!(parser.is_complete());
        assert_eq!(parser.body(), b"hello, world");
        assert_eq!(parser.decoded_len(), 12);
    }

    #[test]
    fn terminator_split_across_deliveries() {
        let mut parser = ChunkParser::new();
        parser.parse(b"4\r\nWiki\r").expect("first");
        assert_eq!(parser.state(), ChunkState::WaitingForData);
        parser.parse(b"\n0\r\n\r\n").expect("second");
        assert!(parser.is_complete());
        assert_eq!(parser.body(), b"Wiki");
    }

    #[test]
    fn leaves_bytes_after_completion() {
        let mut parser = ChunkParser::new();
        let consumed = parser.parse(b"0\r\n\r\nHTTP/1.1").expect("parse");
        assert_eq!(consumed, 5);
        assert!(parser.is_complete());
        assert_eq!(parser.parse(b"more").expect("parse"), 0);
    }

    #[test]
    fn rejects_bad_size_line() {
        let mut parser = ChunkParser::new();
        assert!(matches!(
            parser.parse(b"zz\r\n"),
            Err(ParseError::InvalidChunkSize(_))
        ));
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut parser = ChunkParser::new();
        assert_eq!(
            parser.parse(b"4\r\nWikiXX"),
            Err(ParseError::InvalidChunkTerminator)
        );
    }

    #[test]
    fn tracking_mode_counts_without_retaining() {
        let mut parser = ChunkParser::with_retention(false);
        parser.parse(WIKI).expect("parse");
        assert!(parser.is_complete());
        assert!(parser.body().is_empty());
        assert_eq!(parser.decoded_len(), 4);
    }
}
