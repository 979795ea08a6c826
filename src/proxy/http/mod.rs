mod chunk;
mod parser;
mod target;

pub use chunk::{ChunkParser, ChunkState};
pub use parser::{MessageKind, MessageParser, ParserState};
pub use target::{RequestTarget, parse_authority};

pub(crate) const CRLF: &[u8] = b"\r\n";

/// Longest start line, header line, or chunk-size line accepted before the
/// message is rejected.
pub const MAX_LINE_LENGTH: usize = 32 * 1024;

pub const TUNNEL_ESTABLISHED_RESPONSE: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

pub const BAD_GATEWAY_RESPONSE: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 11\r\nConnection: close\r\n\r\nBad Gateway";

pub const PROXY_AUTH_REQUIRED_RESPONSE: &[u8] = b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 29\r\nConnection: close\r\n\r\nProxy Authentication Required";

pub(crate) fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(CRLF.len()).position(|window| window == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_bodies_match_content_length() {
        for response in [BAD_GATEWAY_RESPONSE, PROXY_AUTH_REQUIRED_RESPONSE] {
            let text = std::str::from_utf8(response).unwrap();
            let (head, body) = text.split_once("\r\n\r\n").unwrap();
            let declared: usize = head
                .lines()
                .find_map(|line| line.strip_prefix("Content-Length: "))
                .unwrap()
                .parse()
                .unwrap();
            assert_eq!(declared, body.len(), "bad framing in {text:?}");
        }
    }

    #[test]
    fn finds_first_crlf() {
        assert_eq!(find_crlf(b"abc\r\ndef\r\n"), Some(3));
        assert_eq!(find_crlf(b"abc\r"), None);
        assert_eq!(find_crlf(b""), None);
    }
}
