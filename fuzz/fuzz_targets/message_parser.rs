#![no_main]

use libfuzzer_sys::fuzz_target;

use relayproxy::proxy::headers::{ADDED_REQUEST_HEADERS, STRIPPED_REQUEST_HEADERS};
use relayproxy::proxy::http::{MessageKind, MessageParser};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let kind = if data[0] & 1 == 0 {
        MessageKind::Request
    } else {
        MessageKind::Response
    };
    let payload = &data[1..];
    let split = (data[0] as usize >> 1) % (payload.len() + 1);
    let (head, tail) = payload.split_at(split);

    let mut parser = MessageParser::new(kind);
    let mut last_state = parser.state();
    for piece in [head, tail] {
        if parser.parse(piece).is_err() {
            return;
        }
        assert!(parser.state() >= last_state, "parser state regressed");
        last_state = parser.state();
    }
    parser.finish_on_close();

    if parser.is_complete()
        && let Some(built) = parser.build(STRIPPED_REQUEST_HEADERS, ADDED_REQUEST_HEADERS)
    {
        let mut reparsed = MessageParser::new(kind);
        let _ = reparsed.parse(&built);
    }
});
