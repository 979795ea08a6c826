#![no_main]

use libfuzzer_sys::fuzz_target;

use relayproxy::proxy::http::ChunkParser;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let payload = &data[1..];
    let split = (data[0] as usize) % (payload.len() + 1);
    let (first, second) = payload.split_at(split);

    let mut whole = ChunkParser::new();
    let whole_result = whole.parse(payload);

    let mut pieces = ChunkParser::new();
    let split_result = pieces
        .parse(first)
        .and_then(|used| Ok(used + pieces.parse(second)?));

    if let (Ok(whole_used), Ok(split_used)) = (whole_result, split_result) {
        assert_eq!(whole.is_complete(), pieces.is_complete());
        assert_eq!(whole.body(), pieces.body());
        if whole.is_complete() {
            assert_eq!(whole_used, split_used);
        }
    }
});
