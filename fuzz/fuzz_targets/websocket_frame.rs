#![no_main]
use libfuzzer_sys::fuzz_target;

use async_h1ws::websocket::{read_from, ReadRules, Role};
use futures_lite::io::Cursor;

fuzz_target!(|input: &[u8]| {
    let mut reader = Cursor::new(input.to_vec());
    let rules = ReadRules {
        role: Role::Server,
        compression: true,
        max_payload: 1 << 16,
    };
    async_std::task::block_on(async {
        while read_from(&mut reader, rules).await.is_ok() {}
    });
});
