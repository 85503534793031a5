#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_protocol::TdsReader;

fuzz_target!(|data: &[u8]| {
    let mut reader = TdsReader::new(Bytes::copy_from_slice(data)).with_column_encryption(data.len() % 2 == 1);

    // Every successful read must advance the cursor.
    loop {
        let before = reader.position();
        match reader.read_token() {
            Ok(Some(_)) => assert!(reader.position() > before),
            Ok(None) | Err(_) => break,
        }
    }
});
