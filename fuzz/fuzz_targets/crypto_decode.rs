#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_protocol::{CekTable, CryptoMetadata};

fuzz_target!(|data: &[u8]| {
    let _ = CryptoMetadata::decode(&mut Bytes::copy_from_slice(data));
    let _ = CekTable::decode(&mut Bytes::copy_from_slice(data));
});
