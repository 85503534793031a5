#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use mssql_client::{CallableStatement, SessionState, SqlType};

#[derive(Debug, Arbitrary)]
struct Input {
    params: u8,
    injected: u8,
    reads: Vec<u8>,
    response: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let params = usize::from(input.params % 8) + 1;
    let markers = vec!["?"; params].join(",");
    let session = Arc::new(SessionState::new("fuzz"));
    let Ok(mut stmt) = CallableStatement::new(session, format!("{{? = call p({markers})}}")) else {
        return;
    };
    stmt.set_injected_parameters(u16::from(input.injected % 4));
    for index in 1..=params {
        let _ = stmt.register_out_parameter(index, SqlType::BigInt);
    }
    if stmt.set_response(Bytes::from(input.response)).is_err() {
        return;
    }
    for read in input.reads.iter().take(16) {
        let _ = stmt.get_out_parameter(usize::from(*read % 10));
    }
    let _ = stmt.close();
});
