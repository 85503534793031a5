#![no_main]

use libfuzzer_sys::fuzz_target;
use mssql_sql::{tokenize, tokenize_strict};

fuzz_target!(|sql: &str| {
    let tokens = tokenize(sql);
    let rebuilt: String = tokens.iter().map(|t| t.text).collect();
    assert_eq!(rebuilt, sql);
    let _ = tokenize_strict(sql);
});
