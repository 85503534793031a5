#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|sql: &str| {
    if let Ok(discovery) = mssql_sql::rewrite(sql) {
        assert!(discovery.starts_with("SET FMTONLY ON;"));
        assert!(discovery.ends_with(";SET FMTONLY OFF;"));
    }
});
