//! # mssql-sql
//!
//! T-SQL text processing for the SQL Server client: a position-exact
//! tokenizer, the rewriter that turns a parameterized statement into a
//! `SET FMTONLY ON` parameter discovery query, and stored procedure name
//! handling.
//!
//! ## Example
//!
//! ```rust
//! use mssql_sql::rewrite;
//!
//! let sql = rewrite("UPDATE t SET a = ? WHERE id = ?").unwrap();
//! assert_eq!(sql, "SET FMTONLY ON;SELECT a,id FROM t;SET FMTONLY OFF;");
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod fmt_query;
pub mod lexer;
pub mod parser;
pub mod procedure;

pub use error::{Result, SqlError};
pub use fmt_query::{FmtQuery, rewrite};
pub use lexer::{Channel, Lexer, Token, TokenKind, tokenize, tokenize_strict};
pub use parser::{ParsedStatement, TableRef};
pub use procedure::{CallSyntax, ProcedureName};
