//! # mssql-testing
//!
//! Test infrastructure for the callable statement client.
//!
//! ## Features
//!
//! - [`ResponseBuilder`]: encodes TDS response token streams (result sets,
//!   RETURNSTATUS, RETURNVALUE, DONE variants, ERROR/INFO, ENVCHANGE)
//! - [`MockExecutor`]: a scripted `StatementExecutor` that records the SQL
//!   it receives
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_testing::{MockExecutor, ResponseBuilder, ScalarValue};
//!
//! let response = ResponseBuilder::new()
//!     .return_status(0)
//!     .return_value(0, "@count", ScalarValue::Int(3))
//!     .done_proc(false)
//!     .build();
//! let executor = MockExecutor::new().with_response("{call usp_count(?)}", response);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod executor;
pub mod response;

pub use executor::{MockExecutor, MockResponse};
pub use response::{MockColumn, ResponseBuilder, ScalarValue};
