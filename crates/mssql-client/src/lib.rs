//! # mssql-client
//!
//! Stored procedure calls, OUTPUT parameters and parameter metadata for
//! SQL Server.
//!
//! This crate sits between an application-facing statement API and the
//! connection that moves bytes. It never opens a socket: statements run
//! through a [`StatementExecutor`] and read the complete TDS response it
//! returns.
//!
//! ## Features
//!
//! - **Callable statements**: lazy, ordinal-driven retrieval of OUTPUT
//!   values interleaved with result sets, including batched RPCs
//! - **Named parameters**: resolution through `sp_sproc_columns`
//! - **Parameter discovery**: FMTONLY rewrites of parameterized statements
//! - **Metadata cache**: a bounded, concurrent cache of Always Encrypted
//!   parameter metadata keyed by database and statement text
//! - **Server messages**: an application hook that can downgrade, upgrade
//!   or discard ERROR and INFO messages
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mssql_client::{CallableStatement, SessionState, SqlType};
//!
//! let session = Arc::new(SessionState::new("sales"));
//! let mut stmt = CallableStatement::new(session, "{call dbo.usp_stock(?, ?)}")?;
//! stmt.register_out_parameter(2, SqlType::Int)?;
//! stmt.execute(&executor).await?;
//!
//! let on_hand = stmt.get_i64(2)?;
//! stmt.close()?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod callable;
pub mod config;
pub mod discovery;
pub mod encryption;
pub mod error;
pub mod message;
pub mod metadata_cache;
pub mod params;
pub mod session;

// Re-export commonly used types
pub use callable::{CallableStatement, find_parameter_position};
pub use config::MetadataCacheConfig;
pub use discovery::describe_parameters;
pub use encryption::{CekId, InMemoryKeyDecryptor, KeyDecryptor, ParamCryptoMetadata, SymmetricKey};
pub use error::{Error, Result};
pub use message::{Diagnostics, MessageHandler, ServerNotice};
pub use metadata_cache::{MetadataCache, cache_keys};
pub use params::{OutputRegistration, Parameter, SqlType};
pub use session::{ConnectionSession, SessionState, StatementExecutor};
