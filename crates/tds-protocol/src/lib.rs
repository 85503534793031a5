//! # tds-protocol
//!
//! Decoding of MS-TDS (Tabular Data Stream) response token streams as sent
//! by Microsoft SQL Server.
//!
//! The crate is IO-agnostic: it operates on complete response buffers and
//! leaves transport, login and packet framing to the caller.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_protocol::reader::{parse, TdsReader, TokenFlow, TokenHandler, TdsReaderMark};
//! use tds_protocol::token::ReturnValue;
//!
//! struct Outputs(Vec<TdsReaderMark>);
//!
//! impl TokenHandler for Outputs {
//!     type Error = tds_protocol::ProtocolError;
//!
//!     fn on_return_value(&mut self, mark: TdsReaderMark, _: &ReturnValue)
//!         -> Result<TokenFlow, Self::Error>
//!     {
//!         self.0.push(mark);
//!         Ok(TokenFlow::Continue)
//!     }
//! }
//!
//! let mut reader = TdsReader::new(response);
//! let mut outputs = Outputs(Vec::new());
//! parse(&mut reader, &mut outputs)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod crypto;
pub mod error;
pub mod reader;
pub mod token;
pub mod types;

pub use crypto::{CekTable, CekTableEntry, CekValue, CryptoMetadata, EncryptionTypeWire};
pub use error::ProtocolError;
pub use reader::{ParseStatus, TdsReader, TdsReaderMark, TokenFlow, TokenHandler, parse};
pub use token::{
    ColMetaData, ColumnData, Collation, Done, DoneKind, DoneStatus, EnvChange, EnvChangeType,
    EnvChangeValue, ReturnValue, Row, ServerMessage, Token, TokenType, TypeInfo,
};
pub use types::{TypeId, ValueLength};
