//! Positioned reader over a complete TDS response.
//!
//! [`TdsReader`] walks the token stream of one response buffer. Callers can
//! take a [`TdsReaderMark`] at any token boundary and later return to it,
//! which lets higher layers skip over values now and decode them on demand.
//!
//! [`parse`] drives a [`TokenHandler`] over the stream until the handler asks
//! to stop or the response is exhausted.

use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::codec::ensure;
use crate::error::ProtocolError;
use crate::token::{
    ColMetaData, Done, DoneKind, EnvChange, ReturnValue, Row, ServerMessage, Token, TokenType,
    decode_order,
};

/// A saved reader position.
///
/// Marks are plain offsets and stay valid for the lifetime of the reader
/// that produced them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TdsReaderMark {
    position: usize,
    metadata: Option<usize>,
}

impl TdsReaderMark {
    /// Byte offset of the mark within the response.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }
}

/// Reader over one TDS response.
#[derive(Debug, Clone)]
pub struct TdsReader {
    data: Bytes,
    pos: usize,
    column_encryption: bool,
    // Every COLMETADATA seen so far with its offset, so that resetting to a
    // mark also restores the metadata that was current at that point.
    metadata: Vec<(usize, Arc<ColMetaData>)>,
    current: Option<usize>,
}

impl TdsReader {
    /// Create a reader over a complete response.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            pos: 0,
            column_encryption: false,
            metadata: Vec::new(),
            current: None,
        }
    }

    /// Decode COLMETADATA with a leading CEK table.
    #[must_use]
    pub fn with_column_encryption(mut self, enabled: bool) -> Self {
        self.column_encryption = enabled;
        self
    }

    /// Current byte offset.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total response length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the response is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if every token has been consumed.
    #[must_use]
    pub fn is_end_of_response(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Metadata of the result set currently being read.
    #[must_use]
    pub fn column_metadata(&self) -> Option<&ColMetaData> {
        self.current
            .and_then(|i| self.metadata.get(i))
            .map(|(_, meta)| meta.as_ref())
    }

    /// Save the current position.
    #[must_use]
    pub fn mark(&self) -> TdsReaderMark {
        TdsReaderMark {
            position: self.pos,
            metadata: self.current,
        }
    }

    /// Return to a saved position.
    pub fn reset(&mut self, mark: TdsReaderMark) -> Result<(), ProtocolError> {
        if mark.position > self.data.len() {
            return Err(ProtocolError::InvalidMark {
                position: mark.position,
                len: self.data.len(),
            });
        }
        self.pos = mark.position;
        self.current = mark.metadata;
        Ok(())
    }

    /// Type of the next token, without consuming it.
    pub fn peek_token_type(&self) -> Result<Option<TokenType>, ProtocolError> {
        match self.data.get(self.pos) {
            None => Ok(None),
            Some(&raw) => TokenType::from_u8(raw)
                .map(Some)
                .ok_or(ProtocolError::InvalidTokenType(raw)),
        }
    }

    /// Step over tokens that are never surfaced (browse-mode and session state).
    pub fn skip_ignored(&mut self) -> Result<(), ProtocolError> {
        while let Some(token_type) = self.peek_token_type()? {
            if !token_type.is_skipped() {
                break;
            }
            let mut cursor = self.data.slice(self.pos + 1..);
            let body_len = match token_type {
                TokenType::Offset => 4,
                TokenType::SessionState => {
                    ensure(&cursor, 4)?;
                    4 + cursor.get_u32_le() as usize
                }
                _ => {
                    ensure(&cursor, 2)?;
                    2 + usize::from(cursor.get_u16_le())
                }
            };
            let end = self.pos + 1 + body_len;
            if end > self.data.len() {
                return Err(ProtocolError::IncompletePacket {
                    expected: body_len,
                    actual: self.data.len() - self.pos - 1,
                });
            }
            self.pos = end;
        }
        Ok(())
    }

    /// Decode the next token.
    ///
    /// Returns `Ok(None)` at the end of the response.
    pub fn read_token(&mut self) -> Result<Option<Token>, ProtocolError> {
        self.skip_ignored()?;
        let Some(token_type) = self.peek_token_type()? else {
            return Ok(None);
        };

        let start = self.pos;
        let mut cursor = self.data.slice(start + 1..);
        let before = cursor.remaining();

        let token = match token_type {
            TokenType::ColMetaData => {
                let meta = ColMetaData::decode(&mut cursor, self.column_encryption)?;
                self.set_metadata(start, meta.clone());
                Token::ColMetaData(meta)
            }
            TokenType::Row => {
                let meta = self.require_metadata()?;
                Token::Row(Row::decode(&mut cursor, &meta)?)
            }
            TokenType::NbcRow => {
                let meta = self.require_metadata()?;
                Token::Row(Row::decode_nbc(&mut cursor, &meta)?)
            }
            TokenType::ReturnStatus => {
                ensure(&cursor, 4)?;
                Token::ReturnStatus(cursor.get_i32_le())
            }
            TokenType::ReturnValue => Token::ReturnValue(ReturnValue::decode(&mut cursor)?),
            TokenType::Done => Token::Done(Done::decode(&mut cursor, DoneKind::Done)?),
            TokenType::DoneProc => Token::Done(Done::decode(&mut cursor, DoneKind::DoneProc)?),
            TokenType::DoneInProc => {
                Token::Done(Done::decode(&mut cursor, DoneKind::DoneInProc)?)
            }
            TokenType::Error => Token::Error(ServerMessage::decode(&mut cursor)?),
            TokenType::Info => Token::Info(ServerMessage::decode(&mut cursor)?),
            TokenType::EnvChange => Token::EnvChange(EnvChange::decode(&mut cursor)?),
            TokenType::Order => Token::Order(decode_order(&mut cursor)?),
            TokenType::Offset
            | TokenType::TabName
            | TokenType::ColInfo
            | TokenType::SessionState => {
                return Err(ProtocolError::InvalidTokenType(token_type as u8));
            }
        };

        self.pos = start + 1 + (before - cursor.remaining());
        Ok(Some(token))
    }

    /// Consume the next token and report its type.
    pub fn skip_token(&mut self) -> Result<Option<TokenType>, ProtocolError> {
        Ok(self.read_token()?.map(|token| token.token_type()))
    }

    /// Decode the RETURNVALUE token at `mark` without moving the reader.
    pub fn return_value_at(&self, mark: TdsReaderMark) -> Result<ReturnValue, ProtocolError> {
        let found = *self.data.get(mark.position).ok_or(ProtocolError::InvalidMark {
            position: mark.position,
            len: self.data.len(),
        })?;
        if found != TokenType::ReturnValue as u8 {
            return Err(ProtocolError::UnexpectedToken {
                expected: "RETURNVALUE",
                position: mark.position,
                found,
            });
        }
        let mut cursor = self.data.slice(mark.position + 1..);
        ReturnValue::decode(&mut cursor)
    }

    fn set_metadata(&mut self, offset: usize, meta: ColMetaData) {
        if let Some(index) = self.metadata.iter().position(|(at, _)| *at == offset) {
            self.current = Some(index);
        } else {
            self.metadata.push((offset, Arc::new(meta)));
            self.current = Some(self.metadata.len() - 1);
        }
    }

    fn require_metadata(&self) -> Result<Arc<ColMetaData>, ProtocolError> {
        self.current
            .and_then(|i| self.metadata.get(i))
            .map(|(_, meta)| Arc::clone(meta))
            .ok_or(ProtocolError::MissingColumnMetadata)
    }
}

/// What the parse loop should do after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFlow {
    /// Keep reading tokens.
    Continue,
    /// Stop with the reader positioned after this token.
    Stop,
    /// Stop with the reader positioned at the start of this token.
    StopBefore,
}

/// Why [`parse`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// A handler callback asked to stop.
    Stopped,
    /// The response has no more tokens.
    EndOfResponse,
}

/// Callbacks invoked by [`parse`] for each token.
///
/// Every callback receives the mark of the token's first byte. The defaults
/// accept the token and continue.
pub trait TokenHandler {
    /// Error type produced by callbacks.
    type Error: From<ProtocolError>;

    /// COLMETADATA.
    fn on_col_metadata(
        &mut self,
        _mark: TdsReaderMark,
        _metadata: &ColMetaData,
    ) -> Result<TokenFlow, Self::Error> {
        Ok(TokenFlow::Continue)
    }

    /// ROW or NBCROW.
    fn on_row(&mut self, _mark: TdsReaderMark, _row: &Row) -> Result<TokenFlow, Self::Error> {
        Ok(TokenFlow::Continue)
    }

    /// RETURNSTATUS.
    fn on_return_status(
        &mut self,
        _mark: TdsReaderMark,
        _status: i32,
    ) -> Result<TokenFlow, Self::Error> {
        Ok(TokenFlow::Continue)
    }

    /// RETURNVALUE.
    fn on_return_value(
        &mut self,
        _mark: TdsReaderMark,
        _value: &ReturnValue,
    ) -> Result<TokenFlow, Self::Error> {
        Ok(TokenFlow::Continue)
    }

    /// DONE, DONEPROC or DONEINPROC.
    fn on_done(&mut self, _mark: TdsReaderMark, _done: &Done) -> Result<TokenFlow, Self::Error> {
        Ok(TokenFlow::Continue)
    }

    /// ERROR.
    fn on_error(
        &mut self,
        _mark: TdsReaderMark,
        _message: &ServerMessage,
    ) -> Result<TokenFlow, Self::Error> {
        Ok(TokenFlow::Continue)
    }

    /// INFO.
    fn on_info(
        &mut self,
        _mark: TdsReaderMark,
        _message: &ServerMessage,
    ) -> Result<TokenFlow, Self::Error> {
        Ok(TokenFlow::Continue)
    }

    /// ENVCHANGE.
    fn on_env_change(
        &mut self,
        _mark: TdsReaderMark,
        _change: &EnvChange,
    ) -> Result<TokenFlow, Self::Error> {
        Ok(TokenFlow::Continue)
    }

    /// ORDER.
    fn on_order(
        &mut self,
        _mark: TdsReaderMark,
        _columns: &[u16],
    ) -> Result<TokenFlow, Self::Error> {
        Ok(TokenFlow::Continue)
    }
}

/// Feed tokens to `handler` until it stops or the response ends.
pub fn parse<H: TokenHandler>(
    reader: &mut TdsReader,
    handler: &mut H,
) -> Result<ParseStatus, H::Error> {
    loop {
        reader.skip_ignored()?;
        let mark = reader.mark();
        let Some(token) = reader.read_token()? else {
            return Ok(ParseStatus::EndOfResponse);
        };

        let flow = match &token {
            Token::ColMetaData(meta) => handler.on_col_metadata(mark, meta)?,
            Token::Row(row) => handler.on_row(mark, row)?,
            Token::ReturnStatus(status) => handler.on_return_status(mark, *status)?,
            Token::ReturnValue(value) => handler.on_return_value(mark, value)?,
            Token::Done(done) => handler.on_done(mark, done)?,
            Token::Error(message) => handler.on_error(mark, message)?,
            Token::Info(message) => handler.on_info(mark, message)?,
            Token::EnvChange(change) => handler.on_env_change(mark, change)?,
            Token::Order(columns) => handler.on_order(mark, columns)?,
        };

        match flow {
            TokenFlow::Continue => {}
            TokenFlow::Stop => return Ok(ParseStatus::Stopped),
            TokenFlow::StopBefore => {
                reader.reset(mark)?;
                return Ok(ParseStatus::Stopped);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::codec::write_b_varchar;
    use crate::token::{DoneStatus, RETURN_VALUE_OUTPUT, done_status_bits};
    use crate::types::{TypeId, column_flags};
    use bytes::{BufMut, BytesMut};

    fn put_int_return_value(buf: &mut BytesMut, ordinal: u16, name: &str, value: i32) {
        buf.put_u8(TokenType::ReturnValue as u8);
        buf.put_u16_le(ordinal);
        write_b_varchar(buf, name);
        buf.put_u8(RETURN_VALUE_OUTPUT);
        buf.put_u32_le(0);
        buf.put_u16_le(column_flags::NULLABLE);
        buf.put_u8(TypeId::IntN as u8);
        buf.put_u8(4);
        buf.put_u8(4);
        buf.put_i32_le(value);
    }

    fn put_done(buf: &mut BytesMut, kind: DoneKind, bits: u16) {
        Done {
            kind,
            status: DoneStatus::from_bits(bits),
            cur_cmd: 0,
            row_count: 0,
        }
        .encode(buf);
    }

    #[derive(Default)]
    struct Collect {
        marks: Vec<TdsReaderMark>,
        dones: usize,
        stop_on_value: Option<TokenFlow>,
    }

    impl TokenHandler for Collect {
        type Error = ProtocolError;

        fn on_return_value(
            &mut self,
            mark: TdsReaderMark,
            _value: &ReturnValue,
        ) -> Result<TokenFlow, ProtocolError> {
            self.marks.push(mark);
            Ok(self.stop_on_value.unwrap_or(TokenFlow::Continue))
        }

        fn on_done(&mut self, _mark: TdsReaderMark, _done: &Done) -> Result<TokenFlow, ProtocolError> {
            self.dones += 1;
            Ok(TokenFlow::Continue)
        }
    }

    fn two_values() -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(TokenType::ReturnStatus as u8);
        buf.put_i32_le(0);
        put_int_return_value(&mut buf, 1, "@a", 10);
        put_int_return_value(&mut buf, 2, "@b", 20);
        put_done(&mut buf, DoneKind::DoneProc, 0);
        buf.freeze()
    }

    #[test]
    fn test_parse_to_end() {
        let mut reader = TdsReader::new(two_values());
        let mut handler = Collect::default();
        let status = parse(&mut reader, &mut handler).unwrap();
        assert_eq!(status, ParseStatus::EndOfResponse);
        assert_eq!(handler.marks.len(), 2);
        assert_eq!(handler.dones, 1);
        assert!(reader.is_end_of_response());
    }

    #[test]
    fn test_stop_after_and_before() {
        let mut reader = TdsReader::new(two_values());
        let mut handler = Collect {
            stop_on_value: Some(TokenFlow::Stop),
            ..Collect::default()
        };
        assert_eq!(parse(&mut reader, &mut handler).unwrap(), ParseStatus::Stopped);
        assert_eq!(
            reader.peek_token_type().unwrap(),
            Some(TokenType::ReturnValue)
        );
        assert!(reader.position() > handler.marks[0].position());

        let mut reader = TdsReader::new(two_values());
        let mut handler = Collect {
            stop_on_value: Some(TokenFlow::StopBefore),
            ..Collect::default()
        };
        parse(&mut reader, &mut handler).unwrap();
        assert_eq!(reader.position(), handler.marks[0].position());
    }

    #[test]
    fn test_return_value_at_mark() {
        let mut reader = TdsReader::new(two_values());
        let mut handler = Collect::default();
        parse(&mut reader, &mut handler).unwrap();

        let second = reader.return_value_at(handler.marks[1]).unwrap();
        assert_eq!(second.param_name, "@b");
        assert_eq!(second.as_i64(), Some(20));

        let err = reader.return_value_at(TdsReaderMark::default()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnexpectedToken { found: 0x79, .. }
        ));
    }

    #[test]
    fn test_reset_replays_tokens() {
        let mut reader = TdsReader::new(two_values());
        reader.read_token().unwrap();
        let mark = reader.mark();
        let first = reader.read_token().unwrap().unwrap();
        reader.reset(mark).unwrap();
        let again = reader.read_token().unwrap().unwrap();
        assert_eq!(first.token_type(), again.token_type());
        assert_eq!(reader.skip_token().unwrap(), Some(TokenType::ReturnValue));
        assert_eq!(reader.skip_token().unwrap(), Some(TokenType::DoneProc));
        assert_eq!(reader.skip_token().unwrap(), None);
    }

    #[test]
    fn test_reset_out_of_range() {
        let mut reader = TdsReader::new(Bytes::from_static(&[0x79, 0, 0, 0, 0]));
        let mark = TdsReaderMark {
            position: 99,
            metadata: None,
        };
        assert!(matches!(
            reader.reset(mark),
            Err(ProtocolError::InvalidMark { position: 99, .. })
        ));
    }

    #[test]
    fn test_skips_session_state_and_tabname() {
        let mut buf = BytesMut::new();
        buf.put_u8(TokenType::SessionState as u8);
        buf.put_u32_le(3);
        buf.put_slice(&[1, 2, 3]);
        buf.put_u8(TokenType::TabName as u8);
        buf.put_u16_le(1);
        buf.put_u8(0);
        put_done(&mut buf, DoneKind::Done, done_status_bits::DONE_COUNT);

        let mut reader = TdsReader::new(buf.freeze());
        match reader.read_token().unwrap() {
            Some(Token::Done(done)) => assert!(done.status.count),
            other => panic!("expected DONE, got {other:?}"),
        }
    }

    #[test]
    fn test_row_without_metadata() {
        let mut reader = TdsReader::new(Bytes::from_static(&[0xD1, 0x00]));
        assert_eq!(
            reader.read_token().unwrap_err(),
            ProtocolError::MissingColumnMetadata
        );
    }

    #[test]
    fn test_unknown_token_type() {
        let reader = TdsReader::new(Bytes::from_static(&[0x42]));
        assert_eq!(
            reader.peek_token_type().unwrap_err(),
            ProtocolError::InvalidTokenType(0x42)
        );
    }
}
