//! Stored procedure names and call syntax.

use crate::error::{Result, SqlError};
use crate::lexer::{Token, TokenKind, tokenize_strict};

/// A `[database.][owner.]procedure` name split into its parts.
///
/// Quoted parts keep their delimiters so they can be spliced back into SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureName {
    /// Database part.
    pub database: Option<String>,
    /// Owner (schema) part.
    pub owner: Option<String>,
    /// Procedure part.
    pub procedure: String,
}

impl ProcedureName {
    /// Split a procedure name on its dots.
    ///
    /// `db..proc` leaves the owner empty. More than three parts, or a
    /// missing procedure part, is an error.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = || SqlError::InvalidProcedureName(name.to_string());
        let tokens: Vec<Token<'_>> = tokenize_strict(name)
            .map_err(|_| invalid())?
            .into_iter()
            .filter(|t| !t.is_hidden())
            .collect();

        let mut parts: Vec<Option<String>> = vec![None];
        for token in &tokens {
            match token.kind {
                TokenKind::Dot => parts.push(None),
                kind if kind.is_name() || kind.is_keyword() => {
                    let part = parts.last_mut().ok_or_else(invalid)?;
                    if part.is_some() {
                        return Err(invalid());
                    }
                    *part = Some(token.text.to_string());
                }
                _ => return Err(invalid()),
            }
        }

        let procedure = parts.pop().flatten().ok_or_else(invalid)?;
        let (database, owner) = match parts.len() {
            0 => (None, None),
            1 => (None, parts.pop().flatten()),
            2 => {
                let owner = parts.pop().flatten();
                (parts.pop().flatten(), owner)
            }
            _ => return Err(invalid()),
        };
        Ok(Self {
            database,
            owner,
            procedure,
        })
    }

    /// `sp_sproc_columns` call listing the procedure's parameters.
    ///
    /// The fourth result column (`COLUMN_NAME`) holds each parameter name,
    /// starting with `@RETURN_VALUE`.
    #[must_use]
    pub fn sproc_columns_query(&self) -> String {
        let mut query = String::from("exec sp_sproc_columns ");
        if let Some(database) = &self.database {
            query.push_str("@procedure_qualifier=");
            query.push_str(database);
            query.push_str(", ");
        }
        if let Some(owner) = &self.owner {
            query.push_str("@procedure_owner=");
            query.push_str(owner);
            query.push_str(", ");
        }
        query.push_str("@procedure_name=");
        query.push_str(&self.procedure);
        query.push_str(" , @ODBCVer=3");
        query
    }
}

/// A parsed `{[? =] call proc[(args)]}` escape or `EXEC[UTE] proc args`
/// statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSyntax {
    /// Procedure name as written.
    pub procedure: String,
    /// The call starts with `? =`, binding the return status to parameter 1.
    pub return_value_syntax: bool,
    /// Number of `?` markers, the return value included.
    pub parameter_count: usize,
}

impl CallSyntax {
    /// Parse a procedure call.
    pub fn parse(sql: &str) -> Result<Self> {
        let invalid = || SqlError::InvalidProcedureName(sql.to_string());
        let tokens: Vec<Token<'_>> = tokenize_strict(sql)?
            .into_iter()
            .filter(|t| !t.is_hidden())
            .collect();

        let mut pos = usize::from(tokens.first().is_some_and(|t| t.kind == TokenKind::LBrace));
        let return_value_syntax = tokens.get(pos).is_some_and(|t| t.kind == TokenKind::Placeholder)
            && tokens.get(pos + 1).is_some_and(|t| t.kind == TokenKind::Equal);
        if return_value_syntax {
            pos += 2;
        }

        let verb = tokens.get(pos).ok_or_else(invalid)?;
        if !(verb.is_word("call") || verb.is_word("exec") || verb.kind == TokenKind::Execute) {
            return Err(SqlError::UnsupportedStatement(verb.text.to_string()));
        }
        pos += 1;

        let start = pos;
        while let Some(token) = tokens.get(pos) {
            if !(token.kind.is_name() || token.kind == TokenKind::Dot) {
                break;
            }
            pos += 1;
        }
        let (first, last) = match (tokens.get(start), pos.checked_sub(1).and_then(|i| tokens.get(i))) {
            (Some(first), Some(last)) if pos > start => (first, last),
            _ => return Err(invalid()),
        };
        let procedure = sql[first.offset..last.end()].to_string();
        ProcedureName::parse(&procedure)?;

        let parameter_count = tokens[pos..]
            .iter()
            .filter(|t| t.kind == TokenKind::Placeholder)
            .count()
            + usize::from(return_value_syntax);

        Ok(Self {
            procedure,
            return_value_syntax,
            parameter_count,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_split_parts() {
        let name = ProcedureName::parse("sales.dbo.usp_orders").unwrap();
        assert_eq!(name.database.as_deref(), Some("sales"));
        assert_eq!(name.owner.as_deref(), Some("dbo"));
        assert_eq!(name.procedure, "usp_orders");

        let name = ProcedureName::parse("dbo.usp_orders").unwrap();
        assert_eq!(name.database, None);
        assert_eq!(name.owner.as_deref(), Some("dbo"));

        let name = ProcedureName::parse("usp_orders").unwrap();
        assert_eq!(name.owner, None);
        assert_eq!(name.procedure, "usp_orders");
    }

    #[test]
    fn test_quoted_parts_and_empty_owner() {
        let name = ProcedureName::parse("[my db]..[usp.with.dots]").unwrap();
        assert_eq!(name.database.as_deref(), Some("[my db]"));
        assert_eq!(name.owner, None);
        assert_eq!(name.procedure, "[usp.with.dots]");
    }

    #[test]
    fn test_invalid_names() {
        for bad in ["", "a.b.c.d", "dbo.", "a b", "dbo.'x'"] {
            assert!(
                matches!(
                    ProcedureName::parse(bad),
                    Err(SqlError::InvalidProcedureName(_))
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_sproc_columns_query() {
        let name = ProcedureName::parse("sales.dbo.usp_orders").unwrap();
        assert_eq!(
            name.sproc_columns_query(),
            "exec sp_sproc_columns @procedure_qualifier=sales, @procedure_owner=dbo, \
             @procedure_name=usp_orders , @ODBCVer=3"
        );
        let name = ProcedureName::parse("usp_orders").unwrap();
        assert_eq!(
            name.sproc_columns_query(),
            "exec sp_sproc_columns @procedure_name=usp_orders , @ODBCVer=3"
        );
    }

    #[test]
    fn test_call_escape() {
        let call = CallSyntax::parse("{? = call dbo.usp_orders(?, ?)}").unwrap();
        assert_eq!(call.procedure, "dbo.usp_orders");
        assert!(call.return_value_syntax);
        assert_eq!(call.parameter_count, 3);

        let call = CallSyntax::parse("{call usp_ping}").unwrap();
        assert!(!call.return_value_syntax);
        assert_eq!(call.parameter_count, 0);
    }

    #[test]
    fn test_exec_statement() {
        let call = CallSyntax::parse("EXEC [sales].dbo.usp_orders ?, 5, ?").unwrap();
        assert_eq!(call.procedure, "[sales].dbo.usp_orders");
        assert_eq!(call.parameter_count, 2);

        assert!(matches!(
            CallSyntax::parse("SELECT 1"),
            Err(SqlError::UnsupportedStatement(_))
        ));
    }
}
