//! Flat token-span extraction for metadata discovery.
//!
//! The parser never builds a syntax tree. It walks the default-channel tokens
//! of the first statement with a single cursor and records source spans:
//! projected columns, table references and their aliases, INSERT value tuples
//! and a leading `WITH` clause. Parameters (`?`) outside a projection
//! contribute the column they are compared with or assigned to.

use crate::error::{Result, SqlError};
use crate::lexer::{Token, TokenKind, tokenize_strict};

/// Placeholder recorded for a parameter used directly as a value.
pub const PLACEHOLDER: &str = "?";

/// One table reference from a FROM, JOIN or statement target clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Source text of the reference: a dotted name, a rowset function call
    /// or a parenthesized derived table.
    pub name: String,
    /// Declared alias, as written.
    pub alias: Option<String>,
}

impl TableRef {
    /// Render as `name` or `name alias`.
    #[must_use]
    pub fn render(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} {}", self.name, alias),
            None => self.name.clone(),
        }
    }
}

/// Everything extracted from one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedStatement {
    /// Leading `WITH ...` clause followed by a space, or empty.
    pub prefix: String,
    /// Column targets in discovery order. An empty string stands for a
    /// parameter whose column could not be determined.
    pub columns: Vec<String>,
    /// Aliases declared on projected expressions.
    pub column_aliases: Vec<String>,
    /// Table references in source order.
    pub tables: Vec<TableRef>,
    /// Aliases declared on table references.
    pub aliases: Vec<String>,
    /// INSERT value tuples.
    pub values: Vec<Vec<String>>,
}

/// Parse the first statement of `sql`.
pub fn parse(sql: &str) -> Result<ParsedStatement> {
    let tokens = first_statement(tokenize_strict(sql)?);
    let mut parser = Parser {
        sql,
        tokens: &tokens,
        pos: 0,
        out: ParsedStatement::default(),
    };
    parser.parse_cte()?;
    parser.parse_statement()?;
    Ok(parser.out)
}

// Drop hidden tokens and everything after the first top-level `;`.
fn first_statement(all: Vec<Token<'_>>) -> Vec<Token<'_>> {
    let mut depth = 0usize;
    let mut tokens = Vec::with_capacity(all.len());
    for token in all.into_iter().filter(|t| !t.is_hidden()) {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            TokenKind::Semicolon if depth == 0 => {
                if tokens.is_empty() {
                    continue;
                }
                break;
            }
            _ => {}
        }
        tokens.push(token);
    }
    tokens
}

const JOIN_MODIFIERS: [&str; 10] = [
    "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "HASH", "LOOP", "MERGE", "REMOTE",
];

const ALIAS_STOP_WORDS: [&str; 24] = [
    "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "ON", "APPLY", "PIVOT",
    "UNPIVOT", "UNION", "EXCEPT", "INTERSECT", "WHEN", "USING", "TABLESAMPLE", "FOR", "HASH",
    "LOOP", "MERGE", "REMOTE", "THEN", "EXEC",
];

const SET_OPERATORS: [&str; 4] = ["UNION", "EXCEPT", "INTERSECT", "FOR"];

struct Parser<'s, 't> {
    sql: &'s str,
    tokens: &'t [Token<'s>],
    pos: usize,
    out: ParsedStatement,
}

impl<'s, 't> Parser<'s, 't> {
    fn peek(&self) -> Option<&'t Token<'s>> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, n: usize) -> Option<&'t Token<'s>> {
        self.tokens.get(self.pos + n)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_word(word)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn offset_here(&self) -> usize {
        self.peek().map_or(self.sql.len(), |t| t.offset)
    }

    // Source text covered by tokens `from..to`, trimmed.
    fn span(&self, from: usize, to: usize) -> String {
        match (self.tokens.get(from), to.checked_sub(1).and_then(|i| self.tokens.get(i))) {
            (Some(first), Some(last)) if from < to => {
                self.sql[first.offset..last.end()].trim().to_string()
            }
            _ => String::new(),
        }
    }

    // Like `span`, with every `?` bound to `NULL` so the text runs unparameterized.
    fn span_binding_null(&self, from: usize, to: usize) -> String {
        let (Some(first), Some(last)) = (
            self.tokens.get(from),
            to.checked_sub(1).and_then(|i| self.tokens.get(i)),
        ) else {
            return String::new();
        };
        if from >= to {
            return String::new();
        }
        let mut text = String::new();
        let mut cursor = first.offset;
        for token in &self.tokens[from..to] {
            if token.kind == TokenKind::Placeholder {
                text.push_str(&self.sql[cursor..token.offset]);
                text.push_str("NULL");
                cursor = token.end();
            }
        }
        text.push_str(&self.sql[cursor..last.end()]);
        text.trim().to_string()
    }

    // One direct-value marker per `?` in `from..to`.
    fn record_placeholders(&mut self, from: usize, to: usize) {
        let count = self.tokens[from..to]
            .iter()
            .filter(|t| t.kind == TokenKind::Placeholder)
            .count();
        self.out
            .columns
            .extend(std::iter::repeat_n(PLACEHOLDER.to_string(), count));
    }

    // Index one past the `)` matching the `(` at `open`.
    fn group_end(&self, open: usize) -> Result<usize> {
        let mut depth = 0usize;
        for (i, token) in self.tokens.iter().enumerate().skip(open) {
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i + 1);
                    }
                }
                _ => {}
            }
        }
        Err(SqlError::UnbalancedParentheses {
            offset: self.tokens.get(open).map_or(self.sql.len(), |t| t.offset),
        })
    }

    // Split the group opened at the cursor on top-level commas and move past it.
    fn split_group(&mut self) -> Result<Vec<(usize, usize)>> {
        let end = self.group_end(self.pos)?;
        let close = end - 1;
        let mut parts = Vec::new();
        let mut start = self.pos + 1;
        let mut depth = 0usize;
        for i in start..close {
            match self.tokens[i].kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth = depth.saturating_sub(1),
                TokenKind::Comma if depth == 0 => {
                    parts.push((start, i));
                    start = i + 1;
                }
                _ => {}
            }
        }
        if start < close || !parts.is_empty() {
            parts.push((start, close));
        }
        self.pos = end;
        Ok(parts)
    }

    fn has_placeholder(&self, from: usize, to: usize) -> bool {
        self.tokens[from..to]
            .iter()
            .any(|t| t.kind == TokenKind::Placeholder)
    }

    // `a.b.c` ending at `last`, if `last` is a name.
    fn name_chain_ending_at(&self, last: usize) -> Option<String> {
        if !self.tokens.get(last)?.kind.is_name() {
            return None;
        }
        let mut first = last;
        while first >= 2
            && self.tokens[first - 1].kind == TokenKind::Dot
            && self.tokens[first - 2].kind.is_name()
        {
            first -= 2;
        }
        Some(self.span(first, last + 1))
    }

    // `a.b.c` starting at `first`, if `first` is a name.
    fn name_chain_starting_at(&self, first: usize) -> Option<String> {
        if !self.tokens.get(first)?.kind.is_name() {
            return None;
        }
        let mut last = first;
        while self.tokens.get(last + 1).is_some_and(|t| t.kind == TokenKind::Dot)
            && self.tokens.get(last + 2).is_some_and(|t| t.kind.is_name())
        {
            last += 2;
        }
        Some(self.span(first, last + 1))
    }

    fn is_comparison(&self, index: usize) -> bool {
        self.tokens
            .get(index)
            .is_some_and(|t| t.kind.is_operator() || t.is_word("LIKE") || t.is_word("BETWEEN"))
    }

    // Name ending just before the predicate keyword at `predicate`, past a `NOT`.
    fn operand_before(&self, predicate: usize) -> Option<String> {
        let mut last = predicate.checked_sub(1)?;
        if self.tokens.get(last).is_some_and(|t| t.is_word("NOT")) {
            last = last.checked_sub(1)?;
        }
        self.name_chain_ending_at(last)
    }

    // `IN` keyword whose list directly encloses the item at `index`.
    fn enclosing_in_list(&self, index: usize) -> Option<usize> {
        let mut depth = 0usize;
        for i in (0..index).rev() {
            match self.tokens[i].kind {
                TokenKind::RParen => depth += 1,
                TokenKind::LParen if depth == 0 => {
                    let keyword = i.checked_sub(1)?;
                    return self.tokens[keyword].is_word("IN").then_some(keyword);
                }
                TokenKind::LParen => depth -= 1,
                _ => {}
            }
        }
        None
    }

    /// Column a parameter is compared with or assigned to: the name before
    /// the preceding operator or `[NOT] LIKE`/`BETWEEN`, the name before an
    /// enclosing `[NOT] IN` list, else the name after the following
    /// operator, else empty.
    fn column_around(&self, param: usize) -> String {
        if param >= 2 && self.is_comparison(param - 1) {
            if let Some(name) = self.operand_before(param - 1) {
                return name;
            }
        }
        let in_list = param >= 1
            && matches!(
                self.tokens[param - 1].kind,
                TokenKind::LParen | TokenKind::Comma
            );
        if in_list {
            if let Some(name) = self.enclosing_in_list(param).and_then(|i| self.operand_before(i)) {
                return name;
            }
        }
        if self.is_comparison(param + 1) {
            if let Some(name) = self.name_chain_starting_at(param + 2) {
                return name;
            }
        }
        String::new()
    }

    fn parse_cte(&mut self) -> Result<()> {
        if self.peek_kind() != Some(TokenKind::With) {
            return Ok(());
        }
        let start = self.pos;
        self.pos += 1;
        loop {
            if !self.peek().is_some_and(|t| t.kind.is_name()) {
                return Err(SqlError::InvalidCte {
                    offset: self.offset_here(),
                });
            }
            self.pos += 1;
            if self.peek_kind() == Some(TokenKind::LParen) {
                self.pos = self.group_end(self.pos).map_err(|_| SqlError::InvalidCte {
                    offset: self.offset_here(),
                })?;
            }
            if !self.eat(TokenKind::As) || self.peek_kind() != Some(TokenKind::LParen) {
                return Err(SqlError::InvalidCte {
                    offset: self.offset_here(),
                });
            }
            self.pos = self.group_end(self.pos).map_err(|_| SqlError::InvalidCte {
                offset: self.offset_here(),
            })?;
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.out.prefix = format!("{} ", self.span(start, self.pos));
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<()> {
        let Some(first) = self.peek() else {
            return Err(SqlError::UnsupportedStatement(String::new()));
        };
        match first.kind {
            TokenKind::Select => self.parse_select(),
            TokenKind::Insert => self.parse_insert(),
            TokenKind::Update => self.parse_update(),
            TokenKind::Delete => self.parse_delete(),
            TokenKind::Id if first.is_word("MERGE") => self.parse_merge(),
            _ => Err(SqlError::UnsupportedStatement(first.text.to_string())),
        }
    }

    fn skip_top(&mut self) -> Result<()> {
        if !self.eat(TokenKind::Top) {
            return Ok(());
        }
        if self.peek_kind() == Some(TokenKind::LParen) {
            let end = self.group_end(self.pos)?;
            if self.has_placeholder(self.pos, end) {
                self.out.columns.push(PLACEHOLDER.to_string());
            }
            self.pos = end;
        } else if let Some(token) = self.peek() {
            if token.kind == TokenKind::Placeholder {
                self.out.columns.push(PLACEHOLDER.to_string());
            }
            self.pos += 1;
        }
        self.eat(TokenKind::Percent);
        if self.peek_kind() == Some(TokenKind::With)
            && self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Ties)
        {
            self.pos += 2;
        }
        Ok(())
    }

    fn parse_select(&mut self) -> Result<()> {
        self.pos += 1;
        if !self.eat(TokenKind::Distinct) {
            self.eat_word("ALL");
        }
        self.skip_top()?;
        self.select_list();
        if self.eat(TokenKind::Into) {
            // SELECT ... INTO creates the target; it is not a source.
            self.skip_object_name();
        }
        self.scan_rest()
    }

    fn select_list(&mut self) {
        let mut start = self.pos;
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            let at_top = depth == 0;
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen if at_top => break,
                TokenKind::RParen => depth -= 1,
                TokenKind::Comma if at_top => {
                    self.select_expression(start, self.pos);
                    start = self.pos + 1;
                }
                TokenKind::From
                | TokenKind::Into
                | TokenKind::Where
                | TokenKind::Group
                | TokenKind::Having
                | TokenKind::Order
                | TokenKind::Option
                    if at_top =>
                {
                    break;
                }
                TokenKind::Id if at_top && SET_OPERATORS.iter().any(|w| token.is_word(w)) => break,
                _ => {}
            }
            self.pos += 1;
        }
        self.select_expression(start, self.pos);
    }

    fn select_expression(&mut self, from: usize, to: usize) {
        if from >= to {
            return;
        }
        let (from, to, alias) = self.split_alias(from, to);
        if let Some(alias) = alias {
            self.out.column_aliases.push(alias);
        }

        let params: Vec<usize> = (from..to)
            .filter(|&i| self.tokens[i].kind == TokenKind::Placeholder)
            .collect();
        if to - from == 1 && params.len() == 1 {
            self.out.columns.push(PLACEHOLDER.to_string());
        } else if params.is_empty() {
            let text = self.span(from, to);
            self.out.columns.push(text);
        } else {
            for param in params {
                let column = self.column_around(param);
                self.out.columns.push(column);
            }
        }
    }

    // Separate `expr AS alias`, `alias = expr` and `expr alias`.
    fn split_alias(&self, from: usize, to: usize) -> (usize, usize, Option<String>) {
        let len = to - from;
        let last = &self.tokens[to - 1];

        if len >= 3 && self.tokens[to - 2].kind == TokenKind::As {
            if last.kind.is_name() || last.kind == TokenKind::String {
                return (from, to - 2, Some(last.unescaped().into_owned()));
            }
        }
        if len >= 3
            && self.tokens[from].kind.is_name()
            && self.tokens[from + 1].kind == TokenKind::Equal
        {
            return (
                from + 2,
                to,
                Some(self.tokens[from].unescaped().into_owned()),
            );
        }
        if len >= 2 && last.kind.is_name() && !last.is_word("END") {
            let prev = &self.tokens[to - 2];
            let binds = prev.kind == TokenKind::Dot
                || prev.kind.is_operator()
                || prev.kind.is_keyword()
                || matches!(
                    prev.kind,
                    TokenKind::Exclamation | TokenKind::BitNot | TokenKind::LParen
                )
                || prev.is_word("COLLATE");
            if !binds {
                return (from, to - 1, Some(last.unescaped().into_owned()));
            }
        }
        (from, to, None)
    }

    fn skip_object_name(&mut self) {
        if !self.peek().is_some_and(|t| t.kind.is_name()) {
            return;
        }
        self.pos += 1;
        while self.eat(TokenKind::Dot) {
            if self.peek().is_some_and(|t| t.kind.is_name()) {
                self.pos += 1;
            }
        }
    }

    // Remaining clauses: parameters contribute their columns, FROM adds tables.
    fn scan_rest(&mut self) -> Result<()> {
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Placeholder => {
                    let column = self.column_around(self.pos);
                    self.out.columns.push(column);
                    self.pos += 1;
                }
                TokenKind::From => {
                    self.pos += 1;
                    self.table_list()?;
                }
                TokenKind::Top => self.skip_top()?,
                _ => self.pos += 1,
            }
        }
        Ok(())
    }

    fn at_join(&self) -> bool {
        let mut i = self.pos;
        while self
            .tokens
            .get(i)
            .is_some_and(|t| JOIN_MODIFIERS.iter().any(|w| t.is_word(w)))
        {
            i += 1;
        }
        self.tokens
            .get(i)
            .is_some_and(|t| t.is_word("JOIN") || t.is_word("APPLY"))
    }

    fn eat_join(&mut self) -> bool {
        if !self.at_join() {
            return false;
        }
        while JOIN_MODIFIERS.iter().any(|w| self.eat_word(w)) {}
        self.eat_word("JOIN") || self.eat_word("APPLY")
    }

    fn table_list(&mut self) -> Result<()> {
        loop {
            self.table_ref(true)?;
            loop {
                let Some(token) = self.peek() else {
                    return Ok(());
                };
                if token.kind == TokenKind::Comma {
                    self.pos += 1;
                    break;
                }
                if self.eat_join() {
                    self.table_ref(true)?;
                    continue;
                }
                if token.is_word("ON") {
                    self.pos += 1;
                    self.scan_condition();
                    continue;
                }
                return Ok(());
            }
        }
    }

    // A join condition, up to the next join, clause keyword or list separator.
    fn scan_condition(&mut self) {
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            let at_top = depth == 0;
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen if at_top => return,
                TokenKind::RParen => depth -= 1,
                TokenKind::Comma if at_top => return,
                TokenKind::Where
                | TokenKind::Group
                | TokenKind::Having
                | TokenKind::Order
                | TokenKind::Option
                | TokenKind::Output
                    if at_top =>
                {
                    return;
                }
                TokenKind::Id
                    if at_top
                        && (self.at_join()
                            || token.is_word("WHEN")
                            || SET_OPERATORS.iter().any(|w| token.is_word(w))) =>
                {
                    return;
                }
                TokenKind::Placeholder => {
                    let column = self.column_around(self.pos);
                    self.out.columns.push(column);
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    // One table reference. `allow_call` lets `name(...)` be read as a
    // table-valued function rather than leaving the group for the caller.
    fn table_ref(&mut self, allow_call: bool) -> Result<()> {
        let Some(token) = self.peek() else {
            return Ok(());
        };
        let start = self.pos;

        match token.kind {
            TokenKind::LParen => {
                let end = self.group_end(start)?;
                self.record_placeholders(start, end);
                self.pos = end;
            }
            kind if kind.is_rowset_function() => {
                self.pos += 1;
                if self.peek_kind() != Some(TokenKind::LParen) {
                    return Err(SqlError::InvalidOpenCall {
                        offset: token.offset,
                    });
                }
                let end = self.group_end(self.pos)?;
                self.record_placeholders(self.pos, end);
                self.pos = end;
                while self.peek_kind() == Some(TokenKind::Dot)
                    && self.peek_at(1).is_some_and(|t| t.kind.is_name())
                {
                    self.pos += 2;
                }
            }
            kind if kind.is_name() || kind == TokenKind::LocalId => {
                self.pos += 1;
                while self.eat(TokenKind::Dot) {
                    if self.peek().is_some_and(|t| t.kind.is_name()) {
                        self.pos += 1;
                    }
                }
                if allow_call && self.peek_kind() == Some(TokenKind::LParen) {
                    let end = self.group_end(self.pos)?;
                    self.record_placeholders(self.pos, end);
                    self.pos = end;
                }
            }
            _ => return Ok(()),
        }

        let name = self.span_binding_null(start, self.pos);
        let alias = self.table_alias();
        self.skip_table_hints()?;
        if let Some(alias) = &alias {
            self.out.aliases.push(alias.clone());
        }
        self.out.tables.push(TableRef { name, alias });
        Ok(())
    }

    fn table_alias(&mut self) -> Option<String> {
        if self.eat(TokenKind::As) {
            let token = self.peek().filter(|t| t.kind.is_name())?;
            self.pos += 1;
            return Some(token.text.to_string());
        }
        let token = self.peek()?;
        let stop = token.kind == TokenKind::Id && ALIAS_STOP_WORDS.iter().any(|w| token.is_word(w));
        if token.kind.is_name() && !stop {
            self.pos += 1;
            return Some(token.text.to_string());
        }
        None
    }

    fn skip_table_hints(&mut self) -> Result<()> {
        if self.peek_kind() == Some(TokenKind::With)
            && self.peek_at(1).is_some_and(|t| t.kind == TokenKind::LParen)
        {
            self.pos = self.group_end(self.pos + 1)?;
        }
        Ok(())
    }

    fn parse_insert(&mut self) -> Result<()> {
        self.pos += 1;
        self.skip_top()?;
        self.eat(TokenKind::Into);
        self.table_ref(false)?;

        let columns: Vec<String> = if self.peek_kind() == Some(TokenKind::LParen) {
            self.split_group()?
                .into_iter()
                .map(|(from, to)| self.span(from, to))
                .collect()
        } else {
            Vec::new()
        };

        if self.eat(TokenKind::Output) {
            while let Some(kind) = self.peek_kind() {
                if matches!(
                    kind,
                    TokenKind::Values | TokenKind::Select | TokenKind::Execute | TokenKind::Default
                ) || self.peek().is_some_and(|t| t.is_word("EXEC"))
                {
                    break;
                }
                self.pos += 1;
            }
        }

        match self.peek_kind() {
            Some(TokenKind::Values) => {
                self.pos += 1;
                while self.peek_kind() == Some(TokenKind::LParen) {
                    self.values_tuple(&columns)?;
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.scan_rest()
            }
            Some(TokenKind::Default) => {
                self.pos += 1;
                self.eat(TokenKind::Values);
                Ok(())
            }
            Some(TokenKind::Execute) => {
                self.insert_exec_arguments();
                Ok(())
            }
            _ if self.peek().is_some_and(|t| t.is_word("EXEC")) => {
                self.insert_exec_arguments();
                Ok(())
            }
            _ => self.scan_rest(),
        }
    }

    // Procedure arguments of `INSERT ... EXEC` have no column to describe.
    fn insert_exec_arguments(&mut self) {
        while let Some(token) = self.peek() {
            if token.kind == TokenKind::Placeholder {
                self.out.columns.push(String::new());
            }
            self.pos += 1;
        }
    }

    fn values_tuple(&mut self, columns: &[String]) -> Result<()> {
        let parts = self.split_group()?;
        if !columns.is_empty() && parts.len() != columns.len() {
            return Err(SqlError::InvalidInsertValues {
                expected: columns.len(),
                actual: parts.len(),
            });
        }

        let mut tuple = Vec::with_capacity(parts.len());
        for (i, &(from, to)) in parts.iter().enumerate() {
            tuple.push(self.span(from, to));
            if !self.has_placeholder(from, to) {
                continue;
            }
            match columns.get(i) {
                Some(column) => self.out.columns.push(column.clone()),
                None => {
                    if !self.out.columns.iter().any(|c| c == "*") {
                        self.out.columns.push("*".to_string());
                    }
                    self.out.columns.push(PLACEHOLDER.to_string());
                }
            }
        }
        self.out.values.push(tuple);
        Ok(())
    }

    fn parse_update(&mut self) -> Result<()> {
        self.pos += 1;
        self.skip_top()?;
        self.table_ref(false)?;
        self.scan_rest()
    }

    fn parse_delete(&mut self) -> Result<()> {
        self.pos += 1;
        self.skip_top()?;
        self.eat(TokenKind::From);
        self.table_ref(false)?;
        self.scan_rest()
    }

    fn parse_merge(&mut self) -> Result<()> {
        self.pos += 1;
        self.skip_top()?;
        self.eat(TokenKind::Into);
        self.table_ref(false)?;
        if self.eat_word("USING") {
            self.table_ref(true)?;
        }
        self.scan_rest()
    }
}
