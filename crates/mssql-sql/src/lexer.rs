//! T-SQL tokenizer.
//!
//! The lexer classifies just enough of T-SQL for the rewriter: keywords it
//! dispatches on, names, literals, operators and punctuation. Whitespace and
//! comments are emitted on the hidden channel so that concatenating the text
//! of every token reproduces the input exactly.
//!
//! Block comments do not nest: the first `*/` closes the comment.

use std::borrow::Cow;

use crate::error::{Result, SqlError};

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TokenKind {
    // Keywords.
    /// `SELECT`
    Select,
    /// `INSERT`
    Insert,
    /// `DELETE`
    Delete,
    /// `UPDATE`
    Update,
    /// `FROM`
    From,
    /// `INTO`
    Into,
    /// `EXECUTE`
    Execute,
    /// `WHERE`
    Where,
    /// `HAVING`
    Having,
    /// `GROUP`
    Group,
    /// `ORDER`
    Order,
    /// `OPTION`
    Option,
    /// `BY`
    By,
    /// `VALUES`
    Values,
    /// `OUTPUT`
    Output,
    /// `OJ` (ODBC outer join escape)
    Oj,
    /// `WITH`
    With,
    /// `AS`
    As,
    /// `DEFAULT`
    Default,
    /// `SET`
    Set,
    /// `OPENQUERY`
    OpenQuery,
    /// `OPENJSON`
    OpenJson,
    /// `OPENDATASOURCE`
    OpenDataSource,
    /// `OPENROWSET`
    OpenRowset,
    /// `OPENXML`
    OpenXml,
    /// `TOP`
    Top,
    /// `DISTINCT`
    Distinct,
    /// `PERCENT`
    Percent,
    /// `TIES`
    Ties,

    // Hidden channel.
    /// Whitespace run.
    Space,
    /// `/* ... */`
    Comment,
    /// `-- ...` up to the end of the line.
    LineComment,

    // Names and literals.
    /// `@name`
    LocalId,
    /// Plain identifier, including `#temp` names.
    Id,
    /// `'...'` or `N'...'`
    String,
    /// `"..."`
    DoubleLiteral,
    /// `[...]`
    SquareLiteral,
    /// Integer literal.
    Decimal,
    /// `0x...`
    Binary,
    /// Literal with a decimal point.
    Float,
    /// Literal with an exponent.
    Real,

    // Operators and punctuation.
    /// `=`
    Equal,
    /// `>`
    Greater,
    /// `<`
    Less,
    /// `>=`
    GreaterEqual,
    /// `<=`
    LessEqual,
    /// `!=` or `<>`
    NotEqual,
    /// `!`
    Exclamation,
    /// `+=`
    PlusAssign,
    /// `-=`
    MinusAssign,
    /// `*=`
    MultAssign,
    /// `/=`
    DivAssign,
    /// `%=`
    ModAssign,
    /// `&=`
    AndAssign,
    /// `^=`
    XorAssign,
    /// `|=`
    OrAssign,
    /// `||`
    DoubleBar,
    /// `.`
    Dot,
    /// `@` not followed by a name.
    At,
    /// `$`
    Dollar,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `]` without an opening bracket.
    RBracket,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `,`
    Comma,
    /// `;`
    Semicolon,
    /// `:`
    Colon,
    /// `*`
    Star,
    /// `/`
    Divide,
    /// `%`
    Modulo,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `~`
    BitNot,
    /// `|`
    BitOr,
    /// `&`
    BitAnd,
    /// `^`
    BitXor,
    /// `?` parameter marker.
    Placeholder,
    /// Any character the lexer does not classify.
    Unknown,
}

const KEYWORDS: [(&str, TokenKind); 29] = [
    ("SELECT", TokenKind::Select),
    ("INSERT", TokenKind::Insert),
    ("DELETE", TokenKind::Delete),
    ("UPDATE", TokenKind::Update),
    ("FROM", TokenKind::From),
    ("INTO", TokenKind::Into),
    ("EXECUTE", TokenKind::Execute),
    ("WHERE", TokenKind::Where),
    ("HAVING", TokenKind::Having),
    ("GROUP", TokenKind::Group),
    ("ORDER", TokenKind::Order),
    ("OPTION", TokenKind::Option),
    ("BY", TokenKind::By),
    ("VALUES", TokenKind::Values),
    ("OUTPUT", TokenKind::Output),
    ("OJ", TokenKind::Oj),
    ("WITH", TokenKind::With),
    ("AS", TokenKind::As),
    ("DEFAULT", TokenKind::Default),
    ("SET", TokenKind::Set),
    ("OPENQUERY", TokenKind::OpenQuery),
    ("OPENJSON", TokenKind::OpenJson),
    ("OPENDATASOURCE", TokenKind::OpenDataSource),
    ("OPENROWSET", TokenKind::OpenRowset),
    ("OPENXML", TokenKind::OpenXml),
    ("TOP", TokenKind::Top),
    ("DISTINCT", TokenKind::Distinct),
    ("PERCENT", TokenKind::Percent),
    ("TIES", TokenKind::Ties),
];

impl TokenKind {
    /// Look up a keyword, ignoring case.
    #[must_use]
    pub fn keyword(word: &str) -> Option<Self> {
        KEYWORDS
            .iter()
            .find(|(kw, _)| kw.eq_ignore_ascii_case(word))
            .map(|(_, kind)| *kind)
    }

    /// Check if this is one of the keyword kinds.
    #[must_use]
    pub fn is_keyword(&self) -> bool {
        KEYWORDS.iter().any(|(_, kind)| kind == self)
    }

    /// Check if this is an `OPEN*` rowset function keyword.
    #[must_use]
    pub const fn is_rowset_function(&self) -> bool {
        matches!(
            self,
            Self::OpenQuery | Self::OpenJson | Self::OpenDataSource | Self::OpenRowset | Self::OpenXml
        )
    }

    /// Check if this kind can name an object (`name`, `[name]`, `"name"`).
    #[must_use]
    pub const fn is_name(&self) -> bool {
        matches!(self, Self::Id | Self::SquareLiteral | Self::DoubleLiteral)
    }

    /// Comparison, arithmetic and compound-assignment operators.
    #[must_use]
    pub const fn is_operator(&self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::Greater
                | Self::Less
                | Self::GreaterEqual
                | Self::LessEqual
                | Self::NotEqual
                | Self::PlusAssign
                | Self::MinusAssign
                | Self::MultAssign
                | Self::DivAssign
                | Self::ModAssign
                | Self::AndAssign
                | Self::XorAssign
                | Self::OrAssign
                | Self::DoubleBar
                | Self::Star
                | Self::Divide
                | Self::Modulo
                | Self::Plus
                | Self::Minus
                | Self::BitOr
                | Self::BitAnd
                | Self::BitXor
        )
    }

    /// Whitespace and comments.
    #[must_use]
    pub const fn is_trivia(&self) -> bool {
        matches!(self, Self::Space | Self::Comment | Self::LineComment)
    }
}

/// Token channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Tokens the rewriter looks at.
    Default,
    /// Whitespace and comments.
    Hidden,
}

/// One lexeme of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// Classification.
    pub kind: TokenKind,
    /// Raw text, delimiters included.
    pub text: &'a str,
    /// Byte offset of the first character.
    pub offset: usize,
    /// Channel the token is routed to.
    pub channel: Channel,
}

impl<'a> Token<'a> {
    /// Byte offset one past the last character.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }

    /// Check if the token is on the hidden channel.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.channel == Channel::Hidden
    }

    /// Check if this is the identifier `word`, ignoring case.
    #[must_use]
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Id && self.text.eq_ignore_ascii_case(word)
    }

    /// Text with quoting removed and escapes collapsed.
    ///
    /// `N'it''s'` becomes `it's`, `[a]]b]` becomes `a]b` and `"a""b"`
    /// becomes `a"b`. Other tokens are returned unchanged.
    #[must_use]
    pub fn unescaped(&self) -> Cow<'a, str> {
        let text = self.text;
        let (body, quote) = match self.kind {
            TokenKind::String => {
                let body = text
                    .strip_prefix(['N', 'n'])
                    .unwrap_or(text)
                    .strip_prefix('\'')
                    .unwrap_or(text);
                (body.strip_suffix('\'').unwrap_or(body), "'")
            }
            TokenKind::SquareLiteral => {
                let body = text.strip_prefix('[').unwrap_or(text);
                (body.strip_suffix(']').unwrap_or(body), "]")
            }
            TokenKind::DoubleLiteral => {
                let body = text.strip_prefix('"').unwrap_or(text);
                (body.strip_suffix('"').unwrap_or(body), "\"")
            }
            _ => return Cow::Borrowed(text),
        };

        let doubled = quote.repeat(2);
        if body.contains(doubled.as_str()) {
            Cow::Owned(body.replace(doubled.as_str(), quote))
        } else {
            Cow::Borrowed(body)
        }
    }
}

/// Streaming tokenizer.
///
/// In lenient mode an unterminated construct becomes one token running to the
/// end of the input. In strict mode it is reported as
/// [`SqlError::Unterminated`] and iteration ends.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    strict: bool,
    done: bool,
}

impl<'a> Lexer<'a> {
    /// Create a lenient lexer.
    #[must_use]
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            strict: false,
            done: false,
        }
    }

    /// Report unterminated constructs as errors.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) {
        if let Some(c) = self.rest().chars().next() {
            self.pos += c.len_utf8();
        }
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) {
        let len = self
            .rest()
            .char_indices()
            .find(|&(_, c)| !pred(c))
            .map_or(self.rest().len(), |(i, _)| i);
        self.pos += len;
    }

    // Consume a quoted run whose opening delimiter is at `self.pos`.
    // A doubled closing delimiter is an escape. Returns false if unterminated.
    fn eat_quoted(&mut self, close: char) -> bool {
        self.bump();
        loop {
            match self.rest().find(close) {
                None => {
                    self.pos = self.src.len();
                    return false;
                }
                Some(i) => {
                    self.pos += i + close.len_utf8();
                    if self.rest().starts_with(close) {
                        self.pos += close.len_utf8();
                    } else {
                        return true;
                    }
                }
            }
        }
    }

    fn eat_number(&mut self) -> TokenKind {
        let mut kind = TokenKind::Decimal;
        self.eat_while(|c| c.is_ascii_digit());
        if self.rest().starts_with('.') {
            self.bump();
            self.eat_while(|c| c.is_ascii_digit());
            kind = TokenKind::Float;
        }
        if matches!(self.peek_nth(0), Some('e' | 'E')) {
            let digit_at = match self.peek_nth(1) {
                Some('+' | '-') => 2,
                _ => 1,
            };
            if self.peek_nth(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..digit_at {
                    self.bump();
                }
                self.eat_while(|c| c.is_ascii_digit());
                kind = TokenKind::Real;
            }
        }
        kind
    }

    // Consume `c` and, if the next char is `follow`, that too.
    fn operator(&mut self, follow: char, single: TokenKind, double: TokenKind) -> TokenKind {
        self.bump();
        if self.rest().starts_with(follow) {
            self.bump();
            double
        } else {
            single
        }
    }

    fn scan(&mut self) -> Option<(TokenKind, Option<&'static str>)> {
        let mut chars = self.rest().chars();
        let c = chars.next()?;
        let next = chars.next();

        let kind = match c {
            c if c.is_whitespace() => {
                self.eat_while(char::is_whitespace);
                TokenKind::Space
            }
            '-' if next == Some('-') => {
                self.eat_while(|c| c != '\n' && c != '\r');
                TokenKind::LineComment
            }
            '/' if next == Some('*') => match self.rest()[2..].find("*/") {
                Some(i) => {
                    self.pos += 2 + i + 2;
                    TokenKind::Comment
                }
                None => {
                    self.pos = self.src.len();
                    return Some((TokenKind::Comment, Some("block comment")));
                }
            },
            'N' | 'n' if next == Some('\'') => {
                self.bump();
                if !self.eat_quoted('\'') {
                    return Some((TokenKind::String, Some("string literal")));
                }
                TokenKind::String
            }
            '\'' => {
                if !self.eat_quoted('\'') {
                    return Some((TokenKind::String, Some("string literal")));
                }
                TokenKind::String
            }
            '"' => {
                if !self.eat_quoted('"') {
                    return Some((TokenKind::DoubleLiteral, Some("quoted identifier")));
                }
                TokenKind::DoubleLiteral
            }
            '[' => {
                if !self.eat_quoted(']') {
                    return Some((TokenKind::SquareLiteral, Some("bracketed identifier")));
                }
                TokenKind::SquareLiteral
            }
            '@' if next.is_some_and(is_ident_continue) => {
                self.bump();
                self.eat_while(is_ident_continue);
                TokenKind::LocalId
            }
            '0' if matches!(next, Some('x' | 'X')) => {
                self.pos += 2;
                self.eat_while(|c| c.is_ascii_hexdigit());
                TokenKind::Binary
            }
            c if c.is_ascii_digit() => self.eat_number(),
            '.' if next.is_some_and(|c| c.is_ascii_digit()) => self.eat_number(),
            c if is_ident_start(c) => {
                let start = self.pos;
                self.bump();
                self.eat_while(is_ident_continue);
                TokenKind::keyword(&self.src[start..self.pos]).unwrap_or(TokenKind::Id)
            }
            '>' => self.operator('=', TokenKind::Greater, TokenKind::GreaterEqual),
            '<' => {
                self.bump();
                match self.peek_nth(0) {
                    Some('=') => {
                        self.bump();
                        TokenKind::LessEqual
                    }
                    Some('>') => {
                        self.bump();
                        TokenKind::NotEqual
                    }
                    _ => TokenKind::Less,
                }
            }
            '!' => self.operator('=', TokenKind::Exclamation, TokenKind::NotEqual),
            '+' => self.operator('=', TokenKind::Plus, TokenKind::PlusAssign),
            '-' => self.operator('=', TokenKind::Minus, TokenKind::MinusAssign),
            '*' => self.operator('=', TokenKind::Star, TokenKind::MultAssign),
            '/' => self.operator('=', TokenKind::Divide, TokenKind::DivAssign),
            '%' => self.operator('=', TokenKind::Modulo, TokenKind::ModAssign),
            '&' => self.operator('=', TokenKind::BitAnd, TokenKind::AndAssign),
            '^' => self.operator('=', TokenKind::BitXor, TokenKind::XorAssign),
            '|' => {
                self.bump();
                match self.peek_nth(0) {
                    Some('=') => {
                        self.bump();
                        TokenKind::OrAssign
                    }
                    Some('|') => {
                        self.bump();
                        TokenKind::DoubleBar
                    }
                    _ => TokenKind::BitOr,
                }
            }
            other => {
                self.bump();
                match other {
                    '=' => TokenKind::Equal,
                    '.' => TokenKind::Dot,
                    '@' => TokenKind::At,
                    '$' => TokenKind::Dollar,
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    ']' => TokenKind::RBracket,
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    ',' => TokenKind::Comma,
                    ';' => TokenKind::Semicolon,
                    ':' => TokenKind::Colon,
                    '~' => TokenKind::BitNot,
                    '?' => TokenKind::Placeholder,
                    _ => TokenKind::Unknown,
                }
            }
        };
        Some((kind, None))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let start = self.pos;
        let (kind, unterminated) = self.scan()?;

        if let (Some(construct), true) = (unterminated, self.strict) {
            self.done = true;
            return Some(Err(SqlError::Unterminated {
                construct,
                offset: start,
            }));
        }

        let channel = if kind.is_trivia() {
            Channel::Hidden
        } else {
            Channel::Default
        };
        Some(Ok(Token {
            kind,
            text: &self.src[start..self.pos],
            offset: start,
            channel,
        }))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '#'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '#' | '$' | '@')
}

/// Tokenize leniently. Never fails; the token texts concatenate to `sql`.
#[must_use]
pub fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let tokens: Vec<_> = Lexer::new(sql).flatten().collect();
    tracing::trace!(tokens = tokens.len(), bytes = sql.len(), "tokenized");
    tokens
}

/// Tokenize, failing on unterminated quotes, brackets or block comments.
pub fn tokenize_strict(sql: &str) -> Result<Vec<Token<'_>>> {
    Lexer::new(sql).strict().collect()
}
