//! HOIL lexer: character stream to token stream.
//!
//! The lexer is lazy and non-restartable — it owns an iterator over the
//! source's characters and is driven forward one token at a time — with a
//! one-token lookahead buffer so the parser can peek before committing to a
//! production. Whitespace and comments are skipped silently; an
//! unterminated block comment or string literal reports through the caller
//! (via the returned [`TokenKind::Error`]) rather than panicking.

use std::iter::Peekable;
use std::str::Chars;

use crate::diagnostics::SourceLocation;

/// Keywords reserved by the HOIL grammar (module/declaration structure).
pub const KEYWORDS: &[&str] = &[
    "MODULE", "TYPE", "CONSTANT", "GLOBAL", "FUNCTION", "EXTERN", "TARGET", "ENTRY", "BR",
    "ALWAYS", "RET", "CALL",
];

/// Keywords that introduce a type in type position.
pub const TYPE_KEYWORDS: &[&str] = &[
    "void", "bool", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f16", "f32", "f64",
    "ptr", "array", "vec", "function",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Eof,
    Ident(String),
    Keyword(&'static str),
    TypeKeyword(&'static str),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semi,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Eq,
    Lt,
    Gt,
    Dot,
    Arrow,
    /// A lexical error; `message` is suitable for direct reporting through
    /// the diagnostic sink.
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: SourceLocation,
}

impl Token {
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}

/// A lazy, one-token-lookahead scanner over HOIL source text.
#[derive(Clone)]
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    column: u32,
    lookahead: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Lexer<'a> {
        Lexer {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
            lookahead: None,
        }
    }

    fn here(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn skip_trivia(&mut self) -> Option<TokenKind> {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut clone = self.chars.clone();
                    clone.next();
                    match clone.peek() {
                        Some('/') => {
                            self.bump();
                            self.bump();
                            while let Some(c) = self.peek_char() {
                                if c == '\n' {
                                    break;
                                }
                                self.bump();
                            }
                        }
                        Some('*') => {
                            self.bump();
                            self.bump();
                            let mut closed = false;
                            while let Some(c) = self.bump() {
                                if c == '*' && self.peek_char() == Some('/') {
                                    self.bump();
                                    closed = true;
                                    break;
                                }
                            }
                            if !closed {
                                return Some(TokenKind::Error(
                                    "unterminated block comment".to_string(),
                                ));
                            }
                        }
                        _ => return None,
                    }
                }
                _ => return None,
            }
        }
    }

    fn lex_number(&mut self, first: char) -> TokenKind {
        let mut text = String::new();
        text.push(first);

        if first == '0' && matches!(self.peek_char(), Some('x') | Some('X')) {
            text.push(self.bump().unwrap());
            while let Some(c) = self.peek_char() {
                if c.is_ascii_hexdigit() {
                    text.push(self.bump().unwrap());
                } else {
                    break;
                }
            }
            return match i64::from_str_radix(&text[2..], 16) {
                Ok(v) => TokenKind::Int(v),
                Err(_) => TokenKind::Error(format!("invalid hex literal '{text}'")),
            };
        }
        if first == '0' && matches!(self.peek_char(), Some('b') | Some('B')) {
            text.push(self.bump().unwrap());
            while let Some(c) = self.peek_char() {
                if c == '0' || c == '1' {
                    text.push(self.bump().unwrap());
                } else {
                    break;
                }
            }
            return match i64::from_str_radix(&text[2..], 2) {
                Ok(v) => TokenKind::Int(v),
                Err(_) => TokenKind::Error(format!("invalid binary literal '{text}'")),
            };
        }

        let mut is_float = false;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                text.push(self.bump().unwrap());
            } else {
                break;
            }
        }
        if self.peek_char() == Some('.') {
            let mut clone = self.chars.clone();
            clone.next();
            if clone.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push(self.bump().unwrap());
                while let Some(c) = self.peek_char() {
                    if c.is_ascii_digit() {
                        text.push(self.bump().unwrap());
                    } else {
                        break;
                    }
                }
            }
        }
        if matches!(self.peek_char(), Some('e') | Some('E')) {
            let mut clone = self.chars.clone();
            clone.next();
            let mut lookahead_ok = false;
            match clone.peek() {
                Some('+') | Some('-') => {
                    clone.next();
                    lookahead_ok = clone.peek().is_some_and(|c| c.is_ascii_digit());
                }
                Some(c) if c.is_ascii_digit() => lookahead_ok = true,
                _ => {}
            }
            if lookahead_ok {
                is_float = true;
                text.push(self.bump().unwrap());
                if matches!(self.peek_char(), Some('+') | Some('-')) {
                    text.push(self.bump().unwrap());
                }
                while let Some(c) = self.peek_char() {
                    if c.is_ascii_digit() {
                        text.push(self.bump().unwrap());
                    } else {
                        break;
                    }
                }
            }
        }

        if is_float {
            match text.parse::<f64>() {
                Ok(v) => TokenKind::Float(v),
                Err(_) => TokenKind::Error(format!("invalid float literal '{text}'")),
            }
        } else {
            match text.parse::<i64>() {
                Ok(v) => TokenKind::Int(v),
                Err(_) => TokenKind::Error(format!("invalid integer literal '{text}'")),
            }
        }
    }

    fn lex_string(&mut self) -> TokenKind {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return TokenKind::Error("unterminated string literal".to_string()),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some('0') => out.push('\0'),
                    Some(other) => {
                        return TokenKind::Error(format!("invalid escape sequence '\\{other}'"))
                    }
                    None => return TokenKind::Error("unterminated string literal".to_string()),
                },
                Some(c) => out.push(c),
            }
        }
        TokenKind::Str(out)
    }

    fn lex_ident(&mut self, first: char) -> TokenKind {
        let mut text = String::new();
        text.push(first);
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                // '.' only continues an identifier for dotted mnemonics
                // like `cmp.eq`; a bare `.` used as the member-access
                // operator is re-split by the parser when it doesn't see a
                // known mnemonic suffix. Keep the lexer simple: only
                // consume '.' immediately followed by an alphabetic char.
                if c == '.' {
                    let mut clone = self.chars.clone();
                    clone.next();
                    if !clone.peek().is_some_and(|n| n.is_alphabetic()) {
                        break;
                    }
                }
                text.push(self.bump().unwrap());
            } else {
                break;
            }
        }
        if let Some(&kw) = KEYWORDS.iter().find(|&&k| k == text) {
            TokenKind::Keyword(kw)
        } else if let Some(&kw) = TYPE_KEYWORDS.iter().find(|&&k| k == text) {
            TokenKind::TypeKeyword(kw)
        } else {
            TokenKind::Ident(text)
        }
    }

    fn scan(&mut self) -> Token {
        if let Some(err) = self.skip_trivia() {
            let loc = self.here();
            return Token { kind: err, location: loc };
        }
        let loc = self.here();
        let Some(c) = self.bump() else {
            return Token { kind: TokenKind::Eof, location: loc };
        };
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semi,
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '&' => TokenKind::Amp,
            '|' => TokenKind::Pipe,
            '^' => TokenKind::Caret,
            '~' => TokenKind::Tilde,
            '!' => TokenKind::Bang,
            '=' => TokenKind::Eq,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '.' => TokenKind::Dot,
            '-' => {
                if self.peek_char() == Some('>') {
                    self.bump();
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '"' => self.lex_string(),
            c if c.is_ascii_digit() => self.lex_number(c),
            c if c.is_alphabetic() || c == '_' => self.lex_ident(c),
            other => TokenKind::Error(format!("unexpected character '{other}'")),
        };
        Token { kind, location: loc }
    }

    /// Returns the next token, consuming it, without disturbing a pending
    /// lookahead.
    pub fn next_token(&mut self) -> Token {
        if let Some(tok) = self.lookahead.take() {
            return tok;
        }
        self.scan()
    }

    /// Peeks the next token without consuming it. Idempotent: repeated
    /// calls without an intervening [`next_token`](Self::next_token) return
    /// the same token.
    pub fn peek(&mut self) -> &Token {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.scan());
        }
        self.lookahead.as_ref().unwrap()
    }

    /// A throwaway clone positioned exactly where `self` is, for
    /// multi-token lookahead decisions the parser needs to make (block
    /// label vs. instruction, branch target vs. value) without disturbing
    /// the real cursor.
    pub fn clone_for_lookahead(&self) -> Lexer<'a> {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lex = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lex.next_token();
            let done = tok.is_eof();
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn keywords_and_identifiers() {
        let k = kinds("MODULE foo");
        assert_eq!(
            k,
            vec![
                TokenKind::Keyword("MODULE"),
                TokenKind::Ident("foo".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numeric_literals() {
        let k = kinds("42 0x2A 0b101010 3.5 1e10");
        assert_eq!(
            k,
            vec![
                TokenKind::Int(42),
                TokenKind::Int(42),
                TokenKind::Int(42),
                TokenKind::Float(3.5),
                TokenKind::Float(1e10),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let k = kinds(r#""a\nb\"c""#);
        assert_eq!(k, vec![TokenKind::Str("a\nb\"c".to_string()), TokenKind::Eof]);
    }

    #[test]
    fn line_comment_skipped() {
        let k = kinds("1 // comment\n2");
        assert_eq!(k, vec![TokenKind::Int(1), TokenKind::Int(2), TokenKind::Eof]);
    }

    #[test]
    fn unterminated_block_comment_errors() {
        let k = kinds("1 /* oops");
        assert!(matches!(k[1], TokenKind::Error(_)));
    }

    #[test]
    fn peek_is_idempotent() {
        let mut lex = Lexer::new("a b");
        assert_eq!(lex.peek().kind, TokenKind::Ident("a".to_string()));
        assert_eq!(lex.peek().kind, TokenKind::Ident("a".to_string()));
        assert_eq!(lex.next_token().kind, TokenKind::Ident("a".to_string()));
        assert_eq!(lex.next_token().kind, TokenKind::Ident("b".to_string()));
    }

    #[test]
    fn dotted_mnemonic_stays_one_token() {
        let k = kinds("cmp.eq");
        assert_eq!(k, vec![TokenKind::Ident("cmp.eq".to_string()), TokenKind::Eof]);
    }

    #[test]
    fn minus_vs_arrow() {
        let k = kinds("- ->");
        assert_eq!(k, vec![TokenKind::Minus, TokenKind::Arrow, TokenKind::Eof]);
    }
}
