use std::fmt;

use crate::lexer::cursor::Cursor;

pub mod cursor;

/// A 'light' token that only carries its kind and length. The text is sliced
/// from the source by whoever tracks the position.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub len: u32,
}

impl Token {
    pub fn new(kind: TokenKind, len: u32) -> Self {
        Token { kind, len }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LiteralKind {
    Dec,
    /// `0x` prefixed
    Hex,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    /// Labels, mnemonics, registers and `dup`
    Ident,
    Lit(LiteralKind),
    Hash,
    Colon,
    Comma,
    Plus,
    Minus,
    /// `//` up to the end of the line
    Comment,
    Whitespace,
    Unknown,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Ident => "identifier",
            TokenKind::Lit(_) => "number",
            TokenKind::Hash => "`#`",
            TokenKind::Colon => "`:`",
            TokenKind::Comma => "`,`",
            TokenKind::Plus => "`+`",
            TokenKind::Minus => "`-`",
            TokenKind::Comment => "comment",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Unknown => "unknown token",
            TokenKind::Eof => "end of line",
        };
        f.write_str(text)
    }
}

/// Lex the whole input, stopping before `Eof`.
pub fn tokenize(input: &str) -> impl Iterator<Item = Token> + '_ {
    let mut cursor = Cursor::new(input);
    std::iter::from_fn(move || {
        let token = cursor.advance_token();
        if token.kind != TokenKind::Eof {
            Some(token)
        } else {
            None
        }
    })
}

pub(crate) fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

pub(crate) fn is_id_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub(crate) fn is_id(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl Cursor<'_> {
    pub fn advance_token(&mut self) -> Token {
        let first_char = match self.bump() {
            Some(c) => c,
            None => return Token::new(TokenKind::Eof, 0),
        };
        let token_kind = match first_char {
            '/' if self.first() == '/' => {
                self.take_while(|c| c != '\n');
                TokenKind::Comment
            }
            c if is_whitespace(c) => {
                self.take_while(is_whitespace);
                TokenKind::Whitespace
            }
            '0' if matches!(self.first(), 'x' | 'X') => {
                self.bump();
                self.take_while(|c| c.is_ascii_hexdigit());
                TokenKind::Lit(LiteralKind::Hex)
            }
            c if c.is_ascii_digit() => {
                self.take_while(|c| c.is_ascii_digit());
                TokenKind::Lit(LiteralKind::Dec)
            }
            c if is_id_start(c) => {
                self.take_while(is_id);
                TokenKind::Ident
            }
            '#' => TokenKind::Hash,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            _ => TokenKind::Unknown,
        };
        let res = Token::new(token_kind, self.pos_in_token());
        self.reset_pos();
        res
    }
}
