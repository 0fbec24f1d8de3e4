// Heavily inspired by `rustc_lexer` and adapted to suit the project.
// See https://doc.rust-lang.org/beta/nightly-rustc/src/rustc_lexer/cursor.rs.html

use std::str::Chars;

pub(crate) const EOF_CHAR: char = '\0';

/// Peekable iterator over a char sequence.
#[derive(Clone)]
pub struct Cursor<'a> {
    /// Length of input at the start of the current token
    len_remaining: usize,
    chars: Chars<'a>,
}

impl<'a> Cursor<'a> {
    pub fn new(input: &'a str) -> Cursor<'a> {
        Cursor {
            len_remaining: input.len(),
            chars: input.chars(),
        }
    }

    /// Peek the next char without consuming it. `EOF_CHAR` at the end.
    pub fn first(&self) -> char {
        self.chars.clone().next().unwrap_or(EOF_CHAR)
    }

    pub fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    /// Bytes consumed since the last `reset_pos`.
    pub fn pos_in_token(&self) -> u32 {
        (self.len_remaining - self.chars.as_str().len()) as u32
    }

    /// Start a new token at the current position.
    pub fn reset_pos(&mut self) {
        self.len_remaining = self.chars.as_str().len();
    }

    pub fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    /// Eat chars while `predicate` holds or until the end of input.
    pub fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while predicate(self.first()) && !self.is_eof() {
            self.bump();
        }
    }
}
