use std::ops::Range;

use miette::{NamedSource, Report};

use crate::air::{AsmLine, Offset, Operand, SourceFile};
use crate::error::{
    syntax_bad_dup, syntax_bad_literal, syntax_unexpected, syntax_unknown, syntax_unknown_mnemonic,
};
use crate::isa::{Opcode, Register};
use crate::lexer::{tokenize, LiteralKind, TokenKind};

/// Parses a whole assembly file, one line at a time.
pub struct AsmParser<'a> {
    name: String,
    src: &'a str,
}

impl<'a> AsmParser<'a> {
    pub fn new(name: impl Into<String>, src: &'a str) -> Self {
        AsmParser {
            name: name.into(),
            src,
        }
    }

    /// Create the IR of every non-empty line. Every syntax error in the file
    /// is collected, each with the source attached.
    pub fn parse(self) -> Result<SourceFile, Vec<Report>> {
        let mut file = SourceFile::new(self.name.clone());
        let mut errors = Vec::new();

        let mut base = 0;
        for (i, text) in self.src.split('\n').enumerate() {
            match LineParser::new(text, base).parse() {
                Ok(Some(line)) => file.push(i + 1, line),
                Ok(None) => {}
                Err(report) => errors.push(
                    report.with_source_code(NamedSource::new(&self.name, self.src.to_owned())),
                ),
            }
            base += text.len() + 1;
        }

        if errors.is_empty() {
            Ok(file)
        } else {
            Err(errors)
        }
    }
}

/// Parse a single line; `None` for blank and comment-only lines.
pub fn parse_line(text: &str) -> Result<Option<AsmLine>, Report> {
    LineParser::new(text, 0).parse()
}

/// Token with its byte range inside the line.
#[derive(Clone, Copy, Debug)]
struct Spanned {
    kind: TokenKind,
    start: usize,
    end: usize,
}

struct LineParser<'a> {
    text: &'a str,
    /// Offset of the line inside its file
    base: usize,
    /// Tokens without whitespace and comments
    toks: Vec<Spanned>,
    idx: usize,
}

impl<'a> LineParser<'a> {
    fn new(text: &'a str, base: usize) -> Self {
        let mut toks = Vec::new();
        let mut start = 0;
        for tok in tokenize(text) {
            let end = start + tok.len as usize;
            if !matches!(tok.kind, TokenKind::Whitespace | TokenKind::Comment) {
                toks.push(Spanned {
                    kind: tok.kind,
                    start,
                    end,
                });
            }
            start = end;
        }
        LineParser {
            text,
            base,
            toks,
            idx: 0,
        }
    }

    fn parse(mut self) -> Result<Option<AsmLine>, Report> {
        if self.toks.is_empty() {
            return Ok(None);
        }

        let label = match (self.peek_nth(0), self.peek_nth(1)) {
            (Some(name), Some(colon))
                if name.kind == TokenKind::Ident && colon.kind == TokenKind::Colon =>
            {
                self.idx += 2;
                Some(self.text(name).to_owned())
            }
            _ => None,
        };

        let mut line = AsmLine::new(self.expect_mnemonic()?, Vec::new());
        line.label = label;

        if self.peek().is_some() && !self.at_dup() {
            loop {
                let operand = self.parse_operand()?;
                line.operands.push(operand);
                match self.peek() {
                    Some(tok) if tok.kind == TokenKind::Comma => self.idx += 1,
                    _ => break,
                }
            }
        }

        if self.at_dup() {
            self.idx += 1;
            line.dup = Some(self.parse_dup()?);
        }

        match self.next() {
            None => Ok(Some(line)),
            tok => Err(self.unexpected(tok, "`,`, `dup` or end of line")),
        }
    }

    fn peek(&self) -> Option<Spanned> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Option<Spanned> {
        self.toks.get(self.idx + n).copied()
    }

    fn next(&mut self) -> Option<Spanned> {
        let tok = self.peek();
        if tok.is_some() {
            self.idx += 1;
        }
        tok
    }

    fn text(&self, tok: Spanned) -> &'a str {
        &self.text[tok.start..tok.end]
    }

    fn span(&self, start: usize, end: usize) -> Range<usize> {
        self.base + start..self.base + end
    }

    fn unexpected(&self, tok: Option<Spanned>, expected: &str) -> Report {
        match tok {
            Some(tok) if tok.kind == TokenKind::Unknown => {
                syntax_unknown(self.span(tok.start, tok.end))
            }
            Some(tok) => syntax_unexpected(
                self.span(tok.start, tok.end),
                expected,
                &tok.kind.to_string(),
            ),
            None => {
                let end = self.text.trim_end().len();
                syntax_unexpected(self.span(end, end), expected, "end of line")
            }
        }
    }

    /// `dup` keyword followed by a count.
    fn at_dup(&self) -> bool {
        match (self.peek_nth(0), self.peek_nth(1)) {
            (Some(kw), Some(count)) => {
                kw.kind == TokenKind::Ident
                    && self.text(kw).eq_ignore_ascii_case("dup")
                    && matches!(
                        count.kind,
                        TokenKind::Lit(_) | TokenKind::Minus | TokenKind::Plus
                    )
            }
            _ => false,
        }
    }

    fn expect_mnemonic(&mut self) -> Result<Opcode, Report> {
        match self.next() {
            Some(tok) if tok.kind == TokenKind::Ident => {
                let text = self.text(tok);
                text.parse()
                    .map_err(|_| syntax_unknown_mnemonic(self.span(tok.start, tok.end), text))
            }
            tok => Err(self.unexpected(tok, "mnemonic")),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, Report> {
        let tok = self.next();
        match tok {
            Some(tok) if tok.kind == TokenKind::Hash => Ok(Operand::Immediate(self.parse_number()?)),
            Some(tok) if tok.kind == TokenKind::Ident => {
                let text = self.text(tok);
                let Ok(reg) = text.parse::<Register>() else {
                    return Ok(Operand::Symbol(text.to_owned()));
                };

                match self.peek().map(|tok| tok.kind) {
                    Some(TokenKind::Plus) => {
                        self.idx += 1;
                        let offset = match self.peek() {
                            Some(sym) if sym.kind == TokenKind::Ident => {
                                self.idx += 1;
                                Offset::Symbol(self.text(sym).to_owned())
                            }
                            _ => Offset::Immediate(self.parse_number()?),
                        };
                        Ok(Operand::RegOffset(reg, offset))
                    }
                    Some(TokenKind::Minus) => {
                        let start = self.peek().map_or(tok.end, |minus| minus.start);
                        self.idx += 1;
                        let value = self.parse_number()?;
                        let value = value.checked_neg().ok_or_else(|| {
                            let end = self.toks[self.idx - 1].end;
                            syntax_bad_literal(self.span(start, end), "does not fit in 32 bits")
                        })?;
                        Ok(Operand::RegOffset(reg, Offset::Immediate(value)))
                    }
                    _ => Ok(Operand::Register(reg)),
                }
            }
            tok => Err(self.unexpected(tok, "operand")),
        }
    }

    /// `['-'|'+'] decimal | 0x hex`
    fn parse_number(&mut self) -> Result<i32, Report> {
        let sign = match self.peek() {
            Some(tok) if matches!(tok.kind, TokenKind::Minus | TokenKind::Plus) => {
                self.idx += 1;
                Some(tok)
            }
            _ => None,
        };

        let tok = self.next();
        match tok {
            Some(lit) if lit.kind == TokenKind::Lit(LiteralKind::Dec) => {
                let start = sign.map_or(lit.start, |sign| sign.start);
                let negative = sign.is_some_and(|sign| sign.kind == TokenKind::Minus);
                let digits = self.text(lit);
                let text = if negative {
                    format!("-{digits}")
                } else {
                    digits.to_owned()
                };
                text.parse()
                    .map_err(|_| syntax_bad_literal(self.span(start, lit.end), "does not fit in 32 bits"))
            }
            Some(lit) if lit.kind == TokenKind::Lit(LiteralKind::Hex) => {
                if let Some(sign) = sign {
                    return Err(syntax_bad_literal(
                        self.span(sign.start, lit.end),
                        "hex literals cannot be signed",
                    ));
                }
                let digits = &self.text(lit)[2..];
                if digits.is_empty() {
                    return Err(syntax_bad_literal(
                        self.span(lit.start, lit.end),
                        "missing hex digits",
                    ));
                }
                i32::from_str_radix(digits, 16).map_err(|_| {
                    syntax_bad_literal(self.span(lit.start, lit.end), "does not fit in 32 bits")
                })
            }
            tok => Err(self.unexpected(tok, "number")),
        }
    }

    fn parse_dup(&mut self) -> Result<u32, Report> {
        let start = self.peek().map_or(0, |tok| tok.start);
        let count = self.parse_number()?;
        let end = self.toks[self.idx - 1].end;
        u32::try_from(count).map_err(|_| syntax_bad_dup(self.span(start, end)))
    }
}
