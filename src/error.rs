use std::fmt;
use std::ops::Range;

use miette::{miette, Diagnostic, LabeledSpan, Report, Severity};
use thiserror::Error;

use crate::buffer::BoundsError;

/// Width of an integer written to the object stream.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Width {
    Byte,
    Word,
}

impl Width {
    /// Accepted values: the union of the signed and unsigned ranges, with the
    /// word range extended down to -65536.
    pub fn range(self) -> Range<i64> {
        match self {
            Width::Byte => -128..256,
            Width::Word => -65536..65536,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Width::Byte => write!(f, "byte"),
            Width::Word => write!(f, "word"),
        }
    }
}

fn addressing(relative: &bool) -> &'static str {
    if *relative {
        "relatively"
    } else {
        "absolutely"
    }
}

/// Failure while encoding a line or resolving its symbols.
#[derive(Clone, PartialEq, Eq, Debug, Error, Diagnostic)]
pub enum AsmError {
    #[error("{0}")]
    #[diagnostic(
        code(asm::instruction),
        help("check the operands allowed for this instruction")
    )]
    Instruction(String),

    #[error("Integer overflow, trying to output {width}, have {value}")]
    #[diagnostic(code(asm::overflow))]
    Overflow { width: Width, value: i64 },

    #[error("Symbol: {0} already defined")]
    #[diagnostic(
        code(asm::duplicate_symbol),
        help("labels must be unique within a file, and exported labels across all files")
    )]
    DuplicateSymbol(String),

    #[error("Undefined symbol: {0}")]
    #[diagnostic(
        code(link::undefined),
        help("labels starting with `_` are not visible from other files")
    )]
    UndefinedSymbol(String),

    #[error("Symbol: {name} {} out of range: {value}", addressing(.relative))]
    #[diagnostic(code(asm::symbol_range))]
    SymbolOutOfRange {
        name: String,
        value: i64,
        relative: bool,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Bounds(#[from] BoundsError),
}

impl AsmError {
    pub fn instruction(msg: impl Into<String>) -> Self {
        AsmError::Instruction(msg.into())
    }

    /// Check that `value` can be written with `width`.
    pub fn verify_integer(value: i32, width: Width) -> Result<(), AsmError> {
        let value = value as i64;
        if width.range().contains(&value) {
            Ok(())
        } else {
            Err(AsmError::Overflow { width, value })
        }
    }
}

fn at_line(line: &Option<usize>) -> String {
    line.map(|line| format!("@{line}")).unwrap_or_default()
}

/// An [`AsmError`] tied to the file, and possibly the line, it came from.
#[derive(Clone, PartialEq, Eq, Debug, Error, Diagnostic)]
#[error("{file}{} ERROR: {error}", at_line(.line))]
pub struct FileError {
    pub file: String,
    pub line: Option<usize>,
    #[diagnostic_source]
    pub error: AsmError,
}

impl FileError {
    pub fn new(file: &str, line: Option<usize>, error: AsmError) -> Self {
        FileError {
            file: file.to_owned(),
            line,
            error,
        }
    }
}

/// Failure of the final, cross-file link step.
#[derive(Clone, PartialEq, Eq, Debug, Error, Diagnostic)]
pub enum LinkError {
    #[error("{files} file(s) failed to assemble")]
    #[diagnostic(code(link::assembly_failed))]
    AssemblyFailed { files: usize },

    #[error("{}", join_lines(.0))]
    #[diagnostic(code(link::symbol_range))]
    OutOfRange(Vec<FileError>),

    #[error("{}", undefined_lines(.0))]
    #[diagnostic(
        code(link::undefined),
        help("labels starting with `_` are not visible from other files")
    )]
    Undefined(Vec<String>),
}

fn join_lines(errors: &[FileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn undefined_lines(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("LINK ERR: {}", AsmError::UndefinedSymbol(name.clone())))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fault raised while loading or executing a program.
#[derive(Clone, PartialEq, Eq, Debug, Error, Diagnostic)]
pub enum CpuError {
    #[error("Error executing instruction at {iep:#06x} : {descr}")]
    #[diagnostic(code(cpu::instruction))]
    Instruction { iep: usize, descr: String },

    #[error("Memory fault at {iep:#06x} : {source}")]
    #[diagnostic(code(cpu::memory))]
    Memory { iep: usize, source: BoundsError },

    #[error("Object image is too big ({len}, max is {max})")]
    #[diagnostic(code(cpu::image_size))]
    ImageTooLarge { len: usize, max: usize },

    #[error("Object image is zero-length!")]
    #[diagnostic(code(cpu::empty_image))]
    EmptyImage,
}

// Syntax errors. Spans are byte ranges into the whole file, the source is
// attached by the file parser.

pub fn syntax_unexpected(span: Range<usize>, expected: &str, found: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::unexpected_token",
        help = "lines look like `label: mnemonic op, op, op dup n`",
        labels = vec![LabeledSpan::at(span, "unexpected token")],
        "Expected {expected}, found {found}",
    )
}

pub fn syntax_unknown_mnemonic(span: Range<usize>, found: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::mnemonic",
        help = "check the list of available instructions and directives",
        labels = vec![LabeledSpan::at(span, "unknown mnemonic")],
        "Unknown mnemonic `{found}`",
    )
}

pub fn syntax_bad_literal(span: Range<usize>, reason: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::bad_lit",
        help = "literals are decimal like #-12 or hex like #0x1F and must fit in 32 bits",
        labels = vec![LabeledSpan::at(span, "incorrect literal")],
        "Encountered an invalid literal: {reason}",
    )
}

pub fn syntax_bad_dup(span: Range<usize>) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::dup",
        help = "`dup` expects a non-negative count like `dup 16`",
        labels = vec![LabeledSpan::at(span, "invalid count")],
        "Expected a non-negative duplication count",
    )
}

pub fn syntax_unknown(span: Range<usize>) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::unknown",
        help = "make sure that your int literals start with #",
        labels = vec![LabeledSpan::at(span, "unknown token")],
        "Encountered an unknown token",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ranges() {
        assert!(AsmError::verify_integer(255, Width::Byte).is_ok());
        assert!(AsmError::verify_integer(-128, Width::Byte).is_ok());
        assert_eq!(
            AsmError::verify_integer(300, Width::Byte),
            Err(AsmError::Overflow {
                width: Width::Byte,
                value: 300
            })
        );
        assert!(AsmError::verify_integer(-129, Width::Byte).is_err());
        assert!(AsmError::verify_integer(65535, Width::Word).is_ok());
        assert!(AsmError::verify_integer(-65536, Width::Word).is_ok());
        assert!(AsmError::verify_integer(65536, Width::Word).is_err());
        assert!(AsmError::verify_integer(-65537, Width::Word).is_err());
    }

    #[test]
    fn one_line_diagnostics() {
        let err = AsmError::SymbolOutOfRange {
            name: "far".into(),
            value: -40000,
            relative: true,
        };
        assert_eq!(err.to_string(), "Symbol: far relatively out of range: -40000");
        assert_eq!(
            FileError::new("a.s", Some(3), AsmError::DuplicateSymbol("x".into())).to_string(),
            "a.s@3 ERROR: Symbol: x already defined"
        );
        assert_eq!(
            FileError::new("a.s", None, AsmError::instruction("boom")).to_string(),
            "a.s ERROR: boom"
        );
        assert_eq!(
            LinkError::Undefined(vec!["a".into(), "b".into()]).to_string(),
            "LINK ERR: Undefined symbol: a\nLINK ERR: Undefined symbol: b"
        );
    }
}
