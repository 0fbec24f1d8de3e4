use std::fmt;

use crate::isa::{Opcode, Register};

/// Displacement added to a register operand.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Offset {
    Immediate(i32),
    Symbol(String),
}

/// Single instruction operand.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Operand {
    /// `#value`
    Immediate(i32),
    /// `rN`
    Register(Register),
    /// `rN+offset` or `rN-value`
    RegOffset(Register, Offset),
    /// Bare label name
    Symbol(String),
}

impl Operand {
    /// Operands that occupy the single trailing word of an instruction.
    pub fn is_constant_class(&self) -> bool {
        !matches!(self, Operand::Register(_))
    }
}

/// Where an encoded line ended up in the object stream.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Placement {
    pub pos: usize,
    pub len: usize,
}

/// Assembly intermediate representation of one source line.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AsmLine {
    pub label: Option<String>,
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    /// `dup n`, only valid on data directives.
    pub dup: Option<u32>,
    /// Filled in by the encoder, used for listings.
    pub placement: Option<Placement>,
}

impl AsmLine {
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        AsmLine {
            label: None,
            opcode,
            operands,
            dup: None,
            placement: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_dup(mut self, count: u32) -> Self {
        self.dup = Some(count);
        self
    }

    /// Label name, if one is present and non-empty.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref().filter(|label| !label.is_empty())
    }

    /// Labels starting with `_` stay private to their file.
    pub fn exported(&self) -> bool {
        self.label().is_some_and(is_exported)
    }

    pub fn valid_dup(&self) -> bool {
        self.opcode.is_directive() || self.dup.is_none()
    }

    pub fn count_operands(&self, predicate: impl Fn(&Operand) -> bool) -> usize {
        self.operands.iter().filter(|op| predicate(op)).count()
    }
}

pub fn is_exported(name: &str) -> bool {
    !name.starts_with('_')
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Immediate(val) if *val >= 0 => write!(f, "+{val}"),
            Offset::Immediate(val) => write!(f, "{val}"),
            Offset::Symbol(name) => write!(f, "+{name}"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Immediate(val) => write!(f, "#{val}"),
            Operand::Register(reg) => write!(f, "{reg}"),
            Operand::RegOffset(reg, offset) => write!(f, "{reg}{offset}"),
            Operand::Symbol(name) => write!(f, "{name}"),
        }
    }
}

impl fmt::Display for AsmLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{label}:\t")?,
            None => write!(f, "\t\t")?,
        }
        write!(f, "{} ", self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{op}")?;
        }
        if let Some(count) = self.dup {
            write!(f, " DUP {count}")?;
        }
        Ok(())
    }
}

/// Parsed line together with its 1-based line number.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SourceLine {
    pub number: usize,
    pub line: AsmLine,
}

/// All parsed lines of one assembly file, in source order.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct SourceFile {
    pub name: String,
    pub lines: Vec<SourceLine>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>) -> Self {
        SourceFile {
            name: name.into(),
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, number: usize, line: AsmLine) {
        self.lines.push(SourceLine { number, line });
    }
}
