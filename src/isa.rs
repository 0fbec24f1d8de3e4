use std::fmt;
use std::str::FromStr;

/// Every operation the assembler understands, keyed by its numeric id.
///
/// Arithmetic opcodes carry their id in the high nibble of the first
/// instruction byte (the low nibble is the destination register). Extended
/// opcodes use the whole first byte and have the high bit set. Directives
/// never appear in machine code.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u32)]
pub enum Opcode {
    Add = 0x00,
    Sub = 0x10,
    Cmp = 0x20,
    Sar = 0x30,
    Sal = 0x40,
    And = 0x50,
    Or = 0x60,
    Not = 0x70,

    Jmp = 0x80,
    Jz = 0x81,
    Jgt = 0x82,
    Mov = 0x83,
    Ldr = 0x84,
    Str = 0x85,
    In = 0x86,
    Out = 0x87,
    Clc = 0x88,
    Stc = 0x89,
    Nc = 0x8A,
    Movf = 0x8B,
    Movtsp = 0x8C,
    Movfsp = 0x8D,
    Call = 0x8E,
    Ret = 0x8F,
    Hlt = 0x90,

    Db = 0x1_0000,
    Dw = 0x1_0001,
}

/// Broad encoding class of an opcode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Category {
    /// Three-operand register form: `op|dst`, `src1|src2`.
    Arithmetic,
    /// Two-register form with a full opcode byte.
    Extended,
    /// Data emitted verbatim.
    Directive,
}

/// Operand conventions shared by groups of extended opcodes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Family {
    Arithmetic,
    /// Always carries a trailing word. `relative` targets are IP-relative.
    Branch { relative: bool },
    /// `mov`, `ldr`, `str`.
    Transfer,
    /// One register operand; `dst` selects which nibble is used.
    SingleRegister { dst: bool },
    NoOperand,
    Directive,
}

impl Opcode {
    pub const ALL: [Opcode; 27] = [
        Opcode::Add,
        Opcode::Sub,
        Opcode::Cmp,
        Opcode::Sar,
        Opcode::Sal,
        Opcode::And,
        Opcode::Or,
        Opcode::Not,
        Opcode::Jmp,
        Opcode::Jz,
        Opcode::Jgt,
        Opcode::Mov,
        Opcode::Ldr,
        Opcode::Str,
        Opcode::In,
        Opcode::Out,
        Opcode::Clc,
        Opcode::Stc,
        Opcode::Nc,
        Opcode::Movf,
        Opcode::Movtsp,
        Opcode::Movfsp,
        Opcode::Call,
        Opcode::Ret,
        Opcode::Hlt,
        Opcode::Db,
        Opcode::Dw,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    /// Look up an opcode by numeric id.
    pub fn from_id(id: u32) -> Option<Opcode> {
        Self::ALL.into_iter().find(|op| op.id() == id)
    }

    /// Look up a machine-code opcode by the (already masked) first byte.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Self::from_id(byte as u32).filter(|op| !op.is_directive())
    }

    /// Low byte of the id, as placed in the first instruction byte.
    pub fn byte(self) -> u8 {
        (self.id() & 0xFF) as u8
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Cmp => "cmp",
            Opcode::Sar => "sar",
            Opcode::Sal => "sal",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Not => "not",
            Opcode::Jmp => "jmp",
            Opcode::Jz => "jz",
            Opcode::Jgt => "jgt",
            Opcode::Mov => "mov",
            Opcode::Ldr => "ldr",
            Opcode::Str => "str",
            Opcode::In => "in",
            Opcode::Out => "out",
            Opcode::Clc => "clc",
            Opcode::Stc => "stc",
            Opcode::Nc => "nc",
            Opcode::Movf => "movf",
            Opcode::Movtsp => "movtsp",
            Opcode::Movfsp => "movfsp",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Hlt => "hlt",
            Opcode::Db => "db",
            Opcode::Dw => "dw",
        }
    }

    pub fn category(self) -> Category {
        match self.id() {
            0x00..=0x7F => Category::Arithmetic,
            0x80..=0xFF => Category::Extended,
            _ => Category::Directive,
        }
    }

    pub fn family(self) -> Family {
        match self {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Cmp
            | Opcode::Sar
            | Opcode::Sal
            | Opcode::And
            | Opcode::Or
            | Opcode::Not => Family::Arithmetic,
            Opcode::Jmp | Opcode::Call => Family::Branch { relative: false },
            Opcode::Jz | Opcode::Jgt => Family::Branch { relative: true },
            Opcode::Mov | Opcode::Ldr | Opcode::Str => Family::Transfer,
            Opcode::In | Opcode::Movf | Opcode::Movfsp => Family::SingleRegister { dst: true },
            Opcode::Out | Opcode::Movtsp => Family::SingleRegister { dst: false },
            Opcode::Clc | Opcode::Stc | Opcode::Nc | Opcode::Ret | Opcode::Hlt => {
                Family::NoOperand
            }
            Opcode::Db | Opcode::Dw => Family::Directive,
        }
    }

    /// Exact operand count for machine opcodes; `None` for directives, which
    /// take any number.
    pub fn arity(self) -> Option<usize> {
        match self {
            Opcode::Add | Opcode::Sub | Opcode::Sar | Opcode::Sal | Opcode::And | Opcode::Or => {
                Some(3)
            }
            Opcode::Not | Opcode::Cmp | Opcode::Mov | Opcode::Ldr | Opcode::Str => Some(2),
            Opcode::Jmp
            | Opcode::Jz
            | Opcode::Jgt
            | Opcode::In
            | Opcode::Out
            | Opcode::Movf
            | Opcode::Movtsp
            | Opcode::Movfsp
            | Opcode::Call => Some(1),
            Opcode::Clc | Opcode::Stc | Opcode::Nc | Opcode::Ret | Opcode::Hlt => Some(0),
            Opcode::Db | Opcode::Dw => None,
        }
    }

    pub fn is_directive(self) -> bool {
        self.category() == Category::Directive
    }

    pub fn is_arithmetic(self) -> bool {
        self.category() == Category::Arithmetic
    }

    pub fn is_extended(self) -> bool {
        self.category() == Category::Extended
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for Opcode {
    type Err = ();

    /// Case-insensitive mnemonic lookup.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// Number of register ids a nibble can name.
pub const REGISTER_COUNT: u8 = 16;

/// A 4-bit register field.
///
/// Ids 0 to 14 name general registers. Id 15 is the constant marker: the
/// operand is not a register and a literal word follows the instruction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Register(u8);

impl Register {
    pub const R0: Register = Register(0);
    pub const CONSTANT: Register = Register(15);
    pub const GENERAL_COUNT: usize = 15;

    /// Any id below [`REGISTER_COUNT`], including the constant marker.
    pub fn new(id: u8) -> Option<Register> {
        (id < REGISTER_COUNT).then_some(Register(id))
    }

    /// General register `r{id}`.
    pub fn general(id: u8) -> Option<Register> {
        Self::new(id).filter(|reg| reg.is_general())
    }

    /// Register named by the low nibble of `bits`.
    pub fn from_nibble(bits: u8) -> Register {
        Register(bits & 0x0F)
    }

    pub fn id(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_general(self) -> bool {
        self.0 < Self::CONSTANT.0
    }

    pub fn is_constant(self) -> bool {
        self == Self::CONSTANT
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_general() {
            write!(f, "r{}", self.0)
        } else {
            write!(f, "CONSTANT")
        }
    }
}

impl FromStr for Register {
    type Err = ();

    /// Parses `r0` to `r14`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix(['r', 'R']).ok_or(())?;
        // Reject `r01`, `r+1` and friends
        if digits.is_empty()
            || (digits.len() > 1 && digits.starts_with('0'))
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(());
        }
        let id: u8 = digits.parse().map_err(|_| ())?;
        Register::general(id).ok_or(())
    }
}
