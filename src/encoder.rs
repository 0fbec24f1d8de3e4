use crate::air::{AsmLine, Offset, Operand};
use crate::buffer::Buffer;
use crate::error::{AsmError, Width};
use crate::isa::{Family, Opcode, Register};
use crate::symbol::{Patch, Resolution, SymbolTable};

/// Trailing word of an instruction, or one element of a data directive.
#[derive(Clone, PartialEq, Eq, Debug)]
enum Word {
    Literal(u16),
    /// Unresolved until [`Unit::prepare`] finds the symbol.
    Symbol { name: String, relative: bool },
}

/// Register nibble of the second instruction byte.
#[derive(Clone, Copy, Debug)]
enum Slot {
    High,
    Low,
}

impl Slot {
    fn place(self, reg: Register) -> u8 {
        match self {
            Slot::High => reg.id() << 4,
            Slot::Low => reg.id(),
        }
    }
}

/// Per-file assembly state: labels defined so far and the placeholders still
/// waiting for a symbol.
///
/// Several units can write into one shared object [`Buffer`], one after the
/// other; symbol addresses are absolute offsets in that buffer.
#[derive(Debug, Default)]
pub struct Unit {
    pub(crate) symbols: SymbolTable,
    pub(crate) pending: Vec<Patch>,
}

impl Unit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// References that could not be resolved yet.
    pub fn pending(&self) -> &[Patch] {
        &self.pending
    }

    /// Encode `line` at the buffer's cursor and return the number of bytes
    /// written. Nothing is written when the line is rejected, though its
    /// label stays defined.
    pub fn synthesize(&mut self, line: &AsmLine, buf: &mut Buffer) -> Result<usize, AsmError> {
        let ip = buf.pos();

        if !line.valid_dup() {
            return Err(AsmError::instruction(format!(
                "DUP cannot be used with {}",
                line.opcode
            )));
        }

        if let Some(label) = line.label() {
            self.define(label, ip)?;
        }

        if line.opcode.is_directive() {
            self.synthesize_data(line, ip, buf)?;
        } else {
            self.synthesize_opcode(line, ip, buf)?;
        }
        Ok(buf.pos() - ip)
    }

    fn define(&mut self, name: &str, ip: usize) -> Result<(), AsmError> {
        if self.symbols.contains_key(name) {
            return Err(AsmError::DuplicateSymbol(name.to_owned()));
        }
        self.symbols.insert(name.to_owned(), ip);
        Ok(())
    }

    fn synthesize_data(&mut self, line: &AsmLine, ip: usize, buf: &mut Buffer) -> Result<(), AsmError> {
        let width = match line.opcode {
            Opcode::Db => Width::Byte,
            _ => Width::Word,
        };

        let mut items = Vec::with_capacity(line.operands.len());
        for operand in &line.operands {
            let item = match operand {
                Operand::Immediate(val) => {
                    AsmError::verify_integer(*val, width)?;
                    Word::Literal(*val as u16)
                }
                Operand::Symbol(name) if width == Width::Byte => {
                    return Err(AsmError::instruction(format!(
                        "Cannot output symbols ({name}) as bytes"
                    )));
                }
                Operand::Symbol(name) => self.prepare(
                    Word::Symbol {
                        name: name.clone(),
                        relative: false,
                    },
                    ip,
                )?,
                Operand::Register(_) | Operand::RegOffset(..) => {
                    return Err(AsmError::instruction(
                        "Cannot use register addressing in directives",
                    ));
                }
            };
            items.push(item);
        }

        let item_size = match width {
            Width::Byte => 1,
            Width::Word => 2,
        };
        let count = line.dup.unwrap_or(1) as usize;
        buf.ensure_room(items.len().saturating_mul(item_size).saturating_mul(count))?;
        for _ in 0..count {
            for item in &items {
                match (width, item) {
                    (Width::Byte, Word::Literal(val)) => buf.append_value(*val as u8)?,
                    _ => self.write(item.clone(), ip, buf)?,
                }
            }
        }
        Ok(())
    }

    fn synthesize_opcode(&mut self, line: &AsmLine, ip: usize, buf: &mut Buffer) -> Result<(), AsmError> {
        let op = line.opcode;
        let expected = op.arity().unwrap_or_default();
        if line.operands.len() != expected {
            return Err(AsmError::instruction(format!(
                "Invalid number of operands for {op} have {}, expecting {expected}",
                line.operands.len()
            )));
        }

        // Only one trailing word exists per instruction
        let constants = line.count_operands(Operand::is_constant_class);
        if constants > 1 {
            return Err(AsmError::instruction(format!(
                "Only one constant or offset is allowed per instruction, have {constants}"
            )));
        }

        let mut first = op.byte();
        let mut second = 0u8;
        let mut trailing = None;

        match op.family() {
            Family::Arithmetic => {
                if line.count_operands(|op| matches!(op, Operand::RegOffset(..))) > 0 {
                    return Err(AsmError::instruction(
                        "Register+Offset addressing not allowed in arithmetic instructions",
                    ));
                }

                let mut sources = line.operands.iter();
                // `cmp` only compares, it has no destination
                if op != Opcode::Cmp {
                    let dst = match sources.next() {
                        Some(Operand::Register(reg)) => verify_register(*reg, "dst")?,
                        _ => return Err(AsmError::instruction("Destination must be a register !")),
                    };
                    first |= dst.id();
                }

                for (i, operand) in sources.enumerate() {
                    let slot = if i == 0 { Slot::High } else { Slot::Low };
                    let (reg, word) = evaluate(operand, &format!("src{}", i + 1), false)?;
                    second |= slot.place(reg);
                    trailing = trailing.or(word);
                }
            }
            Family::Branch { relative } => {
                let (reg, word) = evaluate(&line.operands[0], "src", relative)?;
                second = Slot::Low.place(reg);
                // Always `register + word`, even for a bare register
                trailing = Some(word.unwrap_or(Word::Literal(0)));
            }
            Family::Transfer => {
                // `ldr` reads memory through its source, `str` writes through
                // its destination. `mov` with a computed source acts like an
                // effective-address load.
                let memory = match op {
                    Opcode::Ldr => [false, true],
                    Opcode::Str => [true, false],
                    _ => [false, false],
                };
                for (i, operand) in line.operands.iter().enumerate() {
                    let (name, slot) = if i == 0 {
                        ("dst", Slot::High)
                    } else {
                        ("src", Slot::Low)
                    };
                    let must_be_register = !memory[i] && (op != Opcode::Mov || i == 0);

                    if must_be_register {
                        let reg = match operand {
                            Operand::Register(reg) => verify_register(*reg, name)?,
                            _ => {
                                return Err(AsmError::instruction(format!(
                                    "{name} must be a register !"
                                )))
                            }
                        };
                        second |= slot.place(reg);
                    } else {
                        let (reg, word) = evaluate(operand, name, false)?;
                        second |= slot.place(reg);
                        trailing = Some(word.unwrap_or(Word::Literal(0)));
                    }
                }
            }
            Family::SingleRegister { dst } => {
                let (name, slot) = if dst {
                    ("dst", Slot::High)
                } else {
                    ("src", Slot::Low)
                };
                let reg = match &line.operands[0] {
                    Operand::Register(reg) => verify_register(*reg, name)?,
                    _ => {
                        return Err(AsmError::instruction(format!(
                            "{name} must be a register !"
                        )))
                    }
                };
                second = slot.place(reg);
            }
            Family::NoOperand => {}
            Family::Directive => {
                return Err(AsmError::instruction(format!("{op} is not an instruction")));
            }
        }

        let trailing = trailing.map(|word| self.prepare(word, ip)).transpose()?;
        buf.ensure_room(if trailing.is_some() { 4 } else { 2 })?;
        buf.append(&[first, second])?;
        if let Some(word) = trailing {
            self.write(word, ip, buf)?;
        }
        Ok(())
    }

    /// Replace a symbol word with its value if the symbol is already known.
    fn prepare(&self, word: Word, ip: usize) -> Result<Word, AsmError> {
        match word {
            Word::Symbol { name, relative } => match self.resolve_symbol(ip, &name, relative, None)? {
                Resolution::Resolved(value) => Ok(Word::Literal(value)),
                Resolution::Deferred => Ok(Word::Symbol { name, relative }),
            },
            literal => Ok(literal),
        }
    }

    /// Append a prepared word; unresolved symbols get a zero placeholder and
    /// a pending patch.
    fn write(&mut self, word: Word, ip: usize, buf: &mut Buffer) -> Result<(), AsmError> {
        let site = buf.pos();
        match word {
            Word::Literal(value) => buf.append_value(value)?,
            Word::Symbol { name, relative } => {
                buf.append_value(0u16)?;
                self.pending.push(Patch {
                    symbol: name,
                    site,
                    ip,
                    relative,
                });
            }
        }
        Ok(())
    }
}

fn verify_register(reg: Register, name: &str) -> Result<Register, AsmError> {
    if reg.is_general() {
        Ok(reg)
    } else {
        Err(AsmError::instruction(format!(
            "{name} register out of range: {}",
            reg.id()
        )))
    }
}

/// Register nibble and optional trailing word for one operand.
fn evaluate(operand: &Operand, name: &str, relative: bool) -> Result<(Register, Option<Word>), AsmError> {
    match operand {
        Operand::Register(reg) => Ok((verify_register(*reg, name)?, None)),
        Operand::Immediate(val) => {
            AsmError::verify_integer(*val, Width::Word)?;
            Ok((Register::CONSTANT, Some(Word::Literal(*val as u16))))
        }
        Operand::Symbol(sym) => Ok((
            Register::CONSTANT,
            Some(Word::Symbol {
                name: sym.clone(),
                relative,
            }),
        )),
        Operand::RegOffset(reg, offset) => {
            let reg = verify_register(*reg, name)?;
            let word = match offset {
                Offset::Immediate(val) => {
                    AsmError::verify_integer(*val, Width::Word)?;
                    Word::Literal(*val as u16)
                }
                Offset::Symbol(sym) => Word::Symbol {
                    name: sym.clone(),
                    relative,
                },
            };
            Ok((reg, Some(word)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(id: u8) -> Operand {
        Operand::Register(Register::general(id).unwrap())
    }

    fn imm(val: i32) -> Operand {
        Operand::Immediate(val)
    }

    fn sym(name: &str) -> Operand {
        Operand::Symbol(name.into())
    }

    fn off(id: u8, val: i32) -> Operand {
        Operand::RegOffset(Register::general(id).unwrap(), Offset::Immediate(val))
    }

    fn encode(lines: &[AsmLine]) -> (Unit, Buffer) {
        let mut unit = Unit::new();
        let mut buf = Buffer::new();
        for line in lines {
            unit.synthesize(line, &mut buf).unwrap();
        }
        (unit, buf)
    }

    fn bytes(line: AsmLine) -> Vec<u8> {
        encode(&[line]).1.into_bytes()
    }

    fn error(line: AsmLine) -> AsmError {
        let mut buf = Buffer::new();
        let err = Unit::new().synthesize(&line, &mut buf).unwrap_err();
        assert!(buf.is_empty(), "rejected line wrote bytes");
        err
    }

    fn message(line: AsmLine) -> String {
        match error(line) {
            AsmError::Instruction(msg) => msg,
            other => panic!("expected instruction error, got {other:?}"),
        }
    }

    #[test]
    fn arithmetic_forms() {
        assert_eq!(
            bytes(AsmLine::new(Opcode::Add, vec![r(0), r(1), imm(1)])),
            [0x00, 0x1F, 0x01, 0x00]
        );
        assert_eq!(
            bytes(AsmLine::new(Opcode::Sub, vec![r(1), imm(-2), r(2)])),
            [0x11, 0xF2, 0xFE, 0xFF]
        );
        assert_eq!(bytes(AsmLine::new(Opcode::Or, vec![r(14), r(3), r(4)])), [0x6E, 0x34]);
        assert_eq!(bytes(AsmLine::new(Opcode::Cmp, vec![r(0), r(1)])), [0x20, 0x01]);
        assert_eq!(bytes(AsmLine::new(Opcode::Not, vec![r(2), r(3)])), [0x72, 0x30]);
    }

    #[test]
    fn arithmetic_rejections() {
        assert_eq!(
            message(AsmLine::new(Opcode::Add, vec![r(0), r(1), off(2, 4)])),
            "Register+Offset addressing not allowed in arithmetic instructions"
        );
        assert_eq!(
            message(AsmLine::new(Opcode::Add, vec![imm(1), r(1), r(2)])),
            "Destination must be a register !"
        );
        assert_eq!(
            message(AsmLine::new(Opcode::Add, vec![r(0), imm(1), imm(2)])),
            "Only one constant or offset is allowed per instruction, have 2"
        );
        assert_eq!(
            message(AsmLine::new(Opcode::Add, vec![r(0), r(1)])),
            "Invalid number of operands for add have 2, expecting 3"
        );
        assert_eq!(
            message(AsmLine::new(
                Opcode::Add,
                vec![Operand::Register(Register::CONSTANT), r(1), r(2)]
            )),
            "dst register out of range: 15"
        );
        assert!(matches!(
            error(AsmLine::new(Opcode::Add, vec![r(0), r(1), imm(70000)])),
            AsmError::Overflow {
                width: Width::Word,
                value: 70000
            }
        ));
    }

    #[test]
    fn branches_always_carry_a_word() {
        assert_eq!(bytes(AsmLine::new(Opcode::Jmp, vec![r(3)])), [0x80, 0x03, 0, 0]);
        assert_eq!(bytes(AsmLine::new(Opcode::Call, vec![imm(0x1234)])), [0x8E, 0x0F, 0x34, 0x12]);
        assert_eq!(bytes(AsmLine::new(Opcode::Jgt, vec![off(2, -4)])), [0x82, 0x02, 0xFC, 0xFF]);
    }

    #[test]
    fn relative_branch_to_known_label() {
        let (_, buf) = encode(&[
            AsmLine::new(Opcode::Hlt, vec![]).with_label("top"),
            AsmLine::new(Opcode::Jz, vec![sym("top")]),
            AsmLine::new(Opcode::Jmp, vec![sym("top")]),
        ]);
        assert_eq!(
            buf.contents(),
            [0x90, 0x00, 0x81, 0x0F, 0xFE, 0xFF, 0x80, 0x0F, 0x00, 0x00]
        );
    }

    #[test]
    fn forward_reference_is_deferred() {
        let (unit, buf) = encode(&[
            AsmLine::new(Opcode::Hlt, vec![]),
            AsmLine::new(Opcode::Jgt, vec![sym("later")]),
        ]);
        assert_eq!(buf.contents(), [0x90, 0x00, 0x82, 0x0F, 0, 0]);
        assert_eq!(
            unit.pending(),
            [Patch {
                symbol: "later".into(),
                site: 4,
                ip: 2,
                relative: true,
            }]
        );
    }

    #[test]
    fn transfers() {
        assert_eq!(bytes(AsmLine::new(Opcode::Mov, vec![r(1), r(2)])), [0x83, 0x12, 0, 0]);
        assert_eq!(bytes(AsmLine::new(Opcode::Mov, vec![r(1), imm(-1)])), [0x83, 0x1F, 0xFF, 0xFF]);
        assert_eq!(bytes(AsmLine::new(Opcode::Ldr, vec![r(1), off(2, 4)])), [0x84, 0x12, 4, 0]);
        assert_eq!(bytes(AsmLine::new(Opcode::Ldr, vec![r(1), imm(100)])), [0x84, 0x1F, 100, 0]);
        assert_eq!(bytes(AsmLine::new(Opcode::Str, vec![off(2, -2), r(1)])), [0x85, 0x21, 0xFE, 0xFF]);
        assert_eq!(bytes(AsmLine::new(Opcode::Str, vec![r(1), r(2)])), [0x85, 0x12, 0, 0]);
        assert_eq!(bytes(AsmLine::new(Opcode::Str, vec![imm(8), r(2)])), [0x85, 0xF2, 8, 0]);

        assert_eq!(
            message(AsmLine::new(Opcode::Mov, vec![imm(3), r(1)])),
            "dst must be a register !"
        );
        assert_eq!(
            message(AsmLine::new(Opcode::Ldr, vec![off(1, 2), r(1)])),
            "dst must be a register !"
        );
        assert_eq!(
            message(AsmLine::new(Opcode::Str, vec![r(1), imm(5)])),
            "src must be a register !"
        );
    }

    #[test]
    fn single_register_and_no_operand() {
        assert_eq!(bytes(AsmLine::new(Opcode::In, vec![r(3)])), [0x86, 0x30]);
        assert_eq!(bytes(AsmLine::new(Opcode::Movf, vec![r(4)])), [0x8B, 0x40]);
        assert_eq!(bytes(AsmLine::new(Opcode::Out, vec![r(3)])), [0x87, 0x03]);
        assert_eq!(bytes(AsmLine::new(Opcode::Movtsp, vec![r(5)])), [0x8C, 0x05]);
        assert_eq!(bytes(AsmLine::new(Opcode::Ret, vec![])), [0x8F, 0x00]);
        assert_eq!(bytes(AsmLine::new(Opcode::Hlt, vec![])), [0x90, 0x00]);
        assert_eq!(
            message(AsmLine::new(Opcode::Out, vec![imm(3)])),
            "src must be a register !"
        );
        assert_eq!(
            message(AsmLine::new(Opcode::Clc, vec![r(0)])),
            "Invalid number of operands for clc have 1, expecting 0"
        );
    }

    #[test]
    fn data_directives() {
        assert_eq!(
            bytes(AsmLine::new(Opcode::Db, vec![imm(1), imm(-1), imm(255)]).with_dup(2)),
            [1, 0xFF, 0xFF, 1, 0xFF, 0xFF]
        );
        assert_eq!(
            bytes(AsmLine::new(Opcode::Dw, vec![imm(-1), imm(0x1234)])),
            [0xFF, 0xFF, 0x34, 0x12]
        );
        assert!(bytes(AsmLine::new(Opcode::Db, vec![imm(1)]).with_dup(0)).is_empty());
        assert!(bytes(AsmLine::new(Opcode::Dw, vec![])).is_empty());
    }

    #[test]
    fn byte_directive_range() {
        assert_eq!(bytes(AsmLine::new(Opcode::Db, vec![imm(127)])), [0x7F]);
        assert_eq!(bytes(AsmLine::new(Opcode::Db, vec![imm(-128)])), [0x80]);
        assert_eq!(bytes(AsmLine::new(Opcode::Db, vec![imm(128)])), [0x80]);
        assert_eq!(
            error(AsmLine::new(Opcode::Db, vec![imm(300)])),
            AsmError::Overflow {
                width: Width::Byte,
                value: 300
            }
        );
        assert!(matches!(
            error(AsmLine::new(Opcode::Db, vec![imm(1), imm(-129)])),
            AsmError::Overflow { .. }
        ));
    }

    #[test]
    fn data_directive_rejections() {
        assert_eq!(
            message(AsmLine::new(Opcode::Db, vec![sym("x")])),
            "Cannot output symbols (x) as bytes"
        );
        assert_eq!(
            message(AsmLine::new(Opcode::Dw, vec![r(1)])),
            "Cannot use register addressing in directives"
        );
        assert_eq!(
            message(AsmLine::new(Opcode::Ret, vec![]).with_dup(2)),
            "DUP cannot be used with ret"
        );
    }

    #[test]
    fn word_directive_symbols() {
        let (unit, buf) = encode(&[
            AsmLine::new(Opcode::Db, vec![imm(7)]).with_label("here"),
            AsmLine::new(Opcode::Dw, vec![sym("here"), sym("there")]).with_dup(2),
        ]);
        assert_eq!(buf.contents(), [7, 0, 0, 0, 0, 0, 0, 0, 0]);
        let sites: Vec<_> = unit.pending().iter().map(|patch| patch.site).collect();
        assert_eq!(sites, [3, 7]);
        assert!(unit.pending().iter().all(|patch| !patch.relative));
    }

    #[test]
    fn oversized_lines_write_nothing() {
        let mut unit = Unit::new();
        let mut buf = Buffer::new();
        let padding = AsmLine::new(Opcode::Db, vec![imm(0)]).with_dup(0xFFFE);
        unit.synthesize(&padding, &mut buf).unwrap();

        let words = AsmLine::new(Opcode::Dw, vec![imm(1), sym("later")]).with_dup(2);
        assert!(matches!(unit.synthesize(&words, &mut buf), Err(AsmError::Bounds(_))));
        assert_eq!(buf.pos(), 0xFFFE);
        assert_eq!(buf.len(), 0xFFFE);
        assert!(unit.pending().is_empty());

        let jump = AsmLine::new(Opcode::Jmp, vec![sym("later")]);
        assert!(matches!(unit.synthesize(&jump, &mut buf), Err(AsmError::Bounds(_))));
        assert_eq!(buf.len(), 0xFFFE);
        assert!(unit.pending().is_empty());

        let ret = AsmLine::new(Opcode::Ret, vec![]);
        assert_eq!(unit.synthesize(&ret, &mut buf), Ok(2));
    }

    #[test]
    fn labels_must_be_unique() {
        let mut unit = Unit::new();
        let mut buf = Buffer::new();
        let line = AsmLine::new(Opcode::Hlt, vec![]).with_label("again");
        assert_eq!(unit.synthesize(&line, &mut buf), Ok(2));
        assert_eq!(
            unit.synthesize(&line, &mut buf),
            Err(AsmError::DuplicateSymbol("again".into()))
        );
        assert_eq!(unit.symbols().get("again"), Some(&0));
    }
}
