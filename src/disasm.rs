use std::fmt;

use crate::air::{AsmLine, Offset, Operand};
use crate::buffer::{BoundsError, Buffer};
use crate::isa::{Family, Opcode, Register};

/// One decoded unit of machine code.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Decoded {
    Known { line: AsmLine, len: usize },
    /// Byte that does not start any instruction.
    Unknown(u8),
}

impl Decoded {
    pub fn len(&self) -> usize {
        match self {
            Decoded::Known { len, .. } => *len,
            Decoded::Unknown(_) => 1,
        }
    }

    pub fn line(&self) -> Option<&AsmLine> {
        match self {
            Decoded::Known { line, .. } => Some(line),
            Decoded::Unknown(_) => None,
        }
    }
}

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoded::Known { line, .. } => write!(f, "{}", line.to_string().trim()),
            Decoded::Unknown(byte) => write!(f, "db #{byte}"),
        }
    }
}

/// `register + word` slot. A zero displacement reads as the bare register.
fn memory_operand(reg: Register, word: i16) -> Operand {
    if reg.is_constant() {
        Operand::Immediate(word as i32)
    } else if word == 0 {
        Operand::Register(reg)
    } else {
        Operand::RegOffset(reg, Offset::Immediate(word as i32))
    }
}

/// Decode the instruction starting at `pos`. Fails only if the instruction
/// runs past the end of the buffer.
pub fn decode(buf: &Buffer, pos: usize) -> Result<Decoded, BoundsError> {
    let first = buf.get(pos)?;
    let op = if first & 0x80 != 0 {
        Opcode::from_byte(first)
    } else {
        Opcode::from_byte(first & 0xF0)
    };
    let Some(op) = op else {
        return Ok(Decoded::Unknown(first));
    };

    let second = buf.get(pos + 1)?;
    let high = Register::from_nibble(second >> 4);
    let low = Register::from_nibble(second);
    let word = || buf.read_at::<i16>(pos + 2);

    let (operands, len) = match op.family() {
        Family::Arithmetic => {
            let dst = Register::from_nibble(first);
            let trailing = if high.is_constant() || low.is_constant() {
                Some(word()?)
            } else {
                None
            };
            let source = |reg: Register| match trailing {
                Some(word) if reg.is_constant() => Operand::Immediate(word as i32),
                _ => Operand::Register(reg),
            };
            let operands = match op {
                Opcode::Cmp => vec![source(high), source(low)],
                Opcode::Not => vec![Operand::Register(dst), source(high)],
                _ => vec![Operand::Register(dst), source(high), source(low)],
            };
            (operands, if trailing.is_some() { 4 } else { 2 })
        }
        Family::Branch { .. } => (vec![memory_operand(low, word()?)], 4),
        Family::Transfer => {
            let word = word()?;
            let operands = match op {
                Opcode::Str => vec![memory_operand(high, word), Operand::Register(low)],
                _ => vec![Operand::Register(high), memory_operand(low, word)],
            };
            (operands, 4)
        }
        Family::SingleRegister { dst } => {
            let reg = if dst { high } else { low };
            (vec![Operand::Register(reg)], 2)
        }
        Family::NoOperand | Family::Directive => (Vec::new(), 2),
    };

    Ok(Decoded::Known {
        line: AsmLine::new(op, operands),
        len,
    })
}

/// Walk the whole buffer. Bytes that do not decode, including a truncated
/// final instruction, come out as [`Decoded::Unknown`].
pub fn disassemble(buf: &Buffer) -> Vec<(usize, Decoded)> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let decoded = decode(buf, pos)
            .unwrap_or_else(|_| Decoded::Unknown(buf.get(pos).unwrap_or_default()));
        let len = decoded.len();
        out.push((pos, decoded));
        pos += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Unit;
    use crate::parser::parse_line;

    fn assemble(src: &str) -> Buffer {
        let mut unit = Unit::new();
        let mut buf = Buffer::new();
        for text in src.lines() {
            if let Some(line) = parse_line(text).unwrap() {
                unit.synthesize(&line, &mut buf).unwrap();
            }
        }
        buf.to_begin();
        buf
    }

    fn listing(src: &str) -> Vec<String> {
        disassemble(&assemble(src))
            .into_iter()
            .map(|(_, decoded)| decoded.to_string())
            .collect()
    }

    #[test]
    fn round_trips_text() {
        let src = "\
add r0, r1, #1
sub r2, #-3, r4
cmp r5, r6
not r7, r8
jz #-4
call r2+6
mov r1, r2
ldr r3, r4-2
str #256, r5
in r9
out r10
movtsp r11
clc
hlt";
        let expected: Vec<_> = src.lines().collect();
        assert_eq!(listing(src), expected);
    }

    #[test]
    fn lengths() {
        let buf = assemble("add r0, r1, r2\nadd r0, r1, #2\njmp r1\nret");
        let lens: Vec<_> = disassemble(&buf)
            .into_iter()
            .map(|(pos, decoded)| (pos, decoded.len()))
            .collect();
        assert_eq!(lens, [(0, 2), (2, 4), (6, 4), (10, 2)]);
    }

    #[test]
    fn unknown_and_truncated() {
        let buf = Buffer::from_bytes(&[0xA5, 0x90, 0x00, 0x83, 0x10]).unwrap();
        let decoded = disassemble(&buf);
        assert_eq!(decoded[0], (0, Decoded::Unknown(0xA5)));
        assert_eq!(decoded[1].1.to_string(), "hlt");
        assert_eq!(decoded[2], (3, Decoded::Unknown(0x83)));
        assert_eq!(decoded[3], (4, Decoded::Unknown(0x10)));
        assert_eq!(decoded[0].1.to_string(), "db #165");
        assert!(decode(&buf, 3).is_err());
    }
}
