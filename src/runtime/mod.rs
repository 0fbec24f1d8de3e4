use std::fmt;

use crate::buffer::{BoundsError, ADDRESS_SPACE};
use crate::error::CpuError;
use crate::isa::{Opcode, Register};

mod console;
pub use console::{Console, StdConsole};
mod flags;
pub use flags::{CarryOp, Psw};
mod memory;
pub use memory::Memory;

/// Default memory size, the whole address space.
pub const MEMORY_SIZE: usize = ADDRESS_SPACE;

/// Where the engine is in its lifecycle. Both stopped states are final.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum CpuState {
    Running,
    Halted,
    Faulted(CpuError),
}

/// Failure inside one step, before the faulting address is attached.
enum Fault {
    Instruction(String),
    Memory(BoundsError),
}

impl Fault {
    fn instruction(descr: impl Into<String>) -> Self {
        Fault::Instruction(descr.into())
    }

    fn at(self, iep: usize) -> CpuError {
        match self {
            Fault::Instruction(descr) => CpuError::Instruction { iep, descr },
            Fault::Memory(source) => CpuError::Memory { iep, source },
        }
    }
}

impl From<BoundsError> for Fault {
    fn from(value: BoundsError) -> Self {
        Fault::Memory(value)
    }
}

/// Field that must not name anything.
fn require_zero(reg: Register, name: &str) -> Result<(), Fault> {
    if reg == Register::R0 {
        Ok(())
    } else {
        Err(Fault::instruction(format!("{name} must be zero!")))
    }
}

/// Field that must name a general register.
fn require_register(reg: Register, name: &str) -> Result<(), Fault> {
    if reg.is_general() {
        Ok(())
    } else {
        Err(Fault::instruction(format!("{name} must be a register!")))
    }
}

/// Arithmetic shift right. Carry is set when shifting back does not restore
/// the operand.
fn shift_right(value: u16, count: u16) -> (u16, bool) {
    let original = value as i16 as i32;
    let shifted = original.wrapping_shr(count as u32) as i16;
    let carry = (shifted as i32).wrapping_shl(count as u32) != original;
    (shifted as u16, carry)
}

fn shift_left(value: u16, count: u16) -> (u16, bool) {
    let original = value as i16 as i32;
    let shifted = original.wrapping_shl(count as u32) as i16;
    let carry = (shifted as i32).wrapping_shr(count as u32) != original;
    (shifted as u16, carry)
}

/// Fetch-decode-execute engine over a flat [`Memory`].
pub struct Cpu<C: Console = StdConsole> {
    regs: [u16; Register::GENERAL_COUNT],
    mem: Memory,
    psw: Psw,
    state: CpuState,
    console: C,
}

impl Cpu<StdConsole> {
    pub fn new() -> Self {
        Self::with_console(StdConsole)
    }
}

impl Default for Cpu<StdConsole> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Console> Cpu<C> {
    pub fn with_console(console: C) -> Self {
        Self::with_memory(console, MEMORY_SIZE)
    }

    pub fn with_memory(console: C, size: usize) -> Self {
        Cpu {
            regs: [0; Register::GENERAL_COUNT],
            mem: Memory::new(size),
            psw: Psw::new(),
            state: CpuState::Running,
            console,
        }
    }

    /// Copy an object image to address 0.
    pub fn load(&mut self, image: &[u8]) -> Result<(), CpuError> {
        if image.is_empty() {
            return Err(CpuError::EmptyImage);
        }
        if image.len() > self.mem.size() {
            return Err(CpuError::ImageTooLarge {
                len: image.len(),
                max: self.mem.size(),
            });
        }
        self.mem
            .load(image)
            .map_err(|source| CpuError::Memory { iep: 0, source })
    }

    pub fn registers(&self) -> &[u16; Register::GENERAL_COUNT] {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut [u16; Register::GENERAL_COUNT] {
        &mut self.regs
    }

    pub fn psw(&self) -> &Psw {
        &self.psw
    }

    /// Load the packed status byte back into the flags.
    pub fn restore_flags(&mut self, packed: u16) {
        self.psw.restore(packed);
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    pub fn iep(&self) -> usize {
        self.mem.iep()
    }

    pub fn sp(&self) -> usize {
        self.mem.sp()
    }

    pub fn state(&self) -> &CpuState {
        &self.state
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    /// Execute a single instruction.
    ///
    /// Returns `Ok(false)` once `hlt` has executed. A fault stops the engine
    /// for good: every later call returns the same error.
    pub fn execute(&mut self) -> Result<bool, CpuError> {
        match &self.state {
            CpuState::Running => {}
            CpuState::Halted => return Ok(false),
            CpuState::Faulted(err) => return Err(err.clone()),
        }

        let iep = self.mem.iep();
        match self.step(iep) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.state = CpuState::Halted;
                Ok(false)
            }
            Err(fault) => {
                let err = fault.at(iep);
                self.state = CpuState::Faulted(err.clone());
                Err(err)
            }
        }
    }

    /// Execute until halted.
    pub fn run(&mut self) -> Result<(), CpuError> {
        while self.execute()? {}
        Ok(())
    }

    fn step(&mut self, iep: usize) -> Result<bool, Fault> {
        let first: u8 = self.mem.fetch()?;
        let second: u8 = self.mem.fetch()?;
        let high = Register::from_nibble(second >> 4);
        let low = Register::from_nibble(second);

        if first & 0x80 != 0 {
            let op = Opcode::from_byte(first)
                .ok_or_else(|| Fault::instruction("Unknown instruction opcode"))?;
            self.extended(iep, op, high, low)
        } else {
            let dst = Register::from_nibble(first);
            let op = Opcode::from_byte(first & 0xF0)
                .ok_or_else(|| Fault::instruction("Unknown instruction opcode"))?;
            self.arithmetic(op, dst, high, low)?;
            Ok(true)
        }
    }

    fn reg(&self, reg: Register) -> u16 {
        self.regs.get(reg.index()).copied().unwrap_or_default()
    }

    /// Write a general register and latch Z/N from it.
    fn set_reg(&mut self, reg: Register, value: u16) {
        if let Some(slot) = self.regs.get_mut(reg.index()) {
            *slot = value;
        }
        self.psw.set_zn(value);
    }

    /// Operand values of the arithmetic form; at most one comes from the
    /// trailing literal.
    fn sources(&mut self, src1: Register, src2: Register) -> Result<(u16, u16), Fault> {
        let mut ops = (self.reg(src1), self.reg(src2));
        if src1.is_constant() || src2.is_constant() {
            let constant: u16 = self.mem.fetch()?;
            if src1 == src2 {
                return Err(Fault::instruction(
                    "Only src1 or src2 can be memory addresses, not both",
                ));
            } else if src1.is_constant() {
                ops.0 = constant;
            } else {
                ops.1 = constant;
            }
        }
        Ok(ops)
    }

    /// `register + literal`, or the bare literal for the constant marker.
    fn resolve_address(&mut self, reg: Register) -> Result<u16, Fault> {
        let offset: i16 = self.mem.fetch()?;
        if reg.is_constant() {
            Ok(offset as u16)
        } else {
            Ok(self.reg(reg).wrapping_add_signed(offset))
        }
    }

    fn arithmetic(&mut self, op: Opcode, dst: Register, src1: Register, src2: Register) -> Result<(), Fault> {
        if !dst.is_general() {
            return Err(Fault::instruction("dst must be a register"));
        }
        if op == Opcode::Not && src2 != Register::R0 {
            return Err(Fault::instruction("NOT src2 must be 0"));
        }

        let (a, b) = self.sources(src1, src2)?;
        let result = match op {
            Opcode::Add => {
                let carry_in = self.psw.c();
                let result = a.wrapping_add(b).wrapping_add(carry_in as u16);
                self.psw.arithmetic(CarryOp::Add { carry_in }, a, b, result);
                result
            }
            Opcode::Sub => {
                let borrow_in = self.psw.c();
                let result = a.wrapping_sub(b).wrapping_sub(borrow_in as u16);
                self.psw.arithmetic(CarryOp::Sub { borrow_in }, a, b, result);
                result
            }
            Opcode::Cmp => {
                self.psw.arithmetic(CarryOp::Cmp, a, b, a.wrapping_sub(b));
                return Ok(());
            }
            Opcode::Sar | Opcode::Sal => {
                let (result, carry) = if op == Opcode::Sar {
                    shift_right(a, b)
                } else {
                    shift_left(a, b)
                };
                self.psw.set_c(carry);
                self.psw.set_zn(result);
                result
            }
            Opcode::And => a & b,
            Opcode::Or => a | b,
            Opcode::Not => !a,
            _ => return Err(Fault::instruction("Unknown instruction opcode")),
        };
        self.set_reg(dst, result);
        Ok(())
    }

    fn extended(&mut self, iep: usize, op: Opcode, dst: Register, src: Register) -> Result<bool, Fault> {
        // `str` may store through an absolute address in its destination
        if op != Opcode::Str && !dst.is_general() {
            return Err(Fault::instruction("dst must be a register"));
        }

        match op {
            Opcode::Jmp => {
                require_zero(dst, "dst")?;
                let target = self.resolve_address(src)?;
                self.mem.jump(target as usize);
            }
            Opcode::Jz | Opcode::Jgt => {
                require_zero(dst, "dst")?;
                let displacement = self.resolve_address(src)? as i16;
                let taken = match op {
                    Opcode::Jz => self.psw.z(),
                    _ => !self.psw.z() && self.psw.n() == self.psw.o(),
                };
                if taken {
                    self.mem.jump(iep.wrapping_add_signed(displacement as isize));
                }
            }
            Opcode::Mov => {
                require_register(dst, "dst")?;
                let value = self.resolve_address(src)?;
                self.set_reg(dst, value);
            }
            Opcode::Ldr => {
                require_register(dst, "dst")?;
                let addr = self.resolve_address(src)?;
                let value = self.mem.load_word(addr)?;
                self.set_reg(dst, value);
            }
            Opcode::Str => {
                require_register(src, "src")?;
                let addr = self.resolve_address(dst)?;
                let value = self.reg(src);
                self.mem.store_word(addr, value)?;
            }
            Opcode::In => {
                require_zero(src, "src")?;
                require_register(dst, "dst")?;
                let value = self
                    .console
                    .read_int(iep, dst)
                    .map_err(|err| Fault::instruction(format!("Console input failed: {err}")))?;
                self.set_reg(dst, value as u16);
            }
            Opcode::Out => {
                require_register(src, "src")?;
                require_zero(dst, "dst")?;
                let value = self.reg(src) as i16;
                self.console
                    .write_int(iep, src, value)
                    .map_err(|err| Fault::instruction(format!("Console output failed: {err}")))?;
            }
            Opcode::Clc | Opcode::Stc | Opcode::Nc => {
                require_zero(src, "src")?;
                require_zero(dst, "dst")?;
                let carry = match op {
                    Opcode::Clc => false,
                    Opcode::Stc => true,
                    _ => !self.psw.c(),
                };
                self.psw.set_c(carry);
            }
            Opcode::Movf => {
                require_zero(src, "src")?;
                require_register(dst, "dst")?;
                // Reading the flags does not change them
                if let Some(slot) = self.regs.get_mut(dst.index()) {
                    *slot = self.psw.packed() as u16;
                }
            }
            Opcode::Movtsp => {
                require_register(src, "src")?;
                require_zero(dst, "dst")?;
                let sp = self.reg(src) as usize;
                self.mem.set_sp(sp);
            }
            Opcode::Movfsp => {
                require_zero(src, "src")?;
                require_register(dst, "dst")?;
                let sp = self.mem.sp() as u16;
                if let Some(slot) = self.regs.get_mut(dst.index()) {
                    *slot = sp;
                }
            }
            Opcode::Call => {
                require_zero(dst, "dst")?;
                let target = self.resolve_address(src)?;
                let ret = self.mem.iep() as u16;
                self.mem.push(ret)?;
                self.mem.jump(target as usize);
            }
            Opcode::Ret => {
                require_zero(src, "src")?;
                require_zero(dst, "dst")?;
                let target = self.mem.pop()?;
                self.mem.jump(target as usize);
            }
            Opcode::Hlt => {
                require_zero(src, "src")?;
                require_zero(dst, "dst")?;
                return Ok(false);
            }
            _ => return Err(Fault::instruction("Unknown instruction opcode")),
        }
        Ok(true)
    }
}

impl<C: Console> fmt::Display for Cpu<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, reg) in self.regs.iter().enumerate() {
            write!(f, "R{i}: {reg:#06x} ")?;
        }
        writeln!(f)?;
        writeln!(f, "FLAGS: {}", self.psw)?;
        write!(f, "IEP: {:#06x} SP: {:#06x}", self.mem.iep(), self.mem.sp())
    }
}
