use std::fmt;

const Z_BIT: u8 = 1 << 0;
const O_BIT: u8 = 1 << 1;
const C_BIT: u8 = 1 << 2;
const N_BIT: u8 = 1 << 3;

/// Operation whose carry and overflow are being recorded.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CarryOp {
    Add { carry_in: bool },
    Sub { borrow_in: bool },
    /// Subtraction without borrow-in, result discarded.
    Cmp,
}

/// Processor status word.
///
/// Z and N are read from the last value written by a flag-affecting
/// operation. C and O are computed when an add, subtract or compare executes
/// and stay put until the next one (or an explicit carry instruction).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Psw {
    zn: u16,
    carry: bool,
    overflow: bool,
}

impl Psw {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn z(&self) -> bool {
        self.zn == 0
    }

    pub fn n(&self) -> bool {
        (self.zn as i16) < 0
    }

    pub fn c(&self) -> bool {
        self.carry
    }

    pub fn o(&self) -> bool {
        self.overflow
    }

    pub fn set_zn(&mut self, value: u16) {
        self.zn = value;
    }

    pub fn set_c(&mut self, carry: bool) {
        self.carry = carry;
    }

    /// Update every flag after `dst = src1 op src2`.
    pub fn arithmetic(&mut self, op: CarryOp, src1: u16, src2: u16, dst: u16) {
        self.zn = dst;
        match op {
            CarryOp::Add { carry_in } => {
                self.carry = dst < src1 || (carry_in && dst == src1);
                // Same-signed operands with a differently signed result
                self.overflow = (src1 ^ src2 ^ 0x8000) & (dst ^ src2) & 0x8000 != 0;
            }
            CarryOp::Sub { borrow_in } => {
                self.carry = src1 < dst || (borrow_in && src2 == 0xFFFF);
                self.overflow = (src1 ^ src2) & (src1 ^ dst) & 0x8000 != 0;
            }
            CarryOp::Cmp => {
                self.carry = src1 < src2;
                self.overflow = (src1 ^ src2) & (src1 ^ dst) & 0x8000 != 0;
            }
        }
    }

    /// Status byte: bit 0 Z, bit 1 O, bit 2 C, bit 3 N.
    pub fn packed(&self) -> u8 {
        let mut bits = 0;
        for (set, bit) in [
            (self.z(), Z_BIT),
            (self.o(), O_BIT),
            (self.c(), C_BIT),
            (self.n(), N_BIT),
        ] {
            if set {
                bits |= bit;
            }
        }
        bits
    }

    /// Inverse of [`Psw::packed`]. Z wins over N when both are set, since no
    /// single value is both zero and negative.
    pub fn restore(&mut self, packed: u16) {
        let packed = packed as u8;
        self.zn = if packed & Z_BIT != 0 {
            0
        } else if packed & N_BIT != 0 {
            0x8000
        } else {
            1
        };
        self.carry = packed & C_BIT != 0;
        self.overflow = packed & O_BIT != 0;
    }
}

impl fmt::Display for Psw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Z: {} O: {} C: {} N: {}",
            self.z() as u8,
            self.o() as u8,
            self.c() as u8,
            self.n() as u8
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zero() {
        let psw = Psw::new();
        assert!(psw.z());
        assert!(!psw.n() && !psw.c() && !psw.o());
        assert_eq!(psw.packed(), Z_BIT);
    }

    #[test]
    fn add_carry_and_overflow() {
        let mut psw = Psw::new();
        psw.arithmetic(CarryOp::Add { carry_in: false }, 0xFFFF, 1, 0);
        assert!(psw.c() && psw.z() && !psw.o());

        psw.arithmetic(CarryOp::Add { carry_in: false }, 0x7FFF, 1, 0x8000);
        assert!(!psw.c() && psw.o() && psw.n());

        // Adding 0xFFFF with carry-in wraps back onto src1
        psw.arithmetic(CarryOp::Add { carry_in: true }, 5, 0xFFFF, 5);
        assert!(psw.c());
    }

    #[test]
    fn compare_sets_borrow() {
        let mut psw = Psw::new();
        psw.arithmetic(CarryOp::Cmp, 5, 10, 5u16.wrapping_sub(10));
        assert!(psw.c());
        assert!(!psw.z());
        assert!(psw.n());
        assert!(!psw.o());

        psw.arithmetic(CarryOp::Cmp, 0x8000, 1, 0x7FFF);
        assert!(psw.o() && !psw.c());
    }

    #[test]
    fn subtract_with_borrow() {
        let mut psw = Psw::new();
        psw.arithmetic(CarryOp::Sub { borrow_in: false }, 3, 5, 3u16.wrapping_sub(5));
        assert!(psw.c());
        psw.arithmetic(CarryOp::Sub { borrow_in: true }, 7, 0xFFFF, 7);
        assert!(psw.c());
        psw.arithmetic(CarryOp::Sub { borrow_in: false }, 7, 2, 5);
        assert!(!psw.c() && !psw.z() && !psw.n());
    }

    #[test]
    fn packed_round_trip() {
        let mut psw = Psw::new();
        psw.set_zn(0x8001);
        psw.set_c(true);
        assert_eq!(psw.packed(), C_BIT | N_BIT);

        let mut restored = Psw::new();
        restored.restore(psw.packed() as u16);
        assert_eq!(restored.packed(), psw.packed());

        restored.restore(0);
        assert!(!restored.z() && !restored.n());
        restored.restore((Z_BIT | N_BIT) as u16);
        assert!(restored.z() && !restored.n());
    }

    #[test]
    fn display() {
        let mut psw = Psw::new();
        psw.set_c(true);
        assert_eq!(psw.to_string(), "Z: 1 O: 0 C: 1 N: 0");
    }
}
