use crate::buffer::{BoundsError, Buffer, Cursor, Scalar};

/// Flat emulator memory.
///
/// Code and stack share the same bytes. The buffer's own cursor is the
/// instruction pointer; the stack pointer is a second cursor that starts one
/// past the last byte and grows down.
#[derive(Clone, Debug)]
pub struct Memory {
    bytes: Buffer,
    sp: Cursor,
}

impl Memory {
    pub fn new(size: usize) -> Self {
        Memory {
            bytes: Buffer::fixed(size),
            sp: Cursor::new(size),
        }
    }

    /// Copy an object image to address 0.
    pub fn load(&mut self, image: &[u8]) -> Result<(), BoundsError> {
        self.bytes.put(0, image)
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &Buffer {
        &self.bytes
    }

    pub fn iep(&self) -> usize {
        self.bytes.pos()
    }

    pub fn jump(&mut self, addr: usize) {
        self.bytes.set_pos(addr);
    }

    /// Read from the instruction stream.
    pub fn fetch<T: Scalar>(&mut self) -> Result<T, BoundsError> {
        self.bytes.read()
    }

    pub fn sp(&self) -> usize {
        self.sp.pos()
    }

    pub fn set_sp(&mut self, pos: usize) {
        self.sp.set(pos);
    }

    pub fn push(&mut self, value: u16) -> Result<(), BoundsError> {
        self.sp.backtrack(2);
        self.bytes.put_value(self.sp.pos(), value)
    }

    pub fn pop(&mut self) -> Result<u16, BoundsError> {
        self.bytes.read_with(&mut self.sp)
    }

    pub fn load_word(&self, addr: u16) -> Result<u16, BoundsError> {
        self.bytes.read_at(addr as usize)
    }

    pub fn store_word(&mut self, addr: u16, value: u16) -> Result<(), BoundsError> {
        self.bytes.put_value(addr as usize, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_grows_down_over_code() {
        let mut mem = Memory::new(8);
        mem.load(&[1, 2, 3, 4]).unwrap();
        assert_eq!(mem.sp(), 8);
        mem.push(0xAABB).unwrap();
        assert_eq!(mem.sp(), 6);
        assert_eq!(mem.load_word(6).unwrap(), 0xAABB);
        assert_eq!(mem.pop().unwrap(), 0xAABB);
        assert_eq!(mem.sp(), 8);
        assert!(mem.pop().is_err());

        // Stack aliases code once it runs that far down
        mem.set_sp(2);
        mem.push(0x0909).unwrap();
        assert_eq!(mem.bytes().contents()[..2], [9, 9]);
    }

    #[test]
    fn image_must_fit() {
        let mut mem = Memory::new(4);
        assert!(mem.load(&[0; 5]).is_err());
        assert!(mem.load(&[0; 4]).is_ok());
    }

    #[test]
    fn words_at_the_top_edge() {
        let mut mem = Memory::new(0x10000);
        assert!(mem.store_word(0xFFFE, 1).is_ok());
        assert!(mem.store_word(0xFFFF, 1).is_err());
        assert!(mem.load_word(0xFFFF).is_err());
    }
}
