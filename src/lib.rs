// Storage and instruction set
pub mod buffer;
pub use buffer::{BoundsError, Buffer, ADDRESS_SPACE};
pub mod isa;
pub use isa::{Opcode, Register};

// Parsing
mod lexer;
pub mod parser;
pub use parser::{parse_line, AsmParser};
pub mod air;
pub use air::{AsmLine, Offset, Operand, SourceFile};

// Assembling and linking
pub mod symbol;
pub mod encoder;
pub use encoder::Unit;
pub mod linker;
pub use linker::Linker;
pub mod listing;
pub use listing::Listing;
pub mod disasm;
pub use disasm::{decode, disassemble, Decoded};

// Running
pub mod runtime;
pub use runtime::{Console, Cpu, CpuState, Psw, StdConsole};

pub mod error;
pub use error::{AsmError, CpuError, FileError, LinkError};

pub mod env;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;
