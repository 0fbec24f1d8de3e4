use std::fmt;

use crate::air::{SourceFile, SourceLine};

/// Human readable listing of assembled files against the final object bytes.
pub struct Listing<'a> {
    files: &'a [SourceFile],
    object: &'a [u8],
}

impl<'a> Listing<'a> {
    pub fn new(files: &'a [SourceFile], object: &'a [u8]) -> Self {
        Listing { files, object }
    }

    fn write_line(&self, f: &mut fmt::Formatter<'_>, source: &SourceLine) -> fmt::Result {
        write!(f, "{} //({}", source.line, source.number)?;
        let Some(placement) = source.line.placement else {
            return writeln!(f, ")");
        };
        write!(f, " @ {:#06x}) = ", placement.pos)?;
        let bytes = self
            .object
            .get(placement.pos..placement.pos + placement.len)
            .unwrap_or_default();
        for (i, byte) in bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        writeln!(f)
    }
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for file in self.files {
            writeln!(f, "//FILE: {}", file.name)?;
            for source in &file.lines {
                self.write_line(f, source)?;
            }
        }
        Ok(())
    }
}
