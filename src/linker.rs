use std::collections::BTreeSet;

use crate::air::{is_exported, Placement, SourceFile};
use crate::buffer::Buffer;
use crate::encoder::Unit;
use crate::error::{AsmError, FileError, LinkError};
use crate::symbol::{Exports, Patch, Resolution};

/// Addresses at or above this cannot be named by a 16-bit word.
const SYMBOL_LIMIT: usize = 0xFFFF;

/// Turn a symbol address into the word stored at a reference made from `ip`.
pub fn calculate_symbol(name: &str, addr: usize, relative: bool, ip: usize) -> Result<u16, AsmError> {
    let out_of_range = |value: i64, relative: bool| AsmError::SymbolOutOfRange {
        name: name.to_owned(),
        value,
        relative,
    };

    if addr >= SYMBOL_LIMIT {
        return Err(out_of_range(addr as i64, false));
    }
    if !relative {
        return Ok(addr as u16);
    }

    let delta = addr as i64 - ip as i64;
    i16::try_from(delta)
        .map(|delta| delta as u16)
        .map_err(|_| out_of_range(delta, true))
}

impl Unit {
    /// Look a symbol up for a reference made from `ip`.
    ///
    /// Local labels win over `external`. Without an external table an
    /// unknown symbol is [`Resolution::Deferred`]; with one it is an error.
    pub fn resolve_symbol(
        &self,
        ip: usize,
        name: &str,
        relative: bool,
        external: Option<&Exports>,
    ) -> Result<Resolution, AsmError> {
        if ip >= SYMBOL_LIMIT {
            return Err(AsmError::instruction("IP out of address space range"));
        }

        let addr = match (self.symbols.get(name), external) {
            (Some(addr), _) => *addr,
            (None, Some(external)) => *external
                .get(name)
                .ok_or_else(|| AsmError::UndefinedSymbol(name.to_owned()))?,
            (None, None) => return Ok(Resolution::Deferred),
        };
        calculate_symbol(name, addr, relative, ip).map(Resolution::Resolved)
    }

    /// Patch every pending reference to a label of this unit. Returns how
    /// many were patched.
    ///
    /// A reference that cannot be patched stays pending and its error is
    /// collected; the remaining references are still processed.
    pub fn resolve_self(&mut self, buf: &mut Buffer) -> Result<usize, Vec<AsmError>> {
        let mut unsatisfied = Vec::new();
        let mut errors = Vec::new();
        let mut resolved = 0;
        for patch in std::mem::take(&mut self.pending) {
            let Some(addr) = self.symbols.get(&patch.symbol) else {
                unsatisfied.push(patch);
                continue;
            };
            match patch_word(buf, &patch, *addr) {
                Ok(()) => resolved += 1,
                Err(err) => {
                    errors.push(err);
                    unsatisfied.push(patch);
                }
            }
        }
        self.pending = unsatisfied;

        if errors.is_empty() {
            Ok(resolved)
        } else {
            Err(errors)
        }
    }

    /// Copy every public label into `out`.
    pub fn export_symbols(&self, out: &mut Exports) -> Result<usize, AsmError> {
        let mut count = 0;
        for (name, addr) in self.symbols.iter().filter(|(name, _)| is_exported(name)) {
            if out.contains_key(name) {
                return Err(AsmError::DuplicateSymbol(name.clone()));
            }
            out.insert(name.clone(), *addr);
            count += 1;
        }
        Ok(count)
    }

    /// Patch what is left against the merged export table and return the
    /// references that are still undefined.
    ///
    /// Undefined and failing references stay pending. Every failure other
    /// than an undefined symbol is returned.
    pub fn resolve_final(&mut self, buf: &mut Buffer, exports: &Exports) -> Result<Vec<Patch>, Vec<AsmError>> {
        let mut unsatisfied = Vec::new();
        let mut undefined = Vec::new();
        let mut errors = Vec::new();
        for patch in std::mem::take(&mut self.pending) {
            let outcome = self
                .resolve_symbol(patch.ip, &patch.symbol, patch.relative, Some(exports))
                .and_then(|resolution| match resolution {
                    Resolution::Resolved(value) => buf.put_value(patch.site, value).map_err(AsmError::from),
                    Resolution::Deferred => Err(AsmError::UndefinedSymbol(patch.symbol.clone())),
                });
            match outcome {
                Ok(()) => {}
                Err(AsmError::UndefinedSymbol(_)) => {
                    undefined.push(patch.clone());
                    unsatisfied.push(patch);
                }
                Err(err) => {
                    errors.push(err);
                    unsatisfied.push(patch);
                }
            }
        }
        self.pending = unsatisfied;

        if errors.is_empty() {
            Ok(undefined)
        } else {
            Err(errors)
        }
    }
}

fn patch_word(buf: &mut Buffer, patch: &Patch, addr: usize) -> Result<(), AsmError> {
    let value = calculate_symbol(&patch.symbol, addr, patch.relative, patch.ip)?;
    buf.put_value(patch.site, value)?;
    Ok(())
}

/// Assembles files one after the other into a single object stream, then
/// links them.
#[derive(Debug, Default)]
pub struct Linker {
    object: Buffer,
    units: Vec<(String, Unit)>,
    exports: Exports,
    failed: usize,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode every line of `file` at the end of the object stream, resolve
    /// what the file can resolve on its own and publish its exports.
    ///
    /// Placements are recorded on the lines that encoded. Returns the number
    /// of exported symbols.
    pub fn assemble(&mut self, file: &mut SourceFile) -> Result<usize, Vec<FileError>> {
        let mut unit = Unit::new();
        let mut errors = Vec::new();

        for source in file.lines.iter_mut() {
            let pos = self.object.pos();
            match unit.synthesize(&source.line, &mut self.object) {
                Ok(len) => source.line.placement = Some(Placement { pos, len }),
                Err(err) => errors.push(FileError::new(&file.name, Some(source.number), err)),
            }
        }

        if let Err(failed) = unit.resolve_self(&mut self.object) {
            errors.extend(failed.into_iter().map(|err| FileError::new(&file.name, None, err)));
        }

        let exported = match unit.export_symbols(&mut self.exports) {
            Ok(count) => count,
            Err(err) => {
                errors.push(FileError::new(&file.name, None, err));
                0
            }
        };

        self.units.push((file.name.clone(), unit));
        if errors.is_empty() {
            Ok(exported)
        } else {
            self.failed += 1;
            Err(errors)
        }
    }

    pub fn exports(&self) -> &Exports {
        &self.exports
    }

    /// Bytes written so far.
    pub fn object(&self) -> &Buffer {
        &self.object
    }

    /// Resolve the remaining references across files and hand out the
    /// finished image.
    pub fn link(mut self) -> Result<Vec<u8>, LinkError> {
        if self.failed > 0 {
            return Err(LinkError::AssemblyFailed { files: self.failed });
        }

        let mut undefined = BTreeSet::new();
        let mut out_of_range = Vec::new();
        for (name, unit) in self.units.iter_mut() {
            match unit.resolve_final(&mut self.object, &self.exports) {
                Ok(left) => undefined.extend(left.into_iter().map(|patch| patch.symbol)),
                Err(failed) => {
                    out_of_range.extend(failed.into_iter().map(|err| FileError::new(name, None, err)))
                }
            }
        }

        if !out_of_range.is_empty() {
            return Err(LinkError::OutOfRange(out_of_range));
        }
        if !undefined.is_empty() {
            return Err(LinkError::Undefined(undefined.into_iter().collect()));
        }
        Ok(self.object.into_bytes())
    }
}
