use fxhash::FxBuildHasher;
use indexmap::IndexMap;

/// Insertion-ordered map with a fast hasher.
pub type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Symbol name -> absolute byte offset in the object stream.
pub type SymbolTable = FxMap<String, usize>;

/// Exported symbols of every file, merged.
pub type Exports = FxMap<String, usize>;

pub fn new_table() -> SymbolTable {
    IndexMap::with_hasher(FxBuildHasher::default())
}

/// A word in the object stream still waiting for a symbol's address.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Patch {
    pub symbol: String,
    /// Byte offset of the 16-bit placeholder.
    pub site: usize,
    /// Start of the instruction holding the placeholder. Relative values are
    /// measured from here.
    pub ip: usize,
    pub relative: bool,
}

/// Outcome of looking up a symbol while encoding.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Resolution {
    Resolved(u16),
    /// Not defined yet; a placeholder must be emitted and patched later.
    Deferred,
}
