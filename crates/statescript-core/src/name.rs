//! Interned script names
//!
//! Identifiers that cross the engine (function names, state names, labels,
//! property names) are interned once into a process-global table and passed
//! around as 4-byte indices. Index 0 is always `"None"`, the distinguished
//! empty name. The table is append-only: names are never removed, so interned
//! string data can be handed out with `'static` lifetime.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// An interned identifier.
///
/// Copyable, 4 bytes, compares by table index. Two `Name`s are equal exactly
/// when their spellings are identical (lookup is case-sensitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(u32);

struct NameTable {
    entries: Vec<&'static str>,
    index: FxHashMap<&'static str, u32>,
}

impl NameTable {
    fn new() -> Self {
        let mut table = NameTable {
            entries: Vec::with_capacity(256),
            index: FxHashMap::default(),
        };
        table.intern("None");
        table
    }

    fn intern(&mut self, text: &str) -> u32 {
        if let Some(&id) = self.index.get(text) {
            return id;
        }
        let id = self.entries.len() as u32;
        let leaked: &'static str = Box::leak(text.to_owned().into_boxed_str());
        self.entries.push(leaked);
        self.index.insert(leaked, id);
        id
    }
}

static TABLE: Lazy<RwLock<NameTable>> = Lazy::new(|| RwLock::new(NameTable::new()));

impl Name {
    /// The empty name, spelled `"None"`.
    pub const NONE: Name = Name(0);

    /// Intern `text`, returning its table index. Repeated calls with the
    /// same spelling return the same `Name`.
    pub fn new(text: &str) -> Name {
        // Fast path under the read lock for already-known names.
        if let Some(&id) = TABLE.read().index.get(text) {
            return Name(id);
        }
        Name(TABLE.write().intern(text))
    }

    /// Look up `text` without interning it.
    pub fn find(text: &str) -> Option<Name> {
        TABLE.read().index.get(text).map(|&id| Name(id))
    }

    /// The interned spelling.
    pub fn as_str(self) -> &'static str {
        TABLE.read().entries[self.0 as usize]
    }

    /// True for [`Name::NONE`].
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Raw table index, as stored in name immediates.
    pub fn index(self) -> u32 {
        self.0
    }

    /// Rebuild a `Name` from a raw table index, validating it.
    pub fn from_index(index: u32) -> Option<Name> {
        if (index as usize) < TABLE.read().entries.len() {
            Some(Name(index))
        } else {
            None
        }
    }
}

impl Default for Name {
    fn default() -> Self {
        Name::NONE
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_index_zero() {
        assert_eq!(Name::new("None"), Name::NONE);
        assert!(Name::NONE.is_none());
        assert_eq!(Name::default(), Name::NONE);
        assert_eq!(Name::NONE.as_str(), "None");
    }

    #[test]
    fn test_intern_is_stable() {
        let a = Name::new("BeginState");
        let b = Name::new("BeginState");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "BeginState");
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let lower = Name::new("patrolling");
        let upper = Name::new("Patrolling");
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_find_does_not_intern() {
        assert!(Name::find("NeverInternedAnywhereElse").is_none());
        let made = Name::new("NeverInternedAnywhereElse");
        assert_eq!(Name::find("NeverInternedAnywhereElse"), Some(made));
    }

    #[test]
    fn test_index_round_trip() {
        let name = Name::new("Idle");
        assert_eq!(Name::from_index(name.index()), Some(name));
        assert_eq!(Name::from_index(u32::MAX), None);
    }
}
