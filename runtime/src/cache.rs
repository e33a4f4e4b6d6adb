use std::collections::HashMap;
use std::fmt::Display;

use anyhow::{Result, bail};
use parser::class::constant_pool::CpIndex;

use crate::error::ConsistencyError;

pub mod entry;

pub use entry::{
    BasicType, CallSiteState, EntryPoint, FieldEntry, IndyEntry, MethodEntry, ResolvedCallSite,
    ResolvedField, ResolvedMethod,
};

/// Index into a [`ConstantPoolCache`], distinct from a constant pool index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheIndex(pub u32);

impl From<u32> for CacheIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Display for CacheIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

#[derive(Debug)]
pub enum CacheEntry {
    Field(FieldEntry),
    Method(MethodEntry),
    Indy(IndyEntry),
}

impl CacheEntry {
    /// The constant pool index this entry was built from; fixed at creation.
    pub fn cp_index(&self) -> CpIndex {
        match self {
            Self::Field(entry) => entry.cp_index(),
            Self::Method(entry) => entry.cp_index(),
            Self::Indy(entry) => entry.cp_index(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Field(_) => "field",
            Self::Method(_) => "method",
            Self::Indy(_) => "invokedynamic",
        }
    }
}

/// Per-class arena of cache entries addressed by [`CacheIndex`].
///
/// The arena never grows or shrinks after construction; only the resolved
/// state inside individual entries changes, and only forward.
#[derive(Debug)]
pub struct ConstantPoolCache {
    entries: Vec<CacheEntry>,
    field_and_method_indices: HashMap<CpIndex, CacheIndex>,
}

impl ConstantPoolCache {
    pub fn new(entries: Vec<CacheEntry>) -> Self {
        let mut field_and_method_indices = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            if matches!(entry, CacheEntry::Field(_) | CacheEntry::Method(_)) {
                field_and_method_indices
                    .entry(entry.cp_index())
                    .or_insert(CacheIndex(index as u32));
            }
        }

        Self {
            entries,
            field_and_method_indices,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (CacheIndex, &CacheEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (CacheIndex(index as u32), entry))
    }

    pub fn entry_at(&self, index: CacheIndex) -> Result<&CacheEntry> {
        match self.entries.get(index.0 as usize) {
            Some(entry) => Ok(entry),
            None => bail!(ConsistencyError::CacheIndexOutOfBounds {
                index: index.0,
                length: self.entries.len(),
            }),
        }
    }

    pub fn field_entry_at(&self, index: CacheIndex) -> Result<&FieldEntry> {
        match self.entry_at(index)? {
            CacheEntry::Field(entry) => Ok(entry),
            other => bail!(Self::mismatch(index, "field", other)),
        }
    }

    pub fn method_entry_at(&self, index: CacheIndex) -> Result<&MethodEntry> {
        match self.entry_at(index)? {
            CacheEntry::Method(entry) => Ok(entry),
            other => bail!(Self::mismatch(index, "method", other)),
        }
    }

    pub fn indy_entry_at(&self, index: CacheIndex) -> Result<&IndyEntry> {
        match self.entry_at(index)? {
            CacheEntry::Indy(entry) => Ok(entry),
            other => bail!(Self::mismatch(index, "invokedynamic", other)),
        }
    }

    /// Cache index of the field or method entry built from `cp_index`.
    /// Invokedynamic sites have one entry per call site and are not listed.
    pub fn cache_index_of(&self, cp_index: CpIndex) -> Option<CacheIndex> {
        self.field_and_method_indices.get(&cp_index).copied()
    }

    pub fn indy_entries(&self) -> impl Iterator<Item = (CacheIndex, &IndyEntry)> {
        self.entries().filter_map(|(index, entry)| match entry {
            CacheEntry::Indy(indy) => Some((index, indy)),
            _ => None,
        })
    }

    fn mismatch(index: CacheIndex, expected: &'static str, actual: &CacheEntry) -> ConsistencyError {
        ConsistencyError::EntryKindMismatch {
            index: index.0,
            expected,
            actual: actual.kind_name(),
        }
    }
}
