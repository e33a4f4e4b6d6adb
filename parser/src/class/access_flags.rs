use std::{collections::HashSet, io::Read};

use anyhow::Result;

use crate::util::u2;

/// Class-level access flags, `ClassFile.access_flags`
#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy)]
pub enum AccessFlag {
    Public,
    Final,
    Super,
    Interface,
    Abstract,
    Synthetic,
    Annotation,
    Enum,
    Module,
}

const FLAG_BITS: [(u16, AccessFlag); 9] = [
    (0x0001, AccessFlag::Public),
    (0x0010, AccessFlag::Final),
    (0x0020, AccessFlag::Super),
    (0x0200, AccessFlag::Interface),
    (0x0400, AccessFlag::Abstract),
    (0x1000, AccessFlag::Synthetic),
    (0x2000, AccessFlag::Annotation),
    (0x4000, AccessFlag::Enum),
    (0x8000, AccessFlag::Module),
];

impl AccessFlag {
    pub fn flags(r: &mut impl Read) -> Result<HashSet<AccessFlag>> {
        Ok(Self::from_raw(u2(r)?))
    }

    /// Unknown bits are ignored, as the class-file format requires.
    pub fn from_raw(raw_flags: u16) -> HashSet<AccessFlag> {
        FLAG_BITS
            .iter()
            .filter(|(bit, _)| raw_flags & bit > 0)
            .map(|(_, flag)| *flag)
            .collect()
    }
}
