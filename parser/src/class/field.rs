use std::{collections::HashSet, io::Read};

use anyhow::Result;

use crate::{
    class::{
        attribute::Attribute,
        constant_pool::{ConstantPool, CpIndex},
    },
    util::u2,
};

#[derive(Clone, Debug)]
pub struct Field {
    pub access_flags: HashSet<AccessFlag>,
    pub name_index: CpIndex,
    pub descriptor_index: CpIndex,
    pub attributes: Vec<Attribute>,
}

impl Field {
    pub fn new(r: &mut impl Read, cp: &ConstantPool) -> Result<Self> {
        let access_flags = AccessFlag::flags(r)?;
        let name_index = u2(r)?.into();
        let descriptor_index = u2(r)?.into();

        let attributes_count = u2(r)?;
        let attributes = Attribute::attributes(r, cp, attributes_count.into())?;

        Ok(Self {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    pub fn fields(r: &mut impl Read, cp: &ConstantPool, count: usize) -> Result<Vec<Self>> {
        let mut fields = Vec::new();

        for _ in 0..count {
            fields.push(Field::new(r, cp)?);
        }

        Ok(fields)
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(&AccessFlag::Static)
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.contains(&AccessFlag::Final)
    }

    pub fn is_volatile(&self) -> bool {
        self.access_flags.contains(&AccessFlag::Volatile)
    }

    pub fn get_constant_value_index(&self) -> Option<&CpIndex> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::ConstantValue {
                constant_value_index,
            } => Some(constant_value_index),
            _ => None,
        })
    }

    pub fn name<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str> {
        cp.utf8(&self.name_index)
    }

    pub fn raw_descriptor<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str> {
        cp.utf8(&self.descriptor_index)
    }
}

/// Field-level access flags
#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy)]
pub enum AccessFlag {
    Public,
    Private,
    Protected,
    Static,
    Final,
    Volatile,
    Transient,
    Synthetic,
    Enum,
}

const FLAG_BITS: [(u16, AccessFlag); 9] = [
    (0x0001, AccessFlag::Public),
    (0x0002, AccessFlag::Private),
    (0x0004, AccessFlag::Protected),
    (0x0008, AccessFlag::Static),
    (0x0010, AccessFlag::Final),
    (0x0040, AccessFlag::Volatile),
    (0x0080, AccessFlag::Transient),
    (0x1000, AccessFlag::Synthetic),
    (0x4000, AccessFlag::Enum),
];

impl AccessFlag {
    pub fn flags(r: &mut impl Read) -> Result<HashSet<AccessFlag>> {
        Ok(Self::from_raw(u2(r)?))
    }

    pub fn from_raw(raw_flags: u16) -> HashSet<AccessFlag> {
        FLAG_BITS
            .iter()
            .filter(|(bit, _)| raw_flags & bit > 0)
            .map(|(_, flag)| *flag)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_static_final() {
        let flags = AccessFlag::from_raw(0x001a);
        assert_eq!(flags.len(), 3);
        assert!(flags.contains(&AccessFlag::Private));
        assert!(flags.contains(&AccessFlag::Static));
        assert!(flags.contains(&AccessFlag::Final));
        assert!(!flags.contains(&AccessFlag::Public));
    }
}
