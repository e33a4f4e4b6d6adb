use anyhow::Result;
use std::{collections::HashSet, io::Read};
use tracing::trace;

use crate::{
    class::{
        attribute::{Attribute, Code},
        constant_pool::{ConstantPool, CpIndex},
        descriptor::MethodDescriptor,
    },
    util::u2,
};

#[derive(Clone, Debug)]
pub struct Method {
    pub access_flags: HashSet<AccessFlag>,
    pub name_index: CpIndex,
    pub descriptor_index: CpIndex,
    pub attributes: Vec<Attribute>,
}

impl Method {
    fn new(r: &mut impl Read, cp: &ConstantPool) -> Result<Self> {
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

    pub fn methods(r: &mut impl Read, cp: &ConstantPool, count: u16) -> Result<Vec<Self>> {
        let mut methods = Vec::new();

        trace!("parsing {count} methods");
        for _ in 0..count {
            methods.push(Method::new(r, cp)?);
        }

        Ok(methods)
    }

    pub fn code(&self) -> Option<&Code> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn name<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str> {
        cp.utf8(&self.name_index)
    }

    pub fn raw_descriptor<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str> {
        cp.utf8(&self.descriptor_index)
    }

    pub fn descriptor(&self, cp: &ConstantPool) -> Result<MethodDescriptor> {
        let raw = cp.utf8(&self.descriptor_index)?;
        MethodDescriptor::new(raw)
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(&AccessFlag::Static)
    }

    pub fn is_private(&self) -> bool {
        self.access_flags.contains(&AccessFlag::Private)
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.contains(&AccessFlag::Final)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(&AccessFlag::Abstract)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(&AccessFlag::Native)
    }
}

/// Method-level access flags
#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy)]
pub enum AccessFlag {
    Public,
    Private,
    Protected,
    Static,
    Final,
    Synchronized,
    Bridge,
    Varargs,
    Native,
    Abstract,
    Strict,
    Synthetic,
}

const FLAG_BITS: [(u16, AccessFlag); 12] = [
    (0x0001, AccessFlag::Public),
    (0x0002, AccessFlag::Private),
    (0x0004, AccessFlag::Protected),
    (0x0008, AccessFlag::Static),
    (0x0010, AccessFlag::Final),
    (0x0020, AccessFlag::Synchronized),
    (0x0040, AccessFlag::Bridge),
    (0x0080, AccessFlag::Varargs),
    (0x0100, AccessFlag::Native),
    (0x0400, AccessFlag::Abstract),
    (0x0800, AccessFlag::Strict),
    (0x1000, AccessFlag::Synthetic),
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
