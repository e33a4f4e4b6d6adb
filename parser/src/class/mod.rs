use std::{collections::HashSet, io::Read};

use anyhow::{Context, Result, bail};

use crate::{
    class::{
        access_flags::AccessFlag,
        attribute::{Attribute, BootstrapMethod},
        constant_pool::{ConstantPool, CpIndex},
        field::Field,
        method::Method,
    },
    util::{u2, u4},
};

pub mod access_flags;
pub mod attribute;
pub mod constant_pool;
pub mod descriptor;
pub mod field;
pub mod method;

const MIN_MAJOR_VERSION: u16 = 45;
const MAX_MAJOR_VERSION: u16 = 69;

/// Representation of a class, interface or module
#[derive(Clone, Debug)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: HashSet<AccessFlag>,
    pub this_class: CpIndex,
    /// 0 only for `java/lang/Object`
    pub super_class: CpIndex,
    pub interfaces: Vec<CpIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    pub fn new(r: &mut impl Read) -> Result<Self> {
        let magic = u4(r)?;

        if magic != 0xCAFEBABE {
            bail!("invalid magic number 0x{magic:x}");
        }

        let minor_version = u2(r)?;
        let major_version = u2(r)?;

        if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
            bail!(
                "unsupported class file version {}.{}",
                major_version,
                minor_version
            );
        }

        let constant_pool_count = u2(r)?;
        let constant_pool = ConstantPool::new(r, constant_pool_count)?;

        let access_flags = AccessFlag::flags(r)?;
        let this_class = u2(r)?.into();
        let super_class = u2(r)?.into();

        let interfaces_count = u2(r)?;
        let mut interfaces = Vec::with_capacity(interfaces_count.into());
        for _ in 0..interfaces_count {
            interfaces.push(u2(r)?.into());
        }

        let fields_count = u2(r)?;
        let fields = Field::fields(r, &constant_pool, fields_count.into()).context("fields")?;

        let methods_count = u2(r)?;
        let methods = Method::methods(r, &constant_pool, methods_count).context("methods")?;

        let attributes_count = u2(r)?;
        let attributes = Attribute::attributes(r, &constant_pool, attributes_count.into())?;

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn name(&self) -> Result<&str> {
        self.constant_pool.class_name(&self.this_class)
    }

    pub fn super_class_name(&self) -> Result<Option<&str>> {
        if self.super_class.0 == 0 {
            return Ok(None);
        }

        Ok(Some(self.constant_pool.class_name(&self.super_class)?))
    }

    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        self.attributes
            .iter()
            .find_map(|attr| match attr {
                Attribute::BootstrapMethods(methods) => Some(methods.as_slice()),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(&AccessFlag::Interface)
    }
}
