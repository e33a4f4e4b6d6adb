use std::fmt::Display;
use std::io::Read;

use anyhow::{Context, Result, bail};

use crate::util::{f4, f8, i4, i8, u1, u2, utf8};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpIndex(pub u16);

impl From<u16> for CpIndex {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl Display for CpIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A table of structures representing various string constants,
/// class and interface names, field names, and other constant structures
#[derive(Clone, Debug)]
pub struct ConstantPool {
    pub infos: Vec<CpInfo>,
}

impl ConstantPool {
    pub fn new(r: &mut impl Read, count: u16) -> Result<Self> {
        if count == 0 {
            bail!("constant pool count is 0, it must be at least 1");
        }

        let mut infos = Vec::with_capacity(count.into());
        infos.push(CpInfo::Reserved);

        while infos.len() < count.into() {
            let index = infos.len();
            let info = CpInfo::new(r).with_context(|| format!("constant pool entry #{index}"))?;
            let wide = matches!(info, CpInfo::Long(_) | CpInfo::Double(_));
            infos.push(info);

            // long and double take two slots
            if wide {
                infos.push(CpInfo::Unusable);
            }
        }

        if infos.len() != count.into() {
            bail!("constant pool overflows its count {count} with a trailing 8-byte constant");
        }

        Ok(Self { infos })
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.len() <= 1
    }

    pub fn get(&self, index: &CpIndex) -> Result<&CpInfo> {
        match self.infos.get(usize::from(index.0)) {
            None => bail!(
                "constant pool index {index} out of bounds (length {})",
                self.infos.len()
            ),
            Some(CpInfo::Reserved) | Some(CpInfo::Unusable) => {
                bail!("constant pool index {index} is not a usable entry")
            }
            Some(info) => Ok(info),
        }
    }

    pub fn utf8(&self, index: &CpIndex) -> Result<&str> {
        match self.get(index)? {
            CpInfo::Utf8(s) => Ok(s),
            info => bail!("expected Utf8 at {index}, found {}", info.tag_name()),
        }
    }

    pub fn class_name(&self, index: &CpIndex) -> Result<&str> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.utf8(name_index),
            info => bail!("expected Class at {index}, found {}", info.tag_name()),
        }
    }

    /// Returns `(name, descriptor)`.
    pub fn name_and_type(&self, index: &CpIndex) -> Result<(&str, &str)> {
        match self.get(index)? {
            CpInfo::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(name_index)?, self.utf8(descriptor_index)?)),
            info => bail!("expected NameAndType at {index}, found {}", info.tag_name()),
        }
    }
}

pub const UTF8_TAG: u8 = 1;
pub const INTEGER_TAG: u8 = 3;
pub const FLOAT_TAG: u8 = 4;
pub const LONG_TAG: u8 = 5;
pub const DOUBLE_TAG: u8 = 6;
pub const CLASS_TAG: u8 = 7;
pub const STRING_TAG: u8 = 8;
pub const FIELD_REF_TAG: u8 = 9;
pub const METHOD_REF_TAG: u8 = 10;
pub const INTERFACE_METHOD_REF_TAG: u8 = 11;
pub const NAME_AND_TYPE_TAG: u8 = 12;
pub const METHOD_HANDLE_TAG: u8 = 15;
pub const METHOD_TYPE_TAG: u8 = 16;
pub const DYNAMIC_TAG: u8 = 17;
pub const INVOKE_DYNAMIC_TAG: u8 = 18;
pub const MODULE_TAG: u8 = 19;
pub const PACKAGE_TAG: u8 = 20;

#[derive(Clone, Debug, PartialEq)]
pub enum CpInfo {
    Reserved,
    /// Second slot of a long or double
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: CpIndex,
    },
    String {
        string_index: CpIndex,
    },
    FieldRef {
        class_index: CpIndex,
        name_and_type_index: CpIndex,
    },
    MethodRef {
        class_index: CpIndex,
        name_and_type_index: CpIndex,
    },
    InterfaceMethodRef {
        class_index: CpIndex,
        name_and_type_index: CpIndex,
    },
    NameAndType {
        name_index: CpIndex,
        descriptor_index: CpIndex,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: CpIndex,
    },
    MethodType {
        descriptor_index: CpIndex,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: CpIndex,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: CpIndex,
    },
    Module {
        name_index: CpIndex,
    },
    Package {
        name_index: CpIndex,
    },
}

impl CpInfo {
    fn new(r: &mut impl Read) -> Result<Self> {
        let tag = u1(r)?;

        Ok(match tag {
            UTF8_TAG => {
                let length = u2(r)?;
                Self::Utf8(utf8(r, length.into())?)
            }
            INTEGER_TAG => Self::Integer(i4(r)?),
            FLOAT_TAG => Self::Float(f4(r)?),
            LONG_TAG => Self::Long(i8(r)?),
            DOUBLE_TAG => Self::Double(f8(r)?),
            CLASS_TAG => Self::Class {
                name_index: u2(r)?.into(),
            },
            STRING_TAG => Self::String {
                string_index: u2(r)?.into(),
            },
            FIELD_REF_TAG => Self::FieldRef {
                class_index: u2(r)?.into(),
                name_and_type_index: u2(r)?.into(),
            },
            METHOD_REF_TAG => Self::MethodRef {
                class_index: u2(r)?.into(),
                name_and_type_index: u2(r)?.into(),
            },
            INTERFACE_METHOD_REF_TAG => Self::InterfaceMethodRef {
                class_index: u2(r)?.into(),
                name_and_type_index: u2(r)?.into(),
            },
            NAME_AND_TYPE_TAG => Self::NameAndType {
                name_index: u2(r)?.into(),
                descriptor_index: u2(r)?.into(),
            },
            METHOD_HANDLE_TAG => Self::MethodHandle {
                reference_kind: u1(r)?,
                reference_index: u2(r)?.into(),
            },
            METHOD_TYPE_TAG => Self::MethodType {
                descriptor_index: u2(r)?.into(),
            },
            DYNAMIC_TAG => Self::Dynamic {
                bootstrap_method_attr_index: u2(r)?,
                name_and_type_index: u2(r)?.into(),
            },
            INVOKE_DYNAMIC_TAG => Self::InvokeDynamic {
                bootstrap_method_attr_index: u2(r)?,
                name_and_type_index: u2(r)?.into(),
            },
            MODULE_TAG => Self::Module {
                name_index: u2(r)?.into(),
            },
            PACKAGE_TAG => Self::Package {
                name_index: u2(r)?.into(),
            },
            _ => bail!("invalid constant pool info tag {tag}"),
        })
    }

    pub fn tag_name(&self) -> &'static str {
        match self {
            Self::Reserved => "Reserved",
            Self::Unusable => "Unusable",
            Self::Utf8(_) => "Utf8",
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::Long(_) => "Long",
            Self::Double(_) => "Double",
            Self::Class { .. } => "Class",
            Self::String { .. } => "String",
            Self::FieldRef { .. } => "Fieldref",
            Self::MethodRef { .. } => "Methodref",
            Self::InterfaceMethodRef { .. } => "InterfaceMethodref",
            Self::NameAndType { .. } => "NameAndType",
            Self::MethodHandle { .. } => "MethodHandle",
            Self::MethodType { .. } => "MethodType",
            Self::Dynamic { .. } => "Dynamic",
            Self::InvokeDynamic { .. } => "InvokeDynamic",
            Self::Module { .. } => "Module",
            Self::Package { .. } => "Package",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn long_takes_two_slots() {
        let bytes = vec![
            LONG_TAG, 0, 0, 0, 0, 0, 0, 0, 9, // #1, #2
            UTF8_TAG, 0, 3, b'f', b'o', b'o', // #3
        ];
        let pool = ConstantPool::new(&mut Cursor::new(bytes), 4).unwrap();

        assert_eq!(pool.len(), 4);
        assert_eq!(pool.get(&CpIndex(1)).unwrap(), &CpInfo::Long(9));
        assert!(pool.get(&CpIndex(2)).is_err());
        assert_eq!(pool.utf8(&CpIndex(3)).unwrap(), "foo");
    }

    #[test]
    fn index_zero_is_reserved() {
        let bytes = vec![UTF8_TAG, 0, 1, b'x'];
        let pool = ConstantPool::new(&mut Cursor::new(bytes), 2).unwrap();
        assert!(pool.get(&CpIndex(0)).is_err());
        assert!(pool.get(&CpIndex(2)).is_err());
    }

    #[test]
    fn member_ref_lookup() {
        let bytes = vec![
            UTF8_TAG, 0, 1, b'A', // #1
            CLASS_TAG, 0, 1, // #2
            UTF8_TAG, 0, 1, b'x', // #3
            UTF8_TAG, 0, 1, b'I', // #4
            NAME_AND_TYPE_TAG, 0, 3, 0, 4, // #5
            FIELD_REF_TAG, 0, 2, 0, 5, // #6
        ];
        let pool = ConstantPool::new(&mut Cursor::new(bytes), 7).unwrap();

        assert_eq!(pool.class_name(&CpIndex(2)).unwrap(), "A");
        assert_eq!(pool.name_and_type(&CpIndex(5)).unwrap(), ("x", "I"));
        assert_eq!(pool.get(&CpIndex(6)).unwrap().tag_name(), "Fieldref");
        assert!(pool.class_name(&CpIndex(6)).is_err());
    }

    #[test]
    fn zero_count_is_rejected() {
        let err = ConstantPool::new(&mut Cursor::new(Vec::new()), 0).unwrap_err();
        assert_eq!(err.to_string(), "constant pool count is 0, it must be at least 1");

        let pool = ConstantPool::new(&mut Cursor::new(Vec::new()), 1).unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn unknown_tag() {
        let bytes = vec![2, 0, 0];
        assert!(ConstantPool::new(&mut Cursor::new(bytes), 2).is_err());
    }
}
