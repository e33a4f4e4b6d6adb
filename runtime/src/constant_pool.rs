use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result, bail};
use common::ClassIdentifier;
use parser::class::constant_pool::{self as cp, CpIndex, CpInfo};

use crate::error::ConsistencyError;

/// What kind of member a symbolic reference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Field,
    Method,
    InterfaceMethod,
}

/// A Fieldref, Methodref or InterfaceMethodref decoded into names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicRef {
    pub kind: RefKind,
    pub class: ClassIdentifier,
    pub name: String,
    pub descriptor: String,
}

/// An InvokeDynamic entry decoded into names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicRef {
    pub bootstrap_method_index: u16,
    pub name: String,
    pub descriptor: String,
}

/// Expected shape of a constant pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    FieldRef,
    /// Methodref or InterfaceMethodref
    AnyMethodRef,
    InterfaceMethodRef,
    InvokeDynamic,
    Class,
    /// Anything ldc, ldc_w or ldc2_w may push
    Loadable,
    /// Any usable slot
    Any,
}

impl Tag {
    fn matches(&self, info: &CpInfo) -> bool {
        match self {
            Self::FieldRef => matches!(info, CpInfo::FieldRef { .. }),
            Self::AnyMethodRef => {
                matches!(info, CpInfo::MethodRef { .. } | CpInfo::InterfaceMethodRef { .. })
            }
            Self::InterfaceMethodRef => matches!(info, CpInfo::InterfaceMethodRef { .. }),
            Self::InvokeDynamic => matches!(info, CpInfo::InvokeDynamic { .. }),
            Self::Class => matches!(info, CpInfo::Class { .. }),
            Self::Loadable => matches!(
                info,
                CpInfo::Integer(_)
                    | CpInfo::Float(_)
                    | CpInfo::Long(_)
                    | CpInfo::Double(_)
                    | CpInfo::Class { .. }
                    | CpInfo::String { .. }
                    | CpInfo::MethodHandle { .. }
                    | CpInfo::MethodType { .. }
                    | CpInfo::Dynamic { .. }
            ),
            Self::Any => !matches!(info, CpInfo::Reserved | CpInfo::Unusable),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::FieldRef => "Fieldref",
            Self::AnyMethodRef => "Methodref or InterfaceMethodref",
            Self::InterfaceMethodRef => "InterfaceMethodref",
            Self::InvokeDynamic => "InvokeDynamic",
            Self::Class => "Class",
            Self::Loadable => "a loadable constant",
            Self::Any => "a usable entry",
        }
    }
}

/// Per-class runtime view of the constant pool.
///
/// The parsed entries never change. Member references are decoded on first
/// use and memoised per slot; a slot, once decoded, stays decoded.
#[derive(Debug)]
pub struct ConstantPool {
    pool: cp::ConstantPool,
    symbolic: Vec<OnceLock<Arc<SymbolicRef>>>,
}

impl ConstantPool {
    pub fn new(pool: cp::ConstantPool) -> Self {
        let symbolic = (0..pool.len()).map(|_| OnceLock::new()).collect();
        Self { pool, symbolic }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn parsed(&self) -> &cp::ConstantPool {
        &self.pool
    }

    /// Raw access with the bounds check reported as a consistency failure.
    pub fn entry(&self, index: u32) -> Result<&CpInfo> {
        let out_of_bounds = ConsistencyError::CpIndexOutOfBounds {
            index,
            length: self.pool.len(),
        };
        let slot = usize::try_from(index).map_err(|_| out_of_bounds.clone())?;
        match self.pool.infos.get(slot) {
            Some(info) if slot != 0 => Ok(info),
            _ => bail!(out_of_bounds),
        }
    }

    /// Checks that `index` is in bounds and holds the expected kind of entry.
    pub fn check_tag(&self, index: u32, expected: Tag) -> Result<CpIndex> {
        let info = self.entry(index)?;
        // entry() already rejected anything above the pool length, which fits u16
        let cp_index = CpIndex(index as u16);
        if !expected.matches(info) {
            bail!(ConsistencyError::TagMismatch {
                index: cp_index.0,
                expected: expected.name(),
                actual: info.tag_name(),
            });
        }

        Ok(cp_index)
    }

    pub fn utf8(&self, index: &CpIndex) -> Result<&str> {
        self.pool.utf8(index)
    }

    pub fn class_name(&self, index: &CpIndex) -> Result<&str> {
        self.pool.class_name(index)
    }

    /// Decodes the member reference at `index`, memoising the result.
    pub fn symbolic_ref(&self, index: &CpIndex) -> Result<Arc<SymbolicRef>> {
        let slot = self
            .symbolic
            .get(usize::from(index.0))
            .ok_or(ConsistencyError::CpIndexOutOfBounds {
                index: index.0.into(),
                length: self.pool.len(),
            })?;

        if let Some(symbolic) = slot.get() {
            return Ok(symbolic.clone());
        }

        let decoded = Arc::new(self.decode_member_ref(index)?);
        // a racing decoder produced an equal value; keep whichever landed first
        Ok(slot.get_or_init(|| decoded).clone())
    }

    fn decode_member_ref(&self, index: &CpIndex) -> Result<SymbolicRef> {
        let (kind, class_index, name_and_type_index) = match self.entry(index.0.into())? {
            CpInfo::FieldRef {
                class_index,
                name_and_type_index,
            } => (RefKind::Field, class_index, name_and_type_index),
            CpInfo::MethodRef {
                class_index,
                name_and_type_index,
            } => (RefKind::Method, class_index, name_and_type_index),
            CpInfo::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => (RefKind::InterfaceMethod, class_index, name_and_type_index),
            info => bail!(ConsistencyError::TagMismatch {
                index: index.0,
                expected: "a member reference",
                actual: info.tag_name(),
            }),
        };

        let class_name = self.pool.class_name(class_index)?;
        let class = ClassIdentifier::parse(class_name)
            .with_context(|| format!("class of member reference {index}"))?;
        let (name, descriptor) = self.pool.name_and_type(name_and_type_index)?;

        Ok(SymbolicRef {
            kind,
            class,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    pub fn dynamic_ref(&self, index: &CpIndex) -> Result<DynamicRef> {
        match self.entry(index.0.into())? {
            CpInfo::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                let (name, descriptor) = self.pool.name_and_type(name_and_type_index)?;
                Ok(DynamicRef {
                    bootstrap_method_index: *bootstrap_method_attr_index,
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                })
            }
            info => bail!(ConsistencyError::TagMismatch {
                index: index.0,
                expected: Tag::InvokeDynamic.name(),
                actual: info.tag_name(),
            }),
        }
    }

    /// One-line rendering of an entry for diagnostics, e.g.
    /// `Fieldref com/example/Point.x:I`.
    pub fn describe(&self, index: &CpIndex) -> Result<String> {
        let info = self.entry(index.0.into())?;
        Ok(match info {
            CpInfo::FieldRef { .. } | CpInfo::MethodRef { .. } | CpInfo::InterfaceMethodRef { .. } => {
                let symbolic = self.symbolic_ref(index)?;
                format!(
                    "{} {}.{}:{}",
                    info.tag_name(),
                    symbolic.class,
                    symbolic.name,
                    symbolic.descriptor
                )
            }
            CpInfo::InvokeDynamic { .. } => {
                let dynamic = self.dynamic_ref(index)?;
                format!(
                    "InvokeDynamic #{}:{}:{}",
                    dynamic.bootstrap_method_index, dynamic.name, dynamic.descriptor
                )
            }
            CpInfo::Class { name_index } => format!("Class {}", self.pool.utf8(name_index)?),
            CpInfo::String { string_index } => {
                format!("String {:?}", self.pool.utf8(string_index)?)
            }
            CpInfo::Integer(value) => format!("Integer {value}"),
            CpInfo::Float(value) => format!("Float {value}"),
            CpInfo::Long(value) => format!("Long {value}"),
            CpInfo::Double(value) => format!("Double {value}"),
            info => info.tag_name().to_string(),
        })
    }
}
