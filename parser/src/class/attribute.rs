use std::io::Read;

use anyhow::{Context, Result, bail};

use crate::{
    class::constant_pool::{ConstantPool, CpIndex},
    util::{u2, u4, vec},
};

const CONSTANT_VALUE_ATTR_NAME: &str = "ConstantValue";
const CODE_ATTR_NAME: &str = "Code";
const BOOTSTRAP_METHODS_ATTR_NAME: &str = "BootstrapMethods";

#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    ConstantValue {
        constant_value_index: CpIndex,
    },
    Code(Code),
    BootstrapMethods(Vec<BootstrapMethod>),
    /// Anything the runtime does not interpret, kept verbatim.
    Unknown {
        name: String,
        info: Vec<u8>,
    },
}

impl Attribute {
    pub fn new(r: &mut impl Read, cp: &ConstantPool) -> Result<Self> {
        let attribute_name_index = u2(r)?.into();
        let attribute_length = u4(r)?;

        let name = cp.utf8(&attribute_name_index)?;
        let info = vec(r, attribute_length as usize)
            .with_context(|| format!("attribute {name} is truncated"))?;
        let mut body = info.as_slice();

        let attribute = match name {
            CONSTANT_VALUE_ATTR_NAME => Self::ConstantValue {
                constant_value_index: u2(&mut body)?.into(),
            },
            CODE_ATTR_NAME => Self::Code(Code::new(&mut body, cp)?),
            BOOTSTRAP_METHODS_ATTR_NAME => {
                let count = u2(&mut body)?;
                let mut methods = Vec::with_capacity(count.into());
                for _ in 0..count {
                    methods.push(BootstrapMethod::new(&mut body)?);
                }
                Self::BootstrapMethods(methods)
            }
            _ => {
                return Ok(Self::Unknown {
                    name: name.to_string(),
                    info,
                });
            }
        };

        if !body.is_empty() {
            bail!(
                "attribute {name} declares {attribute_length} bytes but {} were left unread",
                body.len()
            );
        }

        Ok(attribute)
    }

    pub fn attributes(r: &mut impl Read, cp: &ConstantPool, count: usize) -> Result<Vec<Self>> {
        let mut attributes = Vec::new();

        for _ in 0..count {
            attributes.push(Attribute::new(r, cp)?);
        }

        Ok(attributes)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Code {
    fn new(r: &mut impl Read, cp: &ConstantPool) -> Result<Self> {
        let max_stack = u2(r)?;
        let max_locals = u2(r)?;
        let code_length = u4(r)?;
        if code_length == 0 || code_length >= 65536 {
            bail!("invalid code length {code_length}");
        }
        let code = vec(r, code_length as usize)?;

        let exception_table_length = u2(r)?;
        let mut exception_table = Vec::with_capacity(exception_table_length.into());
        for _ in 0..exception_table_length {
            exception_table.push(ExceptionHandler {
                start_pc: u2(r)?,
                end_pc: u2(r)?,
                handler_pc: u2(r)?,
                catch_type: u2(r)?.into(),
            });
        }

        let attributes_count = u2(r)?;
        let attributes = Attribute::attributes(r, cp, attributes_count.into())?;

        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// 0 catches everything
    pub catch_type: CpIndex,
}

/// One entry of the `BootstrapMethods` attribute
#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapMethod {
    pub method_ref: CpIndex,
    pub arguments: Vec<CpIndex>,
}

impl BootstrapMethod {
    fn new(r: &mut impl Read) -> Result<Self> {
        let method_ref = u2(r)?.into();
        let num_arguments = u2(r)?;

        let mut arguments = Vec::with_capacity(num_arguments.into());
        for _ in 0..num_arguments {
            arguments.push(u2(r)?.into());
        }

        Ok(Self {
            method_ref,
            arguments,
        })
    }
}
