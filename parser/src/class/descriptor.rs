use anyhow::{Context, Result, bail};

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub field_type: FieldType,
}

impl FieldDescriptor {
    pub fn new(raw: &str) -> Result<Self> {
        let field_type = FieldType::new(raw)?;
        if field_type.length() != raw.len() {
            bail!("invalid field descriptor {raw}: trailing characters");
        }

        Ok(Self { field_type })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    pub return_descriptor: ReturnDescriptor,
    pub parameters: Vec<FieldType>,
}

impl MethodDescriptor {
    pub fn new(raw: &str) -> Result<Self> {
        if !raw.starts_with('(') {
            bail!("invalid method descriptor {raw}: no '('");
        }

        let end_of_parameter_descriptor =
            raw.find(')').context("invalid method descriptor: no ')'")?;

        let mut raw_parameter_descriptor = &raw[1..end_of_parameter_descriptor];
        let mut parameters = Vec::new();
        while !raw_parameter_descriptor.is_empty() {
            let parameter = FieldType::new(raw_parameter_descriptor)?;
            raw_parameter_descriptor = &raw_parameter_descriptor[parameter.length()..];
            parameters.push(parameter);
        }

        let raw_return_descriptor = &raw[end_of_parameter_descriptor + 1..];

        let return_descriptor = if raw_return_descriptor == "V" {
            ReturnDescriptor::Void
        } else {
            ReturnDescriptor::FieldType(FieldDescriptor::new(raw_return_descriptor)?.field_type)
        };

        Ok(Self {
            return_descriptor,
            parameters,
        })
    }

    /// Local variable slots taken by the parameters, without the receiver.
    pub fn parameter_slots(&self) -> usize {
        self.parameters.iter().map(FieldType::slots).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnDescriptor {
    Void,
    FieldType(FieldType),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    BaseType(BaseType),
    ObjectType { class_name: String },
    ComponentType(Box<FieldType>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl FieldType {
    /// Parses the field type at the start of `raw`; the rest is ignored.
    fn new(raw: &str) -> Result<Self> {
        let first = raw.chars().next().context("empty field type")?;
        Ok(match first {
            'B' => Self::BaseType(BaseType::Byte),
            'C' => Self::BaseType(BaseType::Char),
            'D' => Self::BaseType(BaseType::Double),
            'F' => Self::BaseType(BaseType::Float),
            'I' => Self::BaseType(BaseType::Int),
            'J' => Self::BaseType(BaseType::Long),
            'S' => Self::BaseType(BaseType::Short),
            'Z' => Self::BaseType(BaseType::Boolean),
            'L' => {
                let end = raw
                    .find(';')
                    .context(format!("unterminated object type in {raw}"))?;
                if end == 1 {
                    bail!("empty class name in {raw}");
                }
                Self::ObjectType {
                    class_name: raw[1..end].to_string(),
                }
            }
            '[' => Self::ComponentType(Box::new(Self::new(&raw[1..])?)),
            _ => bail!("unknown field type: {raw}"),
        })
    }

    fn length(&self) -> usize {
        match self {
            FieldType::BaseType(_) => 1,
            FieldType::ObjectType { class_name } => class_name.len() + 2,
            FieldType::ComponentType(field_type) => field_type.length() + 1,
        }
    }

    pub fn slots(&self) -> usize {
        match self {
            FieldType::BaseType(BaseType::Long) | FieldType::BaseType(BaseType::Double) => 2,
            _ => 1,
        }
    }
}
