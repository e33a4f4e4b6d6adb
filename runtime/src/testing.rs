//! Hand assembly of constant pools and class files for tests.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;

use parser::class::constant_pool::{self as cp, CpIndex, CpInfo};

use anyhow::{Context, Result};
use common::ClassIdentifier;

use crate::cache::ConstantPoolCache;
use crate::class::{Class, ClassId};
use crate::constant_pool::ConstantPool;
use crate::loader::ReadClass;
use crate::method::Method;

/// Class source backed by a map from internal name to class file bytes.
#[derive(Default)]
pub struct Memory(pub HashMap<String, Vec<u8>>);

impl Memory {
    pub fn of(builders: Vec<ClassBuilder>) -> Self {
        Self(
            builders
                .into_iter()
                .map(|mut builder| (builder.name.clone(), builder.to_bytes()))
                .collect(),
        )
    }
}

impl ReadClass for Memory {
    fn read_class(&mut self, identifier: &ClassIdentifier) -> Result<Vec<u8>> {
        self.0
            .get(&identifier.internal_name())
            .cloned()
            .context("not found")
    }
}

/// An instance method `run()V` with the given code.
pub fn method(
    constants: &Arc<ConstantPool>,
    code: Vec<u8>,
    cache: Option<Arc<ConstantPoolCache>>,
) -> Method {
    Method::new(
        "run".to_string(),
        "()V".to_string(),
        HashSet::new(),
        code,
        constants.clone(),
        cache,
    )
}

#[derive(Debug)]
pub struct PoolBuilder {
    infos: Vec<CpInfo>,
    // keyed by Debug rendering; CpInfo carries floats and is not Hash
    interned: HashMap<String, CpIndex>,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self {
            infos: vec![CpInfo::Reserved],
            interned: HashMap::new(),
        }
    }
}

impl PoolBuilder {
    pub fn push(&mut self, info: CpInfo) -> CpIndex {
        let index = CpIndex(self.infos.len() as u16);
        let wide = matches!(info, CpInfo::Long(_) | CpInfo::Double(_));
        self.infos.push(info);
        if wide {
            self.infos.push(CpInfo::Unusable);
        }
        index
    }

    fn intern(&mut self, info: CpInfo) -> CpIndex {
        let key = format!("{info:?}");
        if let Some(index) = self.interned.get(&key) {
            return *index;
        }
        let index = self.push(info);
        self.interned.insert(key, index);
        index
    }

    /// Fills with integer constants so the next entry lands at `index`.
    pub fn pad_to(&mut self, index: u16) {
        while self.infos.len() < usize::from(index) {
            self.infos.push(CpInfo::Integer(0));
        }
    }

    pub fn utf8(&mut self, value: &str) -> CpIndex {
        self.intern(CpInfo::Utf8(value.to_string()))
    }

    pub fn class(&mut self, name: &str) -> CpIndex {
        let name_index = self.utf8(name);
        self.intern(CpInfo::Class { name_index })
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> CpIndex {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.intern(CpInfo::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> CpIndex {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.intern(CpInfo::FieldRef {
            class_index,
            name_and_type_index,
        })
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> CpIndex {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.intern(CpInfo::MethodRef {
            class_index,
            name_and_type_index,
        })
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> CpIndex {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.intern(CpInfo::InterfaceMethodRef {
            class_index,
            name_and_type_index,
        })
    }

    pub fn invoke_dynamic(&mut self, bootstrap: u16, name: &str, descriptor: &str) -> CpIndex {
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.intern(CpInfo::InvokeDynamic {
            bootstrap_method_attr_index: bootstrap,
            name_and_type_index,
        })
    }

    /// REF_invokeStatic handle to `class.name:descriptor`.
    pub fn static_method_handle(&mut self, class: &str, name: &str, descriptor: &str) -> CpIndex {
        let reference_index = self.method_ref(class, name, descriptor);
        self.intern(CpInfo::MethodHandle {
            reference_kind: 6,
            reference_index,
        })
    }

    pub fn string(&mut self, value: &str) -> CpIndex {
        let string_index = self.utf8(value);
        self.intern(CpInfo::String { string_index })
    }

    pub fn build(&self) -> cp::ConstantPool {
        cp::ConstantPool {
            infos: self.infos.clone(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend((self.infos.len() as u16).to_be_bytes());
        for info in &self.infos {
            write_info(info, out);
        }
    }
}

fn write_info(info: &CpInfo, out: &mut Vec<u8>) {
    let pair = |out: &mut Vec<u8>, tag: u8, a: u16, b: u16| {
        out.push(tag);
        out.extend(a.to_be_bytes());
        out.extend(b.to_be_bytes());
    };
    let single = |out: &mut Vec<u8>, tag: u8, a: &CpIndex| {
        out.push(tag);
        out.extend(a.0.to_be_bytes());
    };

    match info {
        CpInfo::Reserved | CpInfo::Unusable => {}
        CpInfo::Utf8(value) => {
            out.push(cp::UTF8_TAG);
            out.extend((value.len() as u16).to_be_bytes());
            out.extend(value.as_bytes());
        }
        CpInfo::Integer(value) => {
            out.push(cp::INTEGER_TAG);
            out.extend(value.to_be_bytes());
        }
        CpInfo::Float(value) => {
            out.push(cp::FLOAT_TAG);
            out.extend(value.to_bits().to_be_bytes());
        }
        CpInfo::Long(value) => {
            out.push(cp::LONG_TAG);
            out.extend(value.to_be_bytes());
        }
        CpInfo::Double(value) => {
            out.push(cp::DOUBLE_TAG);
            out.extend(value.to_bits().to_be_bytes());
        }
        CpInfo::Class { name_index } => single(out, cp::CLASS_TAG, name_index),
        CpInfo::String { string_index } => single(out, cp::STRING_TAG, string_index),
        CpInfo::MethodType { descriptor_index } => {
            single(out, cp::METHOD_TYPE_TAG, descriptor_index)
        }
        CpInfo::Module { name_index } => single(out, cp::MODULE_TAG, name_index),
        CpInfo::Package { name_index } => single(out, cp::PACKAGE_TAG, name_index),
        CpInfo::FieldRef {
            class_index,
            name_and_type_index,
        } => pair(out, cp::FIELD_REF_TAG, class_index.0, name_and_type_index.0),
        CpInfo::MethodRef {
            class_index,
            name_and_type_index,
        } => pair(out, cp::METHOD_REF_TAG, class_index.0, name_and_type_index.0),
        CpInfo::InterfaceMethodRef {
            class_index,
            name_and_type_index,
        } => pair(
            out,
            cp::INTERFACE_METHOD_REF_TAG,
            class_index.0,
            name_and_type_index.0,
        ),
        CpInfo::NameAndType {
            name_index,
            descriptor_index,
        } => pair(out, cp::NAME_AND_TYPE_TAG, name_index.0, descriptor_index.0),
        CpInfo::Dynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        } => pair(
            out,
            cp::DYNAMIC_TAG,
            *bootstrap_method_attr_index,
            name_and_type_index.0,
        ),
        CpInfo::InvokeDynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        } => pair(
            out,
            cp::INVOKE_DYNAMIC_TAG,
            *bootstrap_method_attr_index,
            name_and_type_index.0,
        ),
        CpInfo::MethodHandle {
            reference_kind,
            reference_index,
        } => {
            out.push(cp::METHOD_HANDLE_TAG);
            out.push(*reference_kind);
            out.extend(reference_index.0.to_be_bytes());
        }
    }
}

struct Member {
    access_flags: u16,
    name: CpIndex,
    descriptor: CpIndex,
    code: Vec<u8>,
}

/// Assembles a class file with a `java/lang/Object` superclass by default.
pub struct ClassBuilder {
    pub pool: PoolBuilder,
    name: String,
    access_flags: u16,
    this_class: CpIndex,
    super_class: CpIndex,
    interfaces: Vec<CpIndex>,
    fields: Vec<Member>,
    methods: Vec<Member>,
    bootstrap_methods: Vec<(CpIndex, Vec<CpIndex>)>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        let mut pool = PoolBuilder::default();
        let this_class = pool.class(name);
        let super_class = pool.class("java/lang/Object");
        Self {
            pool,
            name: name.to_string(),
            access_flags: 0x0021,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            bootstrap_methods: Vec::new(),
        }
    }

    pub fn interface(name: &str) -> Self {
        let mut builder = Self::new(name);
        builder.access_flags = 0x0601;
        builder
    }

    pub fn extends(&mut self, name: &str) -> &mut Self {
        self.super_class = self.pool.class(name);
        self
    }

    pub fn implements(&mut self, name: &str) -> &mut Self {
        let index = self.pool.class(name);
        self.interfaces.push(index);
        self
    }

    pub fn field(&mut self, access_flags: u16, name: &str, descriptor: &str) -> &mut Self {
        let member = Member {
            access_flags,
            name: self.pool.utf8(name),
            descriptor: self.pool.utf8(descriptor),
            code: Vec::new(),
        };
        self.fields.push(member);
        self
    }

    /// Methods with empty `code` get no Code attribute.
    pub fn method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
    ) -> &mut Self {
        let member = Member {
            access_flags,
            name: self.pool.utf8(name),
            descriptor: self.pool.utf8(descriptor),
            code,
        };
        self.methods.push(member);
        self
    }

    /// Returns the index of the new BootstrapMethods entry.
    pub fn bootstrap_method(&mut self, handle: CpIndex, arguments: Vec<CpIndex>) -> u16 {
        self.bootstrap_methods.push((handle, arguments));
        (self.bootstrap_methods.len() - 1) as u16
    }

    pub fn to_bytes(&mut self) -> Vec<u8> {
        let code_name = self.pool.utf8("Code");
        let bootstrap_name = self.pool.utf8("BootstrapMethods");

        let mut out = Vec::new();
        out.extend(0xCAFEBABEu32.to_be_bytes());
        out.extend(0u16.to_be_bytes());
        out.extend(61u16.to_be_bytes());
        self.pool.write(&mut out);
        out.extend(self.access_flags.to_be_bytes());
        out.extend(self.this_class.0.to_be_bytes());
        out.extend(self.super_class.0.to_be_bytes());
        out.extend((self.interfaces.len() as u16).to_be_bytes());
        for interface in &self.interfaces {
            out.extend(interface.0.to_be_bytes());
        }

        out.extend((self.fields.len() as u16).to_be_bytes());
        for field in &self.fields {
            out.extend(field.access_flags.to_be_bytes());
            out.extend(field.name.0.to_be_bytes());
            out.extend(field.descriptor.0.to_be_bytes());
            out.extend(0u16.to_be_bytes());
        }

        out.extend((self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            out.extend(method.access_flags.to_be_bytes());
            out.extend(method.name.0.to_be_bytes());
            out.extend(method.descriptor.0.to_be_bytes());
            if method.code.is_empty() {
                out.extend(0u16.to_be_bytes());
                continue;
            }
            out.extend(1u16.to_be_bytes());
            out.extend(code_name.0.to_be_bytes());
            out.extend((12 + method.code.len() as u32).to_be_bytes());
            out.extend(4u16.to_be_bytes());
            out.extend(4u16.to_be_bytes());
            out.extend((method.code.len() as u32).to_be_bytes());
            out.extend(&method.code);
            out.extend(0u16.to_be_bytes());
            out.extend(0u16.to_be_bytes());
        }

        if self.bootstrap_methods.is_empty() {
            out.extend(0u16.to_be_bytes());
        } else {
            let mut body = Vec::new();
            body.extend((self.bootstrap_methods.len() as u16).to_be_bytes());
            for (handle, arguments) in &self.bootstrap_methods {
                body.extend(handle.0.to_be_bytes());
                body.extend((arguments.len() as u16).to_be_bytes());
                for argument in arguments {
                    body.extend(argument.0.to_be_bytes());
                }
            }
            out.extend(1u16.to_be_bytes());
            out.extend(bootstrap_name.0.to_be_bytes());
            out.extend((body.len() as u32).to_be_bytes());
            out.extend(body);
        }

        out
    }

    pub fn build(&mut self, id: ClassId) -> Class {
        let class_file = parser::parse(&mut Cursor::new(self.to_bytes())).unwrap();
        Class::new(id, class_file).unwrap()
    }
}
