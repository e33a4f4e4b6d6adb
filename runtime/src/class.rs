use std::collections::HashSet;
use std::fmt::Display;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result, bail};
use common::ClassIdentifier;
use parser::class::ClassFile;
use parser::class::access_flags::AccessFlag;
use parser::class::attribute::BootstrapMethod;
use parser::class::descriptor::FieldDescriptor;
use parser::class::field;
use tracing::{debug, instrument};

use crate::cache::{BasicType, ConstantPoolCache};
use crate::constant_pool::ConstantPool;
use crate::method::Method;
use crate::rewriter::Rewriter;

/// Loader-assigned number, unique per loaded class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub descriptor: String,
    pub basic_type: BasicType,
    pub access_flags: HashSet<field::AccessFlag>,
}

impl Field {
    fn from_parsed(field: &field::Field, constants: &ConstantPool) -> Result<Self> {
        let name = field.name(constants.parsed())?.to_string();
        let descriptor = field.raw_descriptor(constants.parsed())?.to_string();
        let basic_type = (&FieldDescriptor::new(&descriptor)?.field_type).into();

        Ok(Self {
            name,
            descriptor,
            basic_type,
            access_flags: field.access_flags.clone(),
        })
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(&field::AccessFlag::Static)
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.contains(&field::AccessFlag::Final)
    }

    pub fn is_volatile(&self) -> bool {
        self.access_flags.contains(&field::AccessFlag::Volatile)
    }
}

/// State produced by linking: the cache plus methods whose code refers to it.
#[derive(Debug)]
struct Prepared {
    cache: Arc<ConstantPoolCache>,
    methods: Vec<Arc<Method>>,
}

#[derive(Debug)]
pub struct Class {
    id: ClassId,
    identifier: ClassIdentifier,
    super_class: Option<ClassIdentifier>,
    interfaces: Vec<ClassIdentifier>,
    access_flags: HashSet<AccessFlag>,
    constants: Arc<ConstantPool>,
    bootstrap_methods: Vec<BootstrapMethod>,
    fields: Vec<Field>,
    methods: Vec<Arc<Method>>,
    prepared: OnceLock<Prepared>,
}

impl Class {
    pub fn new(id: ClassId, class_file: ClassFile) -> Result<Self> {
        let identifier = ClassIdentifier::parse(class_file.name()?)?;
        let super_class = class_file
            .super_class_name()?
            .map(ClassIdentifier::parse)
            .transpose()?;
        let interfaces = class_file
            .interfaces
            .iter()
            .map(|index| ClassIdentifier::parse(class_file.constant_pool.class_name(index)?))
            .collect::<Result<Vec<_>>>()?;
        let bootstrap_methods = class_file.bootstrap_methods().to_vec();

        let constants = Arc::new(ConstantPool::new(class_file.constant_pool));
        let fields = class_file
            .fields
            .iter()
            .map(|field| Field::from_parsed(field, &constants))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("fields of {identifier}"))?;
        let methods = class_file
            .methods
            .iter()
            .map(|method| Method::from_parsed(method, &constants).map(Arc::new))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("methods of {identifier}"))?;

        Ok(Self {
            id,
            identifier,
            super_class,
            interfaces,
            access_flags: class_file.access_flags,
            constants,
            bootstrap_methods,
            fields,
            methods,
            prepared: OnceLock::new(),
        })
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn identifier(&self) -> &ClassIdentifier {
        &self.identifier
    }

    pub fn super_class(&self) -> Option<&ClassIdentifier> {
        self.super_class.as_ref()
    }

    pub fn interfaces(&self) -> &[ClassIdentifier] {
        &self.interfaces
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(&AccessFlag::Interface)
    }

    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        &self.bootstrap_methods
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str, descriptor: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.name == name && field.descriptor == descriptor)
    }

    /// Rewritten methods once linked, the class-file methods before that.
    pub fn methods(&self) -> &[Arc<Method>] {
        match self.prepared.get() {
            Some(prepared) => &prepared.methods,
            None => &self.methods,
        }
    }

    /// Position of a declared method; stable across linking.
    pub fn method_slot(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|method| method.name() == name && method.descriptor() == descriptor)
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Result<&Arc<Method>> {
        match self.method_slot(name, descriptor) {
            Some(slot) => Ok(&self.methods()[slot]),
            None => bail!("no method {name}{descriptor} in {}", self.identifier),
        }
    }

    pub fn is_linked(&self) -> bool {
        self.prepared.get().is_some()
    }

    pub fn cache(&self) -> Option<&Arc<ConstantPoolCache>> {
        self.prepared.get().map(|prepared| &prepared.cache)
    }

    /// Rewrites every method and builds the constant pool cache.
    ///
    /// Idempotent: a class is rewritten once, and callers racing on an
    /// unlinked class all observe the same published cache.
    #[instrument(level = "debug", skip(self), fields(class = %self.identifier))]
    pub fn link(&self) -> Result<&Arc<ConstantPoolCache>> {
        if let Some(prepared) = self.prepared.get() {
            return Ok(&prepared.cache);
        }

        let rewritten = Rewriter::new(&self.constants)?.rewrite(&self.methods)?;
        let cache = Arc::new(rewritten.cache);
        let methods = self
            .methods
            .iter()
            .zip(rewritten.code)
            .map(|(method, code)| Arc::new(method.prepared(code, cache.clone())))
            .collect();

        let prepared = self.prepared.get_or_init(|| Prepared { cache, methods });
        debug!(entries = prepared.cache.len(), "linked");
        Ok(&prepared.cache)
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identifier)
    }
}
