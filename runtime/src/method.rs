use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use parser::class::descriptor::MethodDescriptor;
use parser::class::method::{self as parsed, AccessFlag};

use crate::cache::ConstantPoolCache;
use crate::constant_pool::ConstantPool;

/// A method as the interpreter sees it: immutable code plus the constant
/// pool and, once the declaring class is prepared, its cache.
#[derive(Debug)]
pub struct Method {
    name: String,
    descriptor: String,
    access_flags: HashSet<AccessFlag>,
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
    constants: Arc<ConstantPool>,
    cache: Option<Arc<ConstantPoolCache>>,
}

impl Method {
    pub fn new(
        name: String,
        descriptor: String,
        access_flags: HashSet<AccessFlag>,
        code: Vec<u8>,
        constants: Arc<ConstantPool>,
        cache: Option<Arc<ConstantPoolCache>>,
    ) -> Self {
        Self {
            name,
            descriptor,
            access_flags,
            max_stack: 0,
            max_locals: 0,
            code,
            constants,
            cache,
        }
    }

    pub fn from_parsed(method: &parsed::Method, constants: &Arc<ConstantPool>) -> Result<Self> {
        let name = method.name(constants.parsed())?.to_string();
        let descriptor = method.raw_descriptor(constants.parsed())?.to_string();
        MethodDescriptor::new(&descriptor)
            .with_context(|| format!("method {name} has an invalid descriptor"))?;

        let (max_stack, max_locals, code) = match method.code() {
            Some(code) => (code.max_stack, code.max_locals, code.code.clone()),
            None => (0, 0, Vec::new()),
        };

        Ok(Self {
            name,
            descriptor,
            access_flags: method.access_flags.clone(),
            max_stack,
            max_locals,
            code,
            constants: constants.clone(),
            cache: None,
        })
    }

    /// Copy of this method running `code` against `cache`.
    pub fn prepared(&self, code: Vec<u8>, cache: Arc<ConstantPoolCache>) -> Self {
        Self {
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
            access_flags: self.access_flags.clone(),
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code,
            constants: self.constants.clone(),
            cache: Some(cache),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    pub fn cache(&self) -> Option<&ConstantPoolCache> {
        self.cache.as_deref()
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

    pub fn is_initializer(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }

    /// Candidates for a dispatch table slot.
    pub fn is_virtual(&self) -> bool {
        !self.is_static() && !self.is_private() && !self.is_initializer()
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.name, self.descriptor)
    }
}
