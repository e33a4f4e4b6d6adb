use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use common::ClassIdentifier;
use tracing::info;

use crate::class::Class;
use crate::linker::ClassTableLinker;
use crate::loader::{ClassLoader, ReadClass};

pub mod bytecode;
pub mod cache;
pub mod class;
pub mod constant_pool;
pub mod error;
pub mod jar;
pub mod linker;
pub mod loader;
pub mod method;
pub mod resolution;
pub mod resolver;
pub mod rewriter;
#[cfg(test)]
mod testing;

pub use error::ConsistencyError;
pub use resolution::{Resolved, resolve_from_cache};
pub use resolver::{BytecodeOperand, resolve_cp_index};

pub struct Vm {
    class_loader: Arc<Mutex<ClassLoader>>,
}

impl Vm {
    pub fn new(sources: Vec<Box<dyn ReadClass>>) -> Self {
        Self {
            class_loader: Arc::new(Mutex::new(ClassLoader::new(sources))),
        }
    }

    pub fn class(&self, identifier: &ClassIdentifier) -> Result<Arc<Class>> {
        self.class_loader
            .lock()
            .map_err(|e| anyhow!("Lock poisoned: {e}"))?
            .load(identifier)
    }

    /// Loads and prepares a class.
    pub fn link(&self, identifier: &ClassIdentifier) -> Result<Arc<Class>> {
        let class = self.class(identifier)?;
        let cache = class.link()?;
        info!("linked {identifier} with {} cache entries", cache.len());
        Ok(class)
    }

    pub fn linker(&self) -> ClassTableLinker {
        ClassTableLinker::new(self.class_loader.clone())
    }
}
