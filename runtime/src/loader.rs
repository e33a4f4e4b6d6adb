use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use common::ClassIdentifier;
use parser::class::{ClassFile, access_flags::AccessFlag};
use tracing::{debug, trace};

use crate::class::{Class, ClassId};

/// Somewhere class file bytes can be looked up by name.
pub trait ReadClass: Send {
    fn read_class(&mut self, identifier: &ClassIdentifier) -> Result<Vec<u8>>;
}

/// Class path directory laid out by package.
pub struct Directory {
    root: PathBuf,
}

impl Directory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ReadClass for Directory {
    fn read_class(&mut self, identifier: &ClassIdentifier) -> Result<Vec<u8>> {
        let path = self.root.join(identifier.path()?);
        std::fs::read(&path).with_context(|| format!("reading {}", path.display()))
    }
}

pub struct ClassLoader {
    sources: Vec<Box<dyn ReadClass>>,
    classes: HashMap<ClassIdentifier, Arc<Class>>,
    next_id: u32,
}

impl ClassLoader {
    pub fn new(sources: Vec<Box<dyn ReadClass>>) -> Self {
        Self {
            sources,
            classes: HashMap::new(),
            next_id: 0,
        }
    }

    /// Loads a class from the first source that has it; loaded classes are
    /// kept, so a second call returns the same `Arc`.
    pub fn load(&mut self, identifier: &ClassIdentifier) -> Result<Arc<Class>> {
        if let Some(class) = self.classes.get(identifier) {
            return Ok(class.clone());
        }

        debug!("loading class {identifier}");

        for source in &mut self.sources {
            let class_bytes = match source.read_class(identifier) {
                Ok(bytes) => bytes,
                Err(err) => {
                    trace!("{identifier} not in source: {err:#}");
                    continue;
                }
            };

            let class_file = parser::parse(&mut Cursor::new(class_bytes))
                .with_context(|| format!("ClassFormatError: {identifier}"))?;
            Self::check_name(&class_file, identifier)?;

            let class = Arc::new(Class::new(ClassId(self.next_id), class_file)?);
            self.next_id += 1;
            self.classes.insert(identifier.clone(), class.clone());
            return Ok(class);
        }

        bail!("NoClassDefFoundError: {identifier}")
    }

    pub fn get(&self, identifier: &ClassIdentifier) -> Option<Arc<Class>> {
        self.classes.get(identifier).cloned()
    }

    pub fn loaded(&self) -> usize {
        self.classes.len()
    }

    fn check_name(class_file: &ClassFile, identifier: &ClassIdentifier) -> Result<()> {
        let name = class_file.name()?;
        if name != identifier.internal_name() {
            bail!("NoClassDefFoundError: {identifier} (wrong name: {name})")
        }

        if class_file.access_flags.contains(&AccessFlag::Module) {
            bail!("NoClassDefFoundError: {identifier} is a module descriptor")
        }

        Ok(())
    }
}
