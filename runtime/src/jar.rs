use std::io::{Read, Seek};

use anyhow::{Context, Result};
use common::ClassIdentifier;
use zip::ZipArchive;

use crate::loader::ReadClass;

pub struct Jar<R: Read + Seek> {
    archive: ZipArchive<R>,
}

impl<R: Read + Seek> Jar<R> {
    pub fn new(reader: R) -> Result<Self> {
        let archive = ZipArchive::new(reader).context("not a jar")?;
        Ok(Self { archive })
    }

    /// Every loadable class in the archive, sorted by name.
    ///
    /// `module-info`, `package-info` and versioned entries under `META-INF/`
    /// are skipped.
    pub fn class_identifiers(&self) -> Result<Vec<ClassIdentifier>> {
        let mut identifiers = self
            .archive
            .file_names()
            .filter(|name| name.ends_with(".class") && !name.starts_with("META-INF/"))
            .filter(|name| !name.ends_with("module-info.class"))
            .filter(|name| !name.ends_with("package-info.class"))
            .map(ClassIdentifier::from_path)
            .collect::<Result<Vec<_>>>()?;
        identifiers.sort();
        Ok(identifiers)
    }
}

impl<R: Read + Seek + Send> ReadClass for Jar<R> {
    fn read_class(&mut self, identifier: &ClassIdentifier) -> Result<Vec<u8>> {
        let mut r = self.archive.by_name(&identifier.path()?)?;
        let mut contents = Vec::new();
        r.read_to_end(&mut contents)?;
        Ok(contents)
    }
}
