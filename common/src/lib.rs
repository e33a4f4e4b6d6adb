use std::fmt::Debug;
use std::fmt::Display;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;

/// Identifies a class using package and name
#[derive(Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ClassIdentifier {
    pub package: String,
    pub name: String,
}

impl ClassIdentifier {
    pub fn new(package: String, name: String) -> Self {
        Self { package, name }
    }

    /// Accepts internal (`java/lang/System`) and binary (`java.lang.System`) names.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            bail!("empty class name");
        }

        if raw.starts_with('[') {
            bail!("array class {raw} has no class file");
        }

        let raw = raw.replace('/', ".");
        let mut parts: Vec<&str> = raw.split('.').collect();
        let name = parts
            .pop()
            .filter(|name| !name.is_empty())
            .context(format!("invalid class identifier {raw}"))?
            .to_string();

        Ok(Self {
            package: parts.join("."),
            name,
        })
    }

    /// Name in the form used inside class files, `java/lang/System`.
    pub fn internal_name(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.package.replace('.', "/"), self.name)
        }
    }

    pub fn path(&self) -> Result<String> {
        let mut path = PathBuf::new();
        if !self.package.is_empty() {
            for package in self.package.split('.') {
                path.push(package);
            }
        }

        path.push(format!("{}.class", self.name));
        path.to_str()
            .map(|p| p.replace('\\', "/"))
            .context("unable to build path string")
    }

    /// Inverse of [`ClassIdentifier::path`], e.g. for zip entry names.
    pub fn from_path(path: &str) -> Result<Self> {
        let stem = path
            .strip_suffix(".class")
            .context(format!("{path} is not a class file"))?;
        Self::parse(stem)
    }
}

impl Display for ClassIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.internal_name())
    }
}

impl Debug for ClassIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.package.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.package, self.name)
        }
    }
}
