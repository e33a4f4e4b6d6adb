use std::io::Read;

use anyhow::Result;

use crate::class::ClassFile;

pub mod class;
mod util;

pub fn parse(r: &mut impl Read) -> Result<ClassFile> {
    ClassFile::new(r)
}
