use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use parser::class::constant_pool::{CpIndex, CpInfo};
use tracing::trace;

use crate::bytecode::{BytecodeStream, Instruction, InvokeKind, RefCategory};
use crate::cache::{CacheEntry, ConstantPoolCache, FieldEntry, IndyEntry, MethodEntry};
use crate::constant_pool::{ConstantPool, Tag};
use crate::method::Method;

/// Output of [`Rewriter::rewrite`]: the cache and one code copy per method,
/// in the order the methods were given.
#[derive(Debug)]
pub struct Rewritten {
    pub cache: ConstantPoolCache,
    pub code: Vec<Vec<u8>>,
}

/// Replaces constant pool operands of field, invoke and invokedynamic
/// instructions with cache indices.
///
/// Field and method entries come first, one per Fieldref, Methodref and
/// InterfaceMethodref in pool order, and are shared by every instruction
/// naming that slot. Invokedynamic entries follow, one per call site in
/// method and bytecode order.
pub struct Rewriter<'a> {
    constants: &'a ConstantPool,
    entries: Vec<CacheEntry>,
    member_indices: HashMap<CpIndex, u16>,
}

impl<'a> Rewriter<'a> {
    pub fn new(constants: &'a ConstantPool) -> Result<Self> {
        let mut entries = Vec::new();
        let mut member_indices = HashMap::new();

        for (slot, info) in constants.parsed().infos.iter().enumerate() {
            let cp_index = CpIndex(slot as u16);
            let entry = match info {
                CpInfo::FieldRef { .. } => CacheEntry::Field(FieldEntry::new(cp_index)),
                CpInfo::MethodRef { .. } | CpInfo::InterfaceMethodRef { .. } => {
                    CacheEntry::Method(MethodEntry::new(cp_index))
                }
                _ => continue,
            };
            let cache_index = u16::try_from(entries.len())
                .context("more than 65535 field and method references")?;
            member_indices.insert(cp_index, cache_index);
            entries.push(entry);
        }

        trace!("{} field and method entries", entries.len());
        Ok(Self {
            constants,
            entries,
            member_indices,
        })
    }

    pub fn rewrite(mut self, methods: &[Arc<Method>]) -> Result<Rewritten> {
        let code = methods
            .iter()
            .map(|method| {
                self.rewrite_method(method)
                    .with_context(|| format!("rewriting {method}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Rewritten {
            cache: ConstantPoolCache::new(self.entries),
            code,
        })
    }

    fn rewrite_method(&mut self, method: &Method) -> Result<Vec<u8>> {
        let mut code = method.code().to_vec();

        for instruction in BytecodeStream::new(method.code()) {
            let instruction = instruction?;
            match RefCategory::of(instruction.opcode) {
                RefCategory::Field(_) => {
                    self.rewrite_member(&mut code, &instruction, Tag::FieldRef)?
                }
                RefCategory::Invoke(InvokeKind::Interface) => {
                    self.rewrite_member(&mut code, &instruction, Tag::InterfaceMethodRef)?
                }
                RefCategory::Invoke(_) => {
                    self.rewrite_member(&mut code, &instruction, Tag::AnyMethodRef)?
                }
                RefCategory::InvokeDynamic => self.rewrite_call_site(&mut code, &instruction)?,
                RefCategory::Constant | RefCategory::None => {}
            }
        }

        Ok(code)
    }

    fn rewrite_member(&self, code: &mut [u8], instruction: &Instruction, tag: Tag) -> Result<()> {
        let at = instruction.bci + 1;
        let raw = u16::from_be_bytes([code[at], code[at + 1]]);
        let cp_index = self.constants.check_tag(raw.into(), tag)?;
        let cache_index = self
            .member_indices
            .get(&cp_index)
            .with_context(|| format!("no cache entry for {cp_index}"))?;

        code[at..at + 2].copy_from_slice(&cache_index.to_be_bytes());
        Ok(())
    }

    fn rewrite_call_site(&mut self, code: &mut [u8], instruction: &Instruction) -> Result<()> {
        let at = instruction.bci + 1;
        let raw = u16::from_be_bytes([code[at], code[at + 1]]);
        if code[at + 2] != 0 || code[at + 3] != 0 {
            bail!(
                "invokedynamic at bci {} has non-zero operand padding",
                instruction.bci
            );
        }

        let cp_index = self.constants.check_tag(raw.into(), Tag::InvokeDynamic)?;
        let dynamic = self.constants.dynamic_ref(&cp_index)?;
        let cache_index = self.entries.len() as u32;
        self.entries.push(CacheEntry::Indy(IndyEntry::new(
            cp_index,
            dynamic.bootstrap_method_index,
        )));

        code[at..at + 4].copy_from_slice(&cache_index.to_be_bytes());
        Ok(())
    }
}
