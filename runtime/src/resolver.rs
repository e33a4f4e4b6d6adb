use anyhow::{Result, bail};
use parser::class::constant_pool::CpIndex;

use crate::bytecode::{self, InvokeKind, RefCategory, index_width, length_at};
use crate::cache::CacheIndex;
use crate::constant_pool::Tag;
use crate::error::ConsistencyError;
use crate::method::Method;

/// The constant pool operand of one instruction.
///
/// Decoding is a pure function of the method's code, the bci and whether the
/// method runs against a cache; nothing here mutates shared state.
#[derive(Debug, Clone, Copy)]
pub struct BytecodeOperand<'a> {
    method: &'a Method,
    bci: usize,
    opcode: u8,
    category: RefCategory,
    width: usize,
}

impl<'a> BytecodeOperand<'a> {
    pub fn at(method: &'a Method, bci: usize) -> Result<Self> {
        let code = method.code();
        // validates the opcode and that the whole instruction is in bounds
        length_at(code, bci)?;

        let opcode = code[bci];
        let Some(width) = index_width(opcode) else {
            bail!(ConsistencyError::NotAConstantPoolReference {
                name: bytecode::name(opcode).unwrap_or("<unknown>"),
                bci,
            });
        };

        Ok(Self {
            method,
            bci,
            opcode,
            category: RefCategory::of(opcode),
            width,
        })
    }

    pub fn bci(&self) -> usize {
        self.bci
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn name(&self) -> &'static str {
        bytecode::name(self.opcode).unwrap_or("<unknown>")
    }

    pub fn category(&self) -> RefCategory {
        self.category
    }

    pub fn method(&self) -> &'a Method {
        self.method
    }

    /// The index exactly as encoded after the opcode.
    ///
    /// Prepared invokedynamic sites carry a u4 cache index. Unprepared ones
    /// still hold the class-file form, a u2 pool index and two zero bytes.
    pub fn raw_index(&self) -> u32 {
        let width = match self.category {
            RefCategory::InvokeDynamic if self.method.cache().is_none() => 2,
            _ => self.width,
        };
        let at = self.bci + 1;
        self.method.code()[at..at + width]
            .iter()
            .fold(0, |index, &byte| (index << 8) | u32::from(byte))
    }


    /// Present only for cache-using opcodes of a prepared method.
    pub fn cache_index(&self) -> Option<CacheIndex> {
        match self.method.cache() {
            Some(_) if self.category.uses_cache() => Some(CacheIndex(self.raw_index())),
            _ => None,
        }
    }

    /// The constant pool index this instruction refers to, whether the
    /// operand is a pool index or a cache index.
    pub fn cp_index(&self) -> Result<CpIndex> {
        let raw = self.raw_index();
        let index = match (self.method.cache(), self.category) {
            (Some(cache), RefCategory::InvokeDynamic) => {
                cache.indy_entry_at(CacheIndex(raw))?.cp_index()
            }
            (Some(cache), RefCategory::Field(_)) => {
                cache.field_entry_at(CacheIndex(raw))?.cp_index()
            }
            (Some(cache), RefCategory::Invoke(_)) => {
                cache.method_entry_at(CacheIndex(raw))?.cp_index()
            }
            // never rewritten, or the method has no cache yet
            _ => return self.method.constants().check_tag(raw, self.expected_tag()),
        };

        self.method
            .constants()
            .check_tag(index.0.into(), self.expected_tag())
    }

    pub fn expected_tag(&self) -> Tag {
        match self.category {
            RefCategory::Field(_) => Tag::FieldRef,
            RefCategory::Invoke(InvokeKind::Interface) => Tag::InterfaceMethodRef,
            RefCategory::Invoke(_) => Tag::AnyMethodRef,
            RefCategory::InvokeDynamic => Tag::InvokeDynamic,
            RefCategory::Constant => match self.opcode {
                bytecode::LDC | bytecode::LDC_W | bytecode::LDC2_W => Tag::Loadable,
                _ => Tag::Class,
            },
            RefCategory::None => Tag::Any,
        }
    }
}

/// Constant pool index behind the instruction at `bci`.
pub fn resolve_cp_index(method: &Method, bci: usize) -> Result<CpIndex> {
    BytecodeOperand::at(method, bci)?.cp_index()
}
