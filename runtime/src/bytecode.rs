use anyhow::{Result, bail};

use crate::error::ConsistencyError;

pub const NOP: u8 = 0x00;
pub const ICONST_0: u8 = 0x03;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;
pub const ALOAD_0: u8 = 0x2a;
pub const POP: u8 = 0x57;
pub const IINC: u8 = 0x84;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const IRETURN: u8 = 0xac;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const ANEWARRAY: u8 = 0xbd;
pub const CHECKCAST: u8 = 0xc0;
pub const INSTANCEOF: u8 = 0xc1;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}

impl FieldAccess {
    pub fn is_static(&self) -> bool {
        matches!(self, Self::GetStatic | Self::PutStatic)
    }

    pub fn is_put(&self) -> bool {
        matches!(self, Self::PutStatic | Self::PutField)
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Self::GetStatic => GETSTATIC,
            Self::PutStatic => PUTSTATIC,
            Self::GetField => GETFIELD,
            Self::PutField => PUTFIELD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

impl InvokeKind {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Virtual => INVOKEVIRTUAL,
            Self::Special => INVOKESPECIAL,
            Self::Static => INVOKESTATIC,
            Self::Interface => INVOKEINTERFACE,
        }
    }
}

/// How an opcode's operand relates to the constant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefCategory {
    Field(FieldAccess),
    Invoke(InvokeKind),
    InvokeDynamic,
    /// References the pool but is never rewritten to a cache index
    Constant,
    None,
}

impl RefCategory {
    pub fn of(opcode: u8) -> Self {
        match opcode {
            GETSTATIC => Self::Field(FieldAccess::GetStatic),
            PUTSTATIC => Self::Field(FieldAccess::PutStatic),
            GETFIELD => Self::Field(FieldAccess::GetField),
            PUTFIELD => Self::Field(FieldAccess::PutField),
            INVOKEVIRTUAL => Self::Invoke(InvokeKind::Virtual),
            INVOKESPECIAL => Self::Invoke(InvokeKind::Special),
            INVOKESTATIC => Self::Invoke(InvokeKind::Static),
            INVOKEINTERFACE => Self::Invoke(InvokeKind::Interface),
            INVOKEDYNAMIC => Self::InvokeDynamic,
            LDC | LDC_W | LDC2_W | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF | MULTIANEWARRAY => {
                Self::Constant
            }
            _ => Self::None,
        }
    }

    /// True for the opcodes whose operand is replaced by a cache index.
    pub fn uses_cache(&self) -> bool {
        matches!(self, Self::Field(_) | Self::Invoke(_) | Self::InvokeDynamic)
    }
}

/// Width in bytes of the index operand that directly follows the opcode.
pub fn index_width(opcode: u8) -> Option<usize> {
    match RefCategory::of(opcode) {
        RefCategory::None => None,
        RefCategory::InvokeDynamic => Some(4),
        _ if opcode == LDC => Some(1),
        _ => Some(2),
    }
}

pub fn name(opcode: u8) -> Option<&'static str> {
    Some(match opcode {
        0x00 => "nop",
        0x01 => "aconst_null",
        0x02 => "iconst_m1",
        0x03 => "iconst_0",
        0x04 => "iconst_1",
        0x05 => "iconst_2",
        0x06 => "iconst_3",
        0x07 => "iconst_4",
        0x08 => "iconst_5",
        0x09 => "lconst_0",
        0x0a => "lconst_1",
        0x0b => "fconst_0",
        0x0c => "fconst_1",
        0x0d => "fconst_2",
        0x0e => "dconst_0",
        0x0f => "dconst_1",
        0x10 => "bipush",
        0x11 => "sipush",
        0x12 => "ldc",
        0x13 => "ldc_w",
        0x14 => "ldc2_w",
        0x15 => "iload",
        0x16 => "lload",
        0x17 => "fload",
        0x18 => "dload",
        0x19 => "aload",
        0x1a => "iload_0",
        0x1b => "iload_1",
        0x1c => "iload_2",
        0x1d => "iload_3",
        0x1e => "lload_0",
        0x1f => "lload_1",
        0x20 => "lload_2",
        0x21 => "lload_3",
        0x22 => "fload_0",
        0x23 => "fload_1",
        0x24 => "fload_2",
        0x25 => "fload_3",
        0x26 => "dload_0",
        0x27 => "dload_1",
        0x28 => "dload_2",
        0x29 => "dload_3",
        0x2a => "aload_0",
        0x2b => "aload_1",
        0x2c => "aload_2",
        0x2d => "aload_3",
        0x2e => "iaload",
        0x2f => "laload",
        0x30 => "faload",
        0x31 => "daload",
        0x32 => "aaload",
        0x33 => "baload",
        0x34 => "caload",
        0x35 => "saload",
        0x36 => "istore",
        0x37 => "lstore",
        0x38 => "fstore",
        0x39 => "dstore",
        0x3a => "astore",
        0x3b => "istore_0",
        0x3c => "istore_1",
        0x3d => "istore_2",
        0x3e => "istore_3",
        0x3f => "lstore_0",
        0x40 => "lstore_1",
        0x41 => "lstore_2",
        0x42 => "lstore_3",
        0x43 => "fstore_0",
        0x44 => "fstore_1",
        0x45 => "fstore_2",
        0x46 => "fstore_3",
        0x47 => "dstore_0",
        0x48 => "dstore_1",
        0x49 => "dstore_2",
        0x4a => "dstore_3",
        0x4b => "astore_0",
        0x4c => "astore_1",
        0x4d => "astore_2",
        0x4e => "astore_3",
        0x4f => "iastore",
        0x50 => "lastore",
        0x51 => "fastore",
        0x52 => "dastore",
        0x53 => "aastore",
        0x54 => "bastore",
        0x55 => "castore",
        0x56 => "sastore",
        0x57 => "pop",
        0x58 => "pop2",
        0x59 => "dup",
        0x5a => "dup_x1",
        0x5b => "dup_x2",
        0x5c => "dup2",
        0x5d => "dup2_x1",
        0x5e => "dup2_x2",
        0x5f => "swap",
        0x60 => "iadd",
        0x61 => "ladd",
        0x62 => "fadd",
        0x63 => "dadd",
        0x64 => "isub",
        0x65 => "lsub",
        0x66 => "fsub",
        0x67 => "dsub",
        0x68 => "imul",
        0x69 => "lmul",
        0x6a => "fmul",
        0x6b => "dmul",
        0x6c => "idiv",
        0x6d => "ldiv",
        0x6e => "fdiv",
        0x6f => "ddiv",
        0x70 => "irem",
        0x71 => "lrem",
        0x72 => "frem",
        0x73 => "drem",
        0x74 => "ineg",
        0x75 => "lneg",
        0x76 => "fneg",
        0x77 => "dneg",
        0x78 => "ishl",
        0x79 => "lshl",
        0x7a => "ishr",
        0x7b => "lshr",
        0x7c => "iushr",
        0x7d => "lushr",
        0x7e => "iand",
        0x7f => "land",
        0x80 => "ior",
        0x81 => "lor",
        0x82 => "ixor",
        0x83 => "lxor",
        0x84 => "iinc",
        0x85 => "i2l",
        0x86 => "i2f",
        0x87 => "i2d",
        0x88 => "l2i",
        0x89 => "l2f",
        0x8a => "l2d",
        0x8b => "f2i",
        0x8c => "f2l",
        0x8d => "f2d",
        0x8e => "d2i",
        0x8f => "d2l",
        0x90 => "d2f",
        0x91 => "i2b",
        0x92 => "i2c",
        0x93 => "i2s",
        0x94 => "lcmp",
        0x95 => "fcmpl",
        0x96 => "fcmpg",
        0x97 => "dcmpl",
        0x98 => "dcmpg",
        0x99 => "ifeq",
        0x9a => "ifne",
        0x9b => "iflt",
        0x9c => "ifge",
        0x9d => "ifgt",
        0x9e => "ifle",
        0x9f => "if_icmpeq",
        0xa0 => "if_icmpne",
        0xa1 => "if_icmplt",
        0xa2 => "if_icmpge",
        0xa3 => "if_icmpgt",
        0xa4 => "if_icmple",
        0xa5 => "if_acmpeq",
        0xa6 => "if_acmpne",
        0xa7 => "goto",
        0xa8 => "jsr",
        0xa9 => "ret",
        0xaa => "tableswitch",
        0xab => "lookupswitch",
        0xac => "ireturn",
        0xad => "lreturn",
        0xae => "freturn",
        0xaf => "dreturn",
        0xb0 => "areturn",
        0xb1 => "return",
        0xb2 => "getstatic",
        0xb3 => "putstatic",
        0xb4 => "getfield",
        0xb5 => "putfield",
        0xb6 => "invokevirtual",
        0xb7 => "invokespecial",
        0xb8 => "invokestatic",
        0xb9 => "invokeinterface",
        0xba => "invokedynamic",
        0xbb => "new",
        0xbc => "newarray",
        0xbd => "anewarray",
        0xbe => "arraylength",
        0xbf => "athrow",
        0xc0 => "checkcast",
        0xc1 => "instanceof",
        0xc2 => "monitorenter",
        0xc3 => "monitorexit",
        0xc4 => "wide",
        0xc5 => "multianewarray",
        0xc6 => "ifnull",
        0xc7 => "ifnonnull",
        0xc8 => "goto_w",
        0xc9 => "jsr_w",
        _ => return None,
    })
}

/// Length of instructions that do not depend on their position; `None` for
/// the switches, `wide` and unknown opcodes.
fn fixed_length(opcode: u8) -> Option<usize> {
    Some(match opcode {
        0x10 | 0x12 | 0x15..=0x19 | 0x36..=0x3a | 0xa9 | 0xbc => 2,
        0x11 | 0x13 | 0x14 | 0x84 | 0x99..=0xa8 | 0xb2..=0xb8 | 0xbb | 0xbd | 0xc0 | 0xc1
        | 0xc6 | 0xc7 => 3,
        0xc5 => 4,
        0xb9 | 0xba | 0xc8 | 0xc9 => 5,
        TABLESWITCH | LOOKUPSWITCH | WIDE => return None,
        0x00..=0xc9 => 1,
        _ => return None,
    })
}

fn read_i4(code: &[u8], at: usize) -> Option<i32> {
    let bytes = code.get(at..at + 4)?;
    Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Length of the instruction starting at `bci`, checked against the end of `code`.
pub fn length_at(code: &[u8], bci: usize) -> Result<usize> {
    let opcode = *code.get(bci).ok_or(ConsistencyError::BciOutOfBounds {
        bci,
        length: code.len(),
    })?;
    let name = name(opcode).ok_or(ConsistencyError::UnknownOpcode { opcode, bci })?;
    let truncated = ConsistencyError::TruncatedInstruction {
        name,
        bci,
        length: code.len(),
    };

    let length = match fixed_length(opcode) {
        Some(length) => length,
        None => {
            // switch operands are aligned relative to the start of the method
            let aligned = (bci + 4) & !3;
            match opcode {
                TABLESWITCH => {
                    let low = read_i4(code, aligned + 4).ok_or(truncated.clone())?;
                    let high = read_i4(code, aligned + 8).ok_or(truncated.clone())?;
                    if high < low {
                        bail!(truncated)
                    }
                    let count = (i64::from(high) - i64::from(low) + 1) as usize;
                    aligned + 12 + count * 4 - bci
                }
                LOOKUPSWITCH => {
                    let npairs = read_i4(code, aligned + 4).ok_or(truncated.clone())?;
                    if npairs < 0 {
                        bail!(truncated)
                    }
                    aligned + 8 + npairs as usize * 8 - bci
                }
                WIDE => match code.get(bci + 1) {
                    Some(&IINC) => 6,
                    // loads, stores and ret
                    Some(0x15..=0x19 | 0x36..=0x3a | 0xa9) => 4,
                    Some(&modified) => bail!(ConsistencyError::UnknownOpcode {
                        opcode: modified,
                        bci: bci + 1,
                    }),
                    None => bail!(truncated),
                },
                _ => bail!(ConsistencyError::UnknownOpcode { opcode, bci }),
            }
        }
    };

    if bci + length > code.len() {
        bail!(truncated)
    }

    Ok(length)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub bci: usize,
    pub opcode: u8,
    pub length: usize,
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        name(self.opcode).unwrap_or("<unknown>")
    }
}

/// Walks a code array instruction by instruction.
pub struct BytecodeStream<'a> {
    code: &'a [u8],
    bci: usize,
    failed: bool,
}

impl<'a> BytecodeStream<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            bci: 0,
            failed: false,
        }
    }
}

impl Iterator for BytecodeStream<'_> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.bci >= self.code.len() {
            return None;
        }

        match length_at(self.code, self.bci) {
            Ok(length) => {
                let instruction = Instruction {
                    bci: self.bci,
                    opcode: self.code[self.bci],
                    length,
                };
                self.bci += length;
                Some(Ok(instruction))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
