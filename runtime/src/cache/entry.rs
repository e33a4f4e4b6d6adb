use std::fmt::Display;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::{Result, bail};
use common::ClassIdentifier;
use parser::class::constant_pool::CpIndex;
use parser::class::descriptor::{BaseType, FieldType, ReturnDescriptor};

use crate::bytecode::{FieldAccess, InvokeKind};

/// Opaque address of a method's code, handed out by the linker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryPoint(pub u64);

impl Display for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

/// Computational type of a field or return value, as the interpreter sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Object,
    Array,
    Void,
}

impl BasicType {
    /// Bytes the type takes in an object layout.
    pub fn size(&self) -> u32 {
        match self {
            Self::Boolean | Self::Byte => 1,
            Self::Char | Self::Short => 2,
            Self::Int | Self::Float | Self::Object | Self::Array => 4,
            Self::Long | Self::Double => 8,
            Self::Void => 0,
        }
    }
}

impl From<&FieldType> for BasicType {
    fn from(value: &FieldType) -> Self {
        match value {
            FieldType::BaseType(BaseType::Boolean) => Self::Boolean,
            FieldType::BaseType(BaseType::Byte) => Self::Byte,
            FieldType::BaseType(BaseType::Char) => Self::Char,
            FieldType::BaseType(BaseType::Short) => Self::Short,
            FieldType::BaseType(BaseType::Int) => Self::Int,
            FieldType::BaseType(BaseType::Long) => Self::Long,
            FieldType::BaseType(BaseType::Float) => Self::Float,
            FieldType::BaseType(BaseType::Double) => Self::Double,
            FieldType::ObjectType { .. } => Self::Object,
            FieldType::ComponentType(_) => Self::Array,
        }
    }
}

impl From<&ReturnDescriptor> for BasicType {
    fn from(value: &ReturnDescriptor) -> Self {
        match value {
            ReturnDescriptor::Void => Self::Void,
            ReturnDescriptor::FieldType(field_type) => field_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub holder: ClassIdentifier,
    pub offset: u32,
    pub basic_type: BasicType,
    pub is_static: bool,
    pub is_final: bool,
    pub is_volatile: bool,
}

/// Cache entry for getstatic/putstatic/getfield/putfield.
///
/// Gets and puts are marked resolved separately: the marker holds the opcode
/// that completed resolution and is stored after the payload is published.
#[derive(Debug)]
pub struct FieldEntry {
    cp_index: CpIndex,
    resolved: OnceLock<ResolvedField>,
    get_code: AtomicU8,
    put_code: AtomicU8,
}

impl FieldEntry {
    pub fn new(cp_index: CpIndex) -> Self {
        Self {
            cp_index,
            resolved: OnceLock::new(),
            get_code: AtomicU8::new(0),
            put_code: AtomicU8::new(0),
        }
    }

    pub fn cp_index(&self) -> CpIndex {
        self.cp_index
    }

    fn marker(&self, access: FieldAccess) -> &AtomicU8 {
        if access.is_put() {
            &self.put_code
        } else {
            &self.get_code
        }
    }

    pub fn is_resolved(&self, access: FieldAccess) -> bool {
        self.marker(access).load(Ordering::Acquire) == access.opcode()
    }

    /// The payload, but only once `access` itself has been resolved.
    pub fn resolved(&self, access: FieldAccess) -> Option<&ResolvedField> {
        if self.is_resolved(access) {
            self.resolved.get()
        } else {
            None
        }
    }

    /// Publishes the payload; the first one to land wins.
    ///
    /// Puts to final fields are never marked, so each one goes back through
    /// the slow path for its access check.
    pub fn fill(&self, field: ResolvedField, access: FieldAccess) -> &ResolvedField {
        let published = self.resolved.get_or_init(|| field);
        if !(access.is_put() && published.is_final) {
            self.marker(access).store(access.opcode(), Ordering::Release);
        }
        published
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMethod {
    pub holder: ClassIdentifier,
    pub entry_point: EntryPoint,
    /// vtable index for virtual calls, itable index for interface methods
    pub table_index: Option<u32>,
    /// argument slots including the receiver
    pub parameter_size: u16,
    pub return_type: BasicType,
    pub is_static: bool,
    pub is_final: bool,
    pub is_private: bool,
    pub is_interface: bool,
}

/// Cache entry for invokevirtual/invokespecial/invokestatic/invokeinterface.
///
/// `bytecode1` records invokestatic/invokespecial, `bytecode2` records
/// invokevirtual/invokeinterface.
#[derive(Debug)]
pub struct MethodEntry {
    cp_index: CpIndex,
    resolved: OnceLock<ResolvedMethod>,
    bytecode1: AtomicU8,
    bytecode2: AtomicU8,
}

impl MethodEntry {
    pub fn new(cp_index: CpIndex) -> Self {
        Self {
            cp_index,
            resolved: OnceLock::new(),
            bytecode1: AtomicU8::new(0),
            bytecode2: AtomicU8::new(0),
        }
    }

    pub fn cp_index(&self) -> CpIndex {
        self.cp_index
    }

    fn marker(&self, kind: InvokeKind) -> &AtomicU8 {
        match kind {
            InvokeKind::Static | InvokeKind::Special => &self.bytecode1,
            InvokeKind::Virtual | InvokeKind::Interface => &self.bytecode2,
        }
    }

    pub fn is_resolved(&self, kind: InvokeKind) -> bool {
        self.marker(kind).load(Ordering::Acquire) == kind.opcode()
    }

    pub fn resolved(&self, kind: InvokeKind) -> Option<&ResolvedMethod> {
        if self.is_resolved(kind) {
            self.resolved.get()
        } else {
            None
        }
    }

    pub fn fill(&self, method: ResolvedMethod, kind: InvokeKind) -> &ResolvedMethod {
        let published = self.resolved.get_or_init(|| method);
        self.marker(kind).store(kind.opcode(), Ordering::Release);
        published
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCallSite {
    pub target: EntryPoint,
    /// argument slots of the call site descriptor
    pub parameter_size: u16,
    pub return_type: BasicType,
    pub has_appendix: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallSiteState {
    Linked(ResolvedCallSite),
    /// Bootstrapping failed; every later attempt reports the same failure.
    Failed(String),
}

/// Cache entry for one invokedynamic call site.
#[derive(Debug)]
pub struct IndyEntry {
    cp_index: CpIndex,
    bootstrap_method_index: u16,
    state: OnceLock<CallSiteState>,
}

impl IndyEntry {
    pub fn new(cp_index: CpIndex, bootstrap_method_index: u16) -> Self {
        Self {
            cp_index,
            bootstrap_method_index,
            state: OnceLock::new(),
        }
    }

    pub fn cp_index(&self) -> CpIndex {
        self.cp_index
    }

    pub fn bootstrap_method_index(&self) -> u16 {
        self.bootstrap_method_index
    }

    pub fn state(&self) -> Option<&CallSiteState> {
        self.state.get()
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state.get(), Some(CallSiteState::Linked(_)))
    }

    /// Linked call site, or the recorded bootstrap failure.
    pub fn call_site(&self) -> Result<Option<&ResolvedCallSite>> {
        match self.state.get() {
            None => Ok(None),
            Some(CallSiteState::Linked(call_site)) => Ok(Some(call_site)),
            Some(CallSiteState::Failed(message)) => bail!("{message}"),
        }
    }

    pub fn fill(&self, state: CallSiteState) -> &CallSiteState {
        self.state.get_or_init(|| state)
    }
}
