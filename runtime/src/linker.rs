use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow, bail};
use common::ClassIdentifier;
use parser::class::constant_pool::CpInfo;
use parser::class::descriptor::MethodDescriptor;
use tracing::debug;

use crate::cache::{CacheIndex, EntryPoint, ResolvedCallSite, ResolvedField, ResolvedMethod};
use crate::class::Class;
use crate::constant_pool::{DynamicRef, RefKind, SymbolicRef};
use crate::loader::ClassLoader;

/// Turns symbolic references into the payloads stored in cache entries.
///
/// Implementations may be called concurrently for the same reference and
/// must return equivalent results each time. For call sites the reference
/// is the pair of owner and cache index.
pub trait Linker: Sync {
    fn resolve_field(&self, owner: &Class, reference: &SymbolicRef) -> Result<ResolvedField>;

    fn resolve_method(&self, owner: &Class, reference: &SymbolicRef) -> Result<ResolvedMethod>;

    fn link_call_site(
        &self,
        owner: &Class,
        site: &DynamicRef,
        cache_index: CacheIndex,
    ) -> Result<ResolvedCallSite>;
}

const OBJECT: &str = "java/lang/Object";
/// Bytes before the first instance field.
pub const HEADER_SIZE: u32 = 16;
/// Call site targets live in their own range of entry points, keyed by
/// owner id and cache index.
const CALL_SITE_BASE: u64 = 1 << 63;

/// Resolves against whatever the class loader can find.
///
/// `java/lang/Object` is treated as an empty root when it is not on the
/// class path.
pub struct ClassTableLinker {
    loader: Arc<Mutex<ClassLoader>>,
}

impl ClassTableLinker {
    pub fn new(loader: Arc<Mutex<ClassLoader>>) -> Self {
        Self { loader }
    }

    fn class(&self, identifier: &ClassIdentifier) -> Result<Arc<Class>> {
        self.loader
            .lock()
            .map_err(|e| anyhow!("Lock poisoned: {e}"))?
            .load(identifier)
    }

    fn super_class(&self, class: &Class) -> Result<Option<Arc<Class>>> {
        let Some(identifier) = class.super_class() else {
            return Ok(None);
        };

        match self.class(identifier) {
            Ok(class) => Ok(Some(class)),
            Err(_) if identifier.internal_name() == OBJECT => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Superclasses of `class`, nearest first.
    fn superclasses(&self, class: &Class) -> Result<Vec<Arc<Class>>> {
        let mut seen = HashSet::from([class.identifier().clone()]);
        let mut chain: Vec<Arc<Class>> = Vec::new();
        let mut current = self.super_class(class)?;
        while let Some(super_class) = current {
            if !seen.insert(super_class.identifier().clone()) {
                bail!("ClassCircularityError: {super_class} in the superclasses of {class}");
            }
            current = self.super_class(&super_class)?;
            chain.push(super_class);
        }

        Ok(chain)
    }

    /// Every interface reachable from `pending`, nearest first.
    fn interface_closure(
        &self,
        pending: impl IntoIterator<Item = ClassIdentifier>,
    ) -> Result<Vec<Arc<Class>>> {
        let mut pending: VecDeque<_> = pending.into_iter().collect();
        let mut seen = HashSet::new();
        let mut interfaces = Vec::new();
        while let Some(identifier) = pending.pop_front() {
            if !seen.insert(identifier.clone()) {
                continue;
            }
            let interface = self.class(&identifier)?;
            pending.extend(interface.interfaces().iter().cloned());
            interfaces.push(interface);
        }

        Ok(interfaces)
    }

    /// Field lookup: the class itself, then its superinterfaces, then each
    /// superclass in turn.
    fn find_field(
        &self,
        class: Arc<Class>,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<(Arc<Class>, usize)>> {
        let superclasses = self.superclasses(&class)?;
        for class in std::iter::once(class).chain(superclasses) {
            if let Some(slot) = Self::field_slot(&class, name, descriptor) {
                return Ok(Some((class, slot)));
            }
            for interface in self.interface_closure(class.interfaces().iter().cloned())? {
                if let Some(slot) = Self::field_slot(&interface, name, descriptor) {
                    return Ok(Some((interface, slot)));
                }
            }
        }

        Ok(None)
    }

    fn field_slot(class: &Class, name: &str, descriptor: &str) -> Option<usize> {
        class
            .fields()
            .iter()
            .position(|field| field.name == name && field.descriptor == descriptor)
    }

    fn instance_start(&self, class: &Class) -> Result<u32> {
        Ok(self
            .superclasses(class)?
            .iter()
            .rev()
            .fold(HEADER_SIZE, |start, class| Self::instance_end(start, class)))
    }

    fn instance_end(start: u32, class: &Class) -> u32 {
        class
            .fields()
            .iter()
            .filter(|field| !field.is_static())
            .fold(start, |offset, field| {
                let size = field.basic_type.size();
                offset.next_multiple_of(size) + size
            })
    }

    /// Statics are laid out from 0 in the holder's static area, instance
    /// fields after the superclass's; each field is aligned to its size.
    fn field_offset(&self, holder: &Class, slot: usize) -> Result<u32> {
        let is_static = holder.fields()[slot].is_static();
        let mut offset = if is_static {
            0
        } else {
            self.instance_start(holder)?
        };

        for (index, field) in holder.fields().iter().enumerate() {
            if field.is_static() != is_static {
                continue;
            }
            let size = field.basic_type.size();
            offset = offset.next_multiple_of(size);
            if index == slot {
                return Ok(offset);
            }
            offset += size;
        }

        bail!("field slot {slot} out of range in {holder}")
    }

    /// The class and its superclasses, most derived first.
    fn find_in_class_chain(
        &self,
        class: Arc<Class>,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<(Arc<Class>, usize)>> {
        let superclasses = self.superclasses(&class)?;
        Ok(std::iter::once(class)
            .chain(superclasses)
            .find_map(|class| class.method_slot(name, descriptor).map(|slot| (class, slot))))
    }

    /// Every interface reachable from `class` and its superclasses, nearest first.
    fn superinterfaces(&self, class: &Arc<Class>) -> Result<Vec<Arc<Class>>> {
        let superclasses = self.superclasses(class)?;
        let direct: Vec<ClassIdentifier> = std::iter::once(class)
            .chain(&superclasses)
            .flat_map(|class| class.interfaces().iter().cloned())
            .collect();
        self.interface_closure(direct)
    }

    /// Default methods win over abstract declarations; private and static
    /// interface methods are never inherited.
    fn find_in_superinterfaces(
        &self,
        class: &Arc<Class>,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<(Arc<Class>, usize)>> {
        let mut abstract_match = None;
        for interface in self.superinterfaces(class)? {
            let Some(slot) = interface.method_slot(name, descriptor) else {
                continue;
            };
            let method = &interface.methods()[slot];
            if method.is_private() || method.is_static() {
                continue;
            }
            if !method.is_abstract() {
                return Ok(Some((interface, slot)));
            }
            if abstract_match.is_none() {
                abstract_match = Some((interface, slot));
            }
        }

        Ok(abstract_match)
    }

    fn resolved_method(&self, holder: &Class, slot: usize) -> Result<ResolvedMethod> {
        let method = &holder.methods()[slot];
        let descriptor = MethodDescriptor::new(method.descriptor())?;
        let receiver = usize::from(!method.is_static());
        let parameter_size = u16::try_from(descriptor.parameter_slots() + receiver)
            .with_context(|| format!("{holder}.{method} has too many parameters"))?;

        let table_index = method.is_virtual().then(|| {
            holder.methods()[..slot]
                .iter()
                .filter(|other| other.is_virtual())
                .count() as u32
        });

        Ok(ResolvedMethod {
            holder: holder.identifier().clone(),
            entry_point: EntryPoint((u64::from(holder.id().0) << 32) | slot as u64),
            table_index,
            parameter_size,
            return_type: (&descriptor.return_descriptor).into(),
            is_static: method.is_static(),
            is_final: method.is_final(),
            is_private: method.is_private(),
            is_interface: holder.is_interface(),
        })
    }
}

impl Linker for ClassTableLinker {
    fn resolve_field(&self, _owner: &Class, reference: &SymbolicRef) -> Result<ResolvedField> {
        let class = self.class(&reference.class)?;
        let Some((holder, slot)) =
            self.find_field(class, &reference.name, &reference.descriptor)?
        else {
            bail!(
                "NoSuchFieldError: {}.{}:{}",
                reference.class,
                reference.name,
                reference.descriptor
            );
        };

        let field = &holder.fields()[slot];
        Ok(ResolvedField {
            holder: holder.identifier().clone(),
            offset: self.field_offset(&holder, slot)?,
            basic_type: field.basic_type,
            is_static: field.is_static(),
            is_final: field.is_final(),
            is_volatile: field.is_volatile(),
        })
    }

    fn resolve_method(&self, _owner: &Class, reference: &SymbolicRef) -> Result<ResolvedMethod> {
        let class = self.class(&reference.class)?;
        match (reference.kind, class.is_interface()) {
            (RefKind::Method, true) => {
                bail!("IncompatibleClassChangeError: found interface {class}, but class was expected")
            }
            (RefKind::InterfaceMethod, false) => {
                bail!("IncompatibleClassChangeError: found class {class}, but interface was expected")
            }
            _ => {}
        }

        let found = match self.find_in_class_chain(class.clone(), &reference.name, &reference.descriptor)? {
            Some(found) => Some(found),
            None => self.find_in_superinterfaces(&class, &reference.name, &reference.descriptor)?,
        };
        let Some((holder, slot)) = found else {
            bail!(
                "NoSuchMethodError: {}.{}{}",
                reference.class,
                reference.name,
                reference.descriptor
            );
        };

        self.resolved_method(&holder, slot)
    }

    fn link_call_site(
        &self,
        owner: &Class,
        site: &DynamicRef,
        cache_index: CacheIndex,
    ) -> Result<ResolvedCallSite> {
        let bootstrap = owner
            .bootstrap_methods()
            .get(usize::from(site.bootstrap_method_index))
            .with_context(|| {
                format!(
                    "BootstrapMethodError: {owner} has no bootstrap method {}",
                    site.bootstrap_method_index
                )
            })?;

        match owner.constants().entry(bootstrap.method_ref.0.into())? {
            CpInfo::MethodHandle { .. } => {}
            info => bail!(
                "BootstrapMethodError: bootstrap method {} of {owner} is a {}, not a MethodHandle",
                site.bootstrap_method_index,
                info.tag_name()
            ),
        }

        let descriptor = MethodDescriptor::new(&site.descriptor)?;
        let parameter_size = u16::try_from(descriptor.parameter_slots())
            .with_context(|| format!("call site {} has too many parameters", site.name))?;
        let target = EntryPoint(
            CALL_SITE_BASE | (u64::from(owner.id().0) << 32) | u64::from(cache_index.0),
        );
        debug!("linked call site {cache_index} of {owner} as {}", site.name);

        Ok(ResolvedCallSite {
            target,
            parameter_size,
            return_type: (&descriptor.return_descriptor).into(),
            has_appendix: true,
        })
    }
}
