use anyhow::{Result, bail};
use tracing::{debug, instrument, trace};

use crate::bytecode::{InvokeKind, RefCategory};
use crate::cache::{CallSiteState, ResolvedCallSite, ResolvedField, ResolvedMethod};
use crate::class::Class;
use crate::error::ConsistencyError;
use crate::linker::Linker;
use crate::method::Method;
use crate::resolver::BytecodeOperand;

/// What a cache-using instruction resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Field(ResolvedField),
    Method(ResolvedMethod),
    CallSite(ResolvedCallSite),
}

/// Slow path for the instruction at `bci` of a prepared method.
///
/// Returns the cached payload when the entry is already resolved for this
/// bytecode; otherwise resolves through `linker`, checks the result against
/// the instruction and publishes it. Linkage errors leave field and method
/// entries unresolved. A failed call site stays failed.
#[instrument(level = "debug", skip_all, fields(class = %class, method = %method, bci = bci))]
pub fn resolve_from_cache(
    class: &Class,
    method: &Method,
    bci: usize,
    linker: &dyn Linker,
) -> Result<Resolved> {
    let operand = BytecodeOperand::at(method, bci)?;
    let Some(cache) = method.cache() else {
        bail!(ConsistencyError::Unprepared {
            method: format!("{class}.{method}"),
        });
    };
    let Some(cache_index) = operand.cache_index() else {
        bail!(ConsistencyError::NotCached {
            name: operand.name(),
            bci,
        });
    };

    match operand.category() {
        RefCategory::Field(access) => {
            let entry = cache.field_entry_at(cache_index)?;
            if let Some(field) = entry.resolved(access) {
                return Ok(Resolved::Field(field.clone()));
            }

            let reference = method.constants().symbolic_ref(&operand.cp_index()?)?;
            let field = linker.resolve_field(class, &reference)?;
            if field.is_static != access.is_static() {
                bail!(
                    "IncompatibleClassChangeError: expected {} field {}.{}",
                    if access.is_static() { "static" } else { "non-static" },
                    reference.class,
                    reference.name
                );
            }
            if access.is_put() && field.is_final {
                let initializer = if access.is_static() { "<clinit>" } else { "<init>" };
                if field.holder != *class.identifier() || method.name() != initializer {
                    bail!(
                        "IllegalAccessError: update to final field {}.{} attempted from {class}.{method}",
                        reference.class,
                        reference.name
                    );
                }
            }

            trace!("resolved {} at {cache_index}", operand.name());
            Ok(Resolved::Field(entry.fill(field, access).clone()))
        }
        RefCategory::Invoke(kind) => {
            let entry = cache.method_entry_at(cache_index)?;
            if let Some(resolved) = entry.resolved(kind) {
                return Ok(Resolved::Method(resolved.clone()));
            }

            let reference = method.constants().symbolic_ref(&operand.cp_index()?)?;
            let resolved = linker.resolve_method(class, &reference)?;
            let expects_static = kind == InvokeKind::Static;
            if resolved.is_static != expects_static {
                bail!(
                    "IncompatibleClassChangeError: expected {} method {}.{}{}",
                    if expects_static { "static" } else { "non-static" },
                    reference.class,
                    reference.name,
                    reference.descriptor
                );
            }

            trace!("resolved {} at {cache_index}", operand.name());
            Ok(Resolved::Method(entry.fill(resolved, kind).clone()))
        }
        RefCategory::InvokeDynamic => {
            let entry = cache.indy_entry_at(cache_index)?;
            if let Some(call_site) = entry.call_site()? {
                return Ok(Resolved::CallSite(call_site.clone()));
            }

            let site = method.constants().dynamic_ref(&operand.cp_index()?)?;
            let state = match linker.link_call_site(class, &site, cache_index) {
                Ok(call_site) => CallSiteState::Linked(call_site),
                Err(err) => {
                    debug!("bootstrap of call site {cache_index} failed: {err:#}");
                    CallSiteState::Failed(format!("{err:#}"))
                }
            };

            // whichever outcome was published first is the one every caller sees
            entry.fill(state);
            match entry.call_site()? {
                Some(call_site) => Ok(Resolved::CallSite(call_site.clone())),
                None => bail!("call site {cache_index} has no state after linking"),
            }
        }
        RefCategory::Constant | RefCategory::None => bail!(ConsistencyError::NotCached {
            name: operand.name(),
            bci,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use parser::class::constant_pool::CpIndex;

    use super::*;
    use crate::bytecode::*;
    use crate::cache::{BasicType, CacheIndex, EntryPoint};
    use crate::class::ClassId;
    use crate::constant_pool::{DynamicRef, SymbolicRef};
    use crate::testing::ClassBuilder;

    /// Answers from the reference's name alone and counts its calls.
    #[derive(Default)]
    struct FakeLinker {
        fail_call_sites: bool,
        fields: AtomicUsize,
        methods: AtomicUsize,
        call_sites: AtomicUsize,
    }

    impl Linker for FakeLinker {
        fn resolve_field(&self, _owner: &Class, reference: &SymbolicRef) -> Result<ResolvedField> {
            self.fields.fetch_add(1, Ordering::SeqCst);
            let is_static = reference.name == "LIMIT";
            Ok(ResolvedField {
                holder: reference.class.clone(),
                offset: if is_static { 0 } else { 16 },
                basic_type: BasicType::Int,
                is_static,
                is_final: is_static,
                is_volatile: false,
            })
        }

        fn resolve_method(&self, _owner: &Class, reference: &SymbolicRef) -> Result<ResolvedMethod> {
            self.methods.fetch_add(1, Ordering::SeqCst);
            Ok(ResolvedMethod {
                holder: reference.class.clone(),
                entry_point: EntryPoint(0x1_0000_0001),
                table_index: Some(0),
                parameter_size: 1,
                return_type: BasicType::Void,
                is_static: false,
                is_final: false,
                is_private: false,
                is_interface: false,
            })
        }

        fn link_call_site(
            &self,
            _owner: &Class,
            site: &DynamicRef,
            cache_index: CacheIndex,
        ) -> Result<ResolvedCallSite> {
            let calls = self.call_sites.fetch_add(1, Ordering::SeqCst);
            if self.fail_call_sites {
                return Err(anyhow!("BootstrapMethodError: boom #{calls} in {}", site.name));
            }
            Ok(ResolvedCallSite {
                target: EntryPoint(u64::from(cache_index.0)),
                parameter_size: 0,
                return_type: BasicType::Object,
                has_appendix: true,
            })
        }
    }

    fn op(opcode: u8, index: CpIndex) -> Vec<u8> {
        let [high, low] = index.0.to_be_bytes();
        vec![opcode, high, low]
    }

    /// bci: 0 getfield count, 3 putstatic LIMIT, 6 getstatic count,
    /// 9 invokevirtual run, 12 invokespecial run, 15 invokestatic run,
    /// 18 and 23 invokedynamic, 28 ldc, 30 return
    fn main_class() -> Class {
        let mut builder = ClassBuilder::new("t/Main");
        builder.field(0x0000, "count", "I").field(0x0018, "LIMIT", "I");
        let count = builder.pool.field_ref("t/Main", "count", "I");
        let limit = builder.pool.field_ref("t/Main", "LIMIT", "I");
        let run = builder.pool.method_ref("t/Main", "run", "()V");
        let handle = builder.pool.static_method_handle(
            "t/Boot",
            "bootstrap",
            "()Ljava/lang/invoke/CallSite;",
        );
        let bootstrap = builder.bootstrap_method(handle, Vec::new());
        let indy = builder
            .pool
            .invoke_dynamic(bootstrap, "get", "()Ljava/lang/Object;");
        let hello = builder.pool.string("hello");

        let call_site = [op(INVOKEDYNAMIC, indy), vec![0, 0]].concat();
        let run_code = [
            op(GETFIELD, count),
            op(PUTSTATIC, limit),
            op(GETSTATIC, count),
            op(INVOKEVIRTUAL, run),
            op(INVOKESPECIAL, run),
            op(INVOKESTATIC, run),
            call_site.clone(),
            call_site,
            vec![LDC, hello.0 as u8, RETURN],
        ]
        .concat();

        builder
            .method(0x0001, "run", "()V", run_code)
            .method(0x0008, "<clinit>", "()V", [op(PUTSTATIC, limit), vec![RETURN]].concat());
        let class = builder.build(ClassId(1));
        class.link().unwrap();
        class
    }

    #[test]
    fn field_resolution_is_cached() {
        let class = main_class();
        let run = class.method("run", "()V").unwrap();
        let linker = FakeLinker::default();

        let first = resolve_from_cache(&class, run, 0, &linker).unwrap();
        let second = resolve_from_cache(&class, run, 0, &linker).unwrap();
        assert_eq!(first, second);
        assert_eq!(linker.fields.load(Ordering::SeqCst), 1);

        let Resolved::Field(field) = &first else {
            panic!("expected a field, got {first:?}");
        };
        assert_eq!(field.offset, 16);
        assert_eq!(field.holder.internal_name(), "t/Main");
    }

    #[test]
    fn static_mismatch_leaves_entry_unresolved() {
        let class = main_class();
        let run = class.method("run", "()V").unwrap();
        let linker = FakeLinker::default();

        let err = resolve_from_cache(&class, run, 6, &linker).unwrap_err();
        assert!(err.to_string().starts_with("IncompatibleClassChangeError"));

        let index = BytecodeOperand::at(run, 6).unwrap().cache_index().unwrap();
        let entry = run.cache().unwrap().field_entry_at(index).unwrap();
        assert!(!entry.is_resolved(FieldAccess::GetStatic));
        assert!(!entry.is_resolved(FieldAccess::GetField));
    }

    #[test]
    fn final_puts_are_never_marked() {
        let class = main_class();
        let clinit = class.method("<clinit>", "()V").unwrap();
        let linker = FakeLinker::default();

        resolve_from_cache(&class, clinit, 0, &linker).unwrap();
        resolve_from_cache(&class, clinit, 0, &linker).unwrap();
        assert_eq!(linker.fields.load(Ordering::SeqCst), 2);

        let index = BytecodeOperand::at(clinit, 0).unwrap().cache_index().unwrap();
        let entry = clinit.cache().unwrap().field_entry_at(index).unwrap();
        assert!(!entry.is_resolved(FieldAccess::PutStatic));

        let run = class.method("run", "()V").unwrap();
        let err = resolve_from_cache(&class, run, 3, &linker).unwrap_err();
        assert!(err.to_string().starts_with("IllegalAccessError"));
    }

    #[test]
    fn invoke_markers_are_per_bytecode() {
        let class = main_class();
        let run = class.method("run", "()V").unwrap();
        let linker = FakeLinker::default();

        resolve_from_cache(&class, run, 9, &linker).unwrap();
        resolve_from_cache(&class, run, 9, &linker).unwrap();
        assert_eq!(linker.methods.load(Ordering::SeqCst), 1);

        // same entry, other marker
        let special = resolve_from_cache(&class, run, 12, &linker).unwrap();
        assert_eq!(linker.methods.load(Ordering::SeqCst), 2);
        assert!(matches!(special, Resolved::Method(ref m) if m.table_index == Some(0)));

        let index = BytecodeOperand::at(run, 9).unwrap().cache_index().unwrap();
        let entry = run.cache().unwrap().method_entry_at(index).unwrap();
        assert!(entry.is_resolved(InvokeKind::Virtual));
        assert!(entry.is_resolved(InvokeKind::Special));
        assert!(!entry.is_resolved(InvokeKind::Static));

        let err = resolve_from_cache(&class, run, 15, &linker).unwrap_err();
        assert!(err.to_string().starts_with("IncompatibleClassChangeError"));
    }

    #[test]
    fn call_sites_link_separately() {
        let class = main_class();
        let run = class.method("run", "()V").unwrap();
        let linker = FakeLinker::default();

        let first = resolve_from_cache(&class, run, 18, &linker).unwrap();
        let second = resolve_from_cache(&class, run, 23, &linker).unwrap();
        assert_ne!(first, second);
        assert_eq!(resolve_from_cache(&class, run, 18, &linker).unwrap(), first);
        assert_eq!(linker.call_sites.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_call_site_is_sticky() {
        let class = main_class();
        let run = class.method("run", "()V").unwrap();
        let linker = FakeLinker {
            fail_call_sites: true,
            ..FakeLinker::default()
        };

        let first = resolve_from_cache(&class, run, 18, &linker).unwrap_err();
        let again = resolve_from_cache(&class, run, 18, &linker).unwrap_err();
        assert_eq!(first.to_string(), "BootstrapMethodError: boom #0 in get");
        assert_eq!(again.to_string(), first.to_string());
        assert_eq!(linker.call_sites.load(Ordering::SeqCst), 1);

        // the other site bootstraps on its own
        let other = resolve_from_cache(&class, run, 23, &linker).unwrap_err();
        assert_eq!(other.to_string(), "BootstrapMethodError: boom #1 in get");
    }

    #[test]
    fn not_cached_and_unprepared() {
        let class = main_class();
        let run = class.method("run", "()V").unwrap();
        let linker = FakeLinker::default();

        let err = resolve_from_cache(&class, run, 28, &linker).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConsistencyError>(),
            Some(&ConsistencyError::NotCached { name: "ldc", bci: 28 })
        );

        let mut builder = ClassBuilder::new("t/Raw");
        let count = builder.pool.field_ref("t/Raw", "count", "I");
        builder.method(0x0001, "run", "()V", op(GETFIELD, count));
        let raw = builder.build(ClassId(2));
        let err = resolve_from_cache(&raw, raw.method("run", "()V").unwrap(), 0, &linker)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConsistencyError>(),
            Some(ConsistencyError::Unprepared { .. })
        ));
    }

    #[test]
    fn concurrent_resolution_converges() {
        let class = main_class();
        let run = class.method("run", "()V").unwrap();
        let linker = FakeLinker::default();

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        (
                            resolve_from_cache(&class, run, 0, &linker).unwrap(),
                            resolve_from_cache(&class, run, 9, &linker).unwrap(),
                            resolve_from_cache(&class, run, 18, &linker).unwrap(),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(results.iter().all(|result| *result == results[0]));
        let index = BytecodeOperand::at(run, 18).unwrap().cache_index().unwrap();
        assert!(run.cache().unwrap().indy_entry_at(index).unwrap().is_resolved());
    }
}
