use std::io::Write;

use anyhow::Result;
use runtime::bytecode::{BytecodeStream, RefCategory};
use runtime::cache::{CacheEntry, CallSiteState, ConstantPoolCache};
use runtime::class::Class;
use runtime::linker::Linker;
use runtime::method::Method;
use runtime::{BytecodeOperand, Resolved, resolve_from_cache};

/// Prints classes, their caches and every constant pool operand.
pub struct Dump<'a, W: Write> {
    out: W,
    linker: Option<&'a dyn Linker>,
}

impl<'a, W: Write> Dump<'a, W> {
    pub fn new(out: W, linker: Option<&'a dyn Linker>) -> Self {
        Self { out, linker }
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    pub fn class(&mut self, class: &Class) -> Result<()> {
        writeln!(
            self.out,
            "class {} (id {}, {} constant pool slots)",
            class,
            class.id().0,
            class.constants().len()
        )?;

        match class.cache() {
            Some(cache) => self.cache(class, cache)?,
            None => writeln!(self.out, "  not linked")?,
        }

        for method in class.methods() {
            self.method(class, method)?;
        }

        Ok(())
    }

    fn cache(&mut self, class: &Class, cache: &ConstantPoolCache) -> Result<()> {
        writeln!(self.out, "  cache: {} entries", cache.len())?;
        for (index, entry) in cache.entries() {
            let cp_index = entry.cp_index();
            let description = class
                .constants()
                .describe(&cp_index)
                .unwrap_or_else(|err| format!("<{err}>"));
            let state = match entry {
                CacheEntry::Indy(indy) => match indy.state() {
                    None => "",
                    Some(CallSiteState::Linked(_)) => " (linked)",
                    Some(CallSiteState::Failed(_)) => " (failed)",
                },
                _ => "",
            };
            writeln!(
                self.out,
                "    {index} {} {cp_index} {description}{state}",
                entry.kind_name()
            )?;
        }

        Ok(())
    }

    fn method(&mut self, class: &Class, method: &Method) -> Result<()> {
        writeln!(self.out, "  {method}")?;

        for instruction in BytecodeStream::new(method.code()) {
            let instruction = match instruction {
                Ok(instruction) => instruction,
                Err(err) => {
                    writeln!(self.out, "    error: {err}")?;
                    break;
                }
            };
            if RefCategory::of(instruction.opcode) == RefCategory::None {
                continue;
            }

            let operand = BytecodeOperand::at(method, instruction.bci)?;
            let cache_index = operand
                .cache_index()
                .map(|index| format!(" cache={index}"))
                .unwrap_or_default();
            let target = match operand.cp_index() {
                Ok(cp_index) => format!(
                    "cp={cp_index} {}",
                    method
                        .constants()
                        .describe(&cp_index)
                        .unwrap_or_else(|err| format!("<{err}>"))
                ),
                Err(err) => format!("error: {err}"),
            };
            writeln!(
                self.out,
                "    {:>5}: {} raw={}{cache_index} {target}",
                instruction.bci,
                instruction.name(),
                operand.raw_index()
            )?;

            let Some(linker) = self.linker else {
                continue;
            };
            if operand.category().uses_cache() {
                let resolved = match resolve_from_cache(class, method, instruction.bci, linker) {
                    Ok(resolved) => describe(&resolved),
                    Err(err) => format!("error: {err:#}"),
                };
                writeln!(self.out, "           -> {resolved}")?;
            }
        }

        Ok(())
    }
}

fn describe(resolved: &Resolved) -> String {
    match resolved {
        Resolved::Field(field) => format!(
            "{} field {}+{} {:?}{}",
            if field.is_static { "static" } else { "instance" },
            field.holder,
            field.offset,
            field.basic_type,
            if field.is_volatile { " volatile" } else { "" }
        ),
        Resolved::Method(method) => format!(
            "method {} entry {} table {} params {} returns {:?}",
            method.holder,
            method.entry_point,
            method
                .table_index
                .map(|index| index.to_string())
                .unwrap_or_else(|| "-".to_string()),
            method.parameter_size,
            method.return_type
        ),
        Resolved::CallSite(call_site) => format!(
            "call site target {} params {} returns {:?}",
            call_site.target, call_site.parameter_size, call_site.return_type
        ),
    }
}
