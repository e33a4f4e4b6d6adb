use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use common::ClassIdentifier;
use runtime::Vm;
use runtime::jar::Jar;
use runtime::linker::Linker;
use runtime::loader::{Directory, ReadClass};
use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::dump::Dump;

mod dump;

/// Shows how bytecode operands map to constant pool cache entries.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// path to a jar
    #[arg(long)]
    jar: Option<PathBuf>,

    /// class path directory
    #[arg(long)]
    dir: Option<PathBuf>,

    /// class to dump, e.g. com.example.Main; every class in the jar if omitted
    #[arg(long)]
    class: Vec<String>,

    /// rewrite methods and build constant pool caches
    #[arg(long)]
    link: bool,

    /// resolve every cached operand, implies --link
    #[arg(long)]
    resolve: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut sources: Vec<Box<dyn ReadClass>> = Vec::new();
    let mut identifiers = args
        .class
        .iter()
        .map(|name| ClassIdentifier::parse(name))
        .collect::<Result<Vec<_>>>()?;

    if let Some(path) = &args.jar {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let jar = Jar::new(file)?;
        if identifiers.is_empty() {
            identifiers = jar.class_identifiers()?;
        }
        sources.push(Box::new(jar));
    }
    if let Some(path) = &args.dir {
        sources.push(Box::new(Directory::new(path)));
    }

    if sources.is_empty() {
        bail!("nothing to load from, pass --jar or --dir");
    }
    if identifiers.is_empty() {
        bail!("no classes to dump, pass --class");
    }

    debug!("dumping {} classes", identifiers.len());

    let vm = Vm::new(sources);
    let linker = vm.linker();
    let resolver = args.resolve.then_some(&linker as &dyn Linker);
    let mut dump = Dump::new(BufWriter::new(io::stdout().lock()), resolver);

    for identifier in &identifiers {
        let class = if args.link || args.resolve {
            vm.link(identifier)?
        } else {
            vm.class(identifier)?
        };
        dump.class(&class)?;
    }

    dump.finish()
}
