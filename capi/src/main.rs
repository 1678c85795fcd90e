use clap::Parser as ClapParser;
use std::{path::PathBuf, process, sync::Arc};

use capi::{BridgeCreateInfo, CallCounter, Environment, VM, exports, load_extension};
use log::trace;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Shared library of the extension to load
    #[arg(long, help = "Path to the extension's shared library")]
    library: PathBuf,

    /// Init function to run instead of Init_<stem>
    #[arg(long, help = "Name of the extension's init function")]
    init: Option<String>,

    /// Count calls into native code and print them on exit
    #[arg(long, help = "Report native calls per method")]
    profile: bool,

    #[arg(long, help = "Initial capacity of the handle table")]
    handle_capacity: Option<usize>,

    #[arg(long, help = "Invalidated handles tolerated before a sweep")]
    sweep_threshold: Option<usize>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    for (name, addr) in exports::exported_symbols() {
        trace!("exporting {name} at {addr:?}");
    }

    let vm = VM::new(BridgeCreateInfo {
        handle_capacity: cli.handle_capacity,
        sweep_threshold: cli.sweep_threshold,
        profiling: Some(cli.profile),
    });
    let counter = Arc::new(CallCounter::new());
    if cli.profile {
        vm.set_profiler(Some(counter.clone()));
    }

    let env = Environment::init_thread(&vm);
    if let Err(err) = load_extension(&env, &cli.library, cli.init.as_deref()) {
        eprintln!("Error loading {}: {}", cli.library.display(), err);
        process::exit(1);
    }

    let shared = vm.shared();
    println!("handles: {} live, {} pending sweep", shared.handles.len(), shared.handles.pending());
    println!("heap objects: {}", shared.heap.len());
    println!("methods defined: {}", shared.methods.len());

    if cli.profile {
        for (name, calls) in counter.report() {
            println!("{calls:>8}  {name}");
        }
    }

    Environment::shutdown_thread();
}
