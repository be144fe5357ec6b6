use std::{
    fs,
    io::{self, BufRead, Write},
    path::PathBuf,
    process,
};

use clap::Parser;
use tracing_subscriber::EnvFilter;
use yapl::{compile, disassemble_program, InterpretError, Vm, VmOptions};

const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;
const EX_OSERR: i32 = 71;
const EX_IOERR: i32 = 74;

/// Run a YAPL script, or start an interactive session when no script is given.
#[derive(Debug, Parser)]
#[command(name = "yapl", disable_version_flag = true)]
struct Cli {
    /// Script to run
    file: Option<PathBuf>,
    /// Print the compiled bytecode before running
    #[arg(long)]
    disassemble: bool,
    /// Print version
    #[arg(short = 'v', long = "version")]
    version: bool,
}

fn main() {
    let code = match Cli::try_parse() {
        Ok(cli) => {
            init_tracing();
            run(cli)
        }
        Err(err) => {
            let _ = err.print();
            if err.use_stderr() {
                EX_USAGE
            } else {
                0
            }
        }
    };
    process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("YAPL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> i32 {
    if cli.version {
        println!("yapl {}", env!("CARGO_PKG_VERSION"));
        return 0;
    }
    match cli.file {
        Some(path) => run_file(path, cli.disassemble),
        None => repl(),
    }
}

fn run_file(path: PathBuf, disassemble: bool) -> i32 {
    let src = match fs::read_to_string(&path) {
        Ok(src) => src,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {}", path.display(), err);
            return EX_IOERR;
        }
    };
    let options = VmOptions {
        script_name: Some(path.display().to_string()),
    };
    let mut vm = match Vm::with_options(options, Box::new(io::stdout())) {
        Ok(vm) => vm,
        Err(err) => return report(&err.into()),
    };
    let result = if disassemble {
        disassemble_and_run(&mut vm, &src)
    } else {
        vm.interpret(&src)
    };
    match result {
        Ok(()) => 0,
        Err(err) => report(&err),
    }
}

fn disassemble_and_run(vm: &mut Vm, src: &str) -> Result<(), InterpretError> {
    let function = compile(src, vm.heap_mut())?;
    if let Err(err) = disassemble_program(vm.heap(), function, io::stdout().lock()) {
        tracing::warn!(%err, "could not write disassembly");
    }
    vm.run_function(function).map(|_| ())
}

fn repl() -> i32 {
    let mut vm = match Vm::new() {
        Ok(vm) => vm,
        Err(err) => return report(&err.into()),
    };
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        if let Err(err) = io::stdout().flush() {
            eprintln!("{}", err);
            return EX_IOERR;
        }

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                return 0;
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("{}", err);
                return EX_IOERR;
            }
        }

        if let Err(err) = vm.interpret(&line) {
            let code = report(&err);
            if let InterpretError::OutOfMemory(_) = err {
                return code;
            }
        }
    }
}

fn report(err: &InterpretError) -> i32 {
    eprintln!("{}", err);
    match err {
        InterpretError::Compile(_) => EX_DATAERR,
        InterpretError::Runtime(_) => EX_SOFTWARE,
        InterpretError::OutOfMemory(_) => EX_OSERR,
    }
}
