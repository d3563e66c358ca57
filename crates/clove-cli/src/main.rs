//! The `clove` binary: executes script files or runs a line-oriented
//! REPL when no files are given.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clove::{Object, RuntimeOptions, runtime};

#[derive(Debug, Parser)]
#[command(name = "clove", about = "A Scheme-family language runtime.", version)]
struct Cli {
    /// Source files to execute, in order.
    files: Vec<PathBuf>,

    /// Load the kernel module at boot.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    kernel: bool,

    /// Search directory for imports.
    #[arg(long)]
    module_dir: Option<PathBuf>,

    /// Disassemble scripts before executing them.
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    log_script_instrs: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    runtime::init(RuntimeOptions {
        kernel: cli.kernel,
        module_dir: cli.module_dir.clone(),
        log_script_instrs: cli.log_script_instrs,
    });

    let status = if cli.files.is_empty() {
        repl()
    } else {
        run_files(&cli.files)
    };

    runtime::teardown();
    status
}

fn run_files(files: &[PathBuf]) -> ExitCode {
    for file in files {
        let source = match std::fs::read_to_string(file) {
            Ok(source) => source,
            Err(err) => {
                eprintln!("error: cannot read {}: {err}", file.display());
                return ExitCode::FAILURE;
            }
        };
        match runtime::with_current(|rt| rt.eval(&source)) {
            Ok(result) => {
                if result.is_error() {
                    eprintln!("uncaught error: {result}");
                    return ExitCode::FAILURE;
                }
            }
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

/// Evaluate, print, loop; fatal front-end errors print a diagnostic and
/// the session continues.
fn repl() -> ExitCode {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        let _ = stdout.flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return ExitCode::SUCCESS,
            Ok(_) => {}
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        }
        if line.trim().is_empty() {
            continue;
        }
        match runtime::with_current(|rt| rt.eval(&line)) {
            Ok(Object::Null) => println!("()"),
            Ok(result) => println!("{result}"),
            Err(err) => eprintln!("error: {err}"),
        }
    }
}
