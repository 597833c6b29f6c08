use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aurora::diagnostic::{Diagnostic, Stage, ansi::AnsiRenderer, json, registry};
use aurora::{StepResult, Value, Vm, VmConfig};

#[derive(Parser)]
#[command(name = "aurora", version, about = "Run and inspect Aurora programs")]
struct Cli {
    /// Log more: -v for calls and returns, -vv for every instruction
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile and run a program
    Run {
        file: PathBuf,
        /// Stop with an error after this many instructions
        #[arg(long)]
        max_steps: Option<u64>,
        /// Frames allowed on the call stack at once
        #[arg(long)]
        max_depth: Option<usize>,
        /// Report errors as JSON on stderr
        #[arg(long)]
        json: bool,
        /// Print every global after the run
        #[arg(long)]
        globals: bool,
    },
    /// Print the bytecode of a program
    Disasm { file: PathBuf },
    /// Print the parsed syntax tree as JSON
    Ast { file: PathBuf },
    /// Explain an error code, e.g. AUR-R003
    Explain { code: String },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("AURORA_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

fn read_source(path: &Path) -> Result<String, ExitCode> {
    std::fs::read_to_string(path).map_err(|e| {
        eprintln!("error: cannot read {}: {}", path.display(), e);
        ExitCode::from(2)
    })
}

struct Reporter {
    json: bool,
    source: String,
}

impl Reporter {
    fn report(&self, d: Diagnostic) -> ExitCode {
        if self.json {
            eprintln!("{}", json::render(&d));
        } else {
            let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
            eprint!("{}", renderer.render(&d.with_source(self.source.clone())));
        }
        ExitCode::from(1)
    }
}

fn run(file: &Path, max_steps: Option<u64>, max_depth: Option<usize>, json: bool, globals: bool) -> ExitCode {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let reporter = Reporter { json, source };

    let program = match aurora::compile_source(&reporter.source) {
        Ok(p) => p,
        Err(e) => return reporter.report(Diagnostic::from(&e)),
    };

    let mut config = VmConfig::default();
    if let Some(depth) = max_depth {
        config.max_call_depth = depth;
    }
    let mut vm = Vm::with_config(&program, config);

    let outcome = match max_steps {
        None => vm.run(),
        Some(limit) => loop {
            if vm.steps() >= limit {
                let d = Diagnostic::error(Stage::Runtime, format!("step limit of {} reached", limit))
                    .with_note("raise it with --max-steps");
                return reporter.report(d);
            }
            match vm.step() {
                StepResult::Continue => {}
                StepResult::Finished(value) => break Ok(value),
                StepResult::Failed(err) => break Err(err),
            }
        },
    };

    match outcome {
        Ok(value) => {
            if !matches!(value, Value::Nil) {
                println!("{}", value);
            }
            if globals {
                for (name, value) in vm.globals() {
                    println!("{} = {}", name, value);
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => reporter.report(Diagnostic::from(&e)),
    }
}

fn disasm(file: &Path) -> ExitCode {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match aurora::compile_source(&source) {
        Ok(program) => {
            print!("{}", aurora::bytecode::disasm::disassemble(&program.main));
            ExitCode::SUCCESS
        }
        Err(e) => Reporter { json: false, source }.report(Diagnostic::from(&e)),
    }
}

fn ast(file: &Path) -> ExitCode {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let program = match aurora::parse_source(&source) {
        Ok(p) => p,
        Err(e) => return Reporter { json: false, source }.report(Diagnostic::from(&e)),
    };
    match serde_json::to_string_pretty(&program) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: serialization failed: {}", e);
            ExitCode::from(2)
        }
    }
}

fn explain(code: &str) -> ExitCode {
    match registry::lookup(code) {
        Some(entry) => {
            print!("{}", entry.long);
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("error: unknown error code `{}`", code);
            ExitCode::from(2)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run { file, max_steps, max_depth, json, globals } => run(&file, max_steps, max_depth, json, globals),
        Command::Disasm { file } => disasm(&file),
        Command::Ast { file } => ast(&file),
        Command::Explain { code } => explain(&code),
    }
}
