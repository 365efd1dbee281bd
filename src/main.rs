use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiln::diagnostic::{self, Diagnostic};
use kiln::{Compiler, Error, Options, SharedNamespace, Value};

#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Compile and run a kiln source file on the bytecode VM")]
struct Cli {
    /// Source file; `-` reads standard input
    #[arg(required_unless_present = "eval")]
    file: Option<PathBuf>,

    /// Evaluate this source text instead of a file
    #[arg(short, long, conflicts_with = "file")]
    eval: Option<String>,

    /// Print the finalized bytecode of each form before running it
    #[arg(long)]
    dump: bool,

    /// Skip the rewrite passes (finalization still runs)
    #[arg(long)]
    no_opt: bool,

    /// Disable inlining
    #[arg(long)]
    no_inline: bool,

    /// JSON file with compiler options
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Report errors as JSON on stderr
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (source, result) = run(&cli);
    match result {
        Ok(value) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            report(&e, source, cli.json);
            ExitCode::FAILURE
        }
    }
}

fn options(cli: &Cli) -> kiln::Result<Options> {
    let mut options = match &cli.config {
        Some(path) => Options::from_json(&std::fs::read_to_string(path)?)?,
        None => Options::default(),
    };
    if cli.no_opt {
        options.optimize = false;
    }
    if cli.no_inline {
        options.inline = false;
    }
    Ok(options)
}

fn load(cli: &Cli) -> kiln::Result<String> {
    if let Some(src) = &cli.eval {
        return Ok(src.clone());
    }
    match cli.file.as_deref() {
        Some(path) if path.as_os_str() == "-" => {
            let mut src = String::new();
            std::io::stdin().read_to_string(&mut src)?;
            Ok(src)
        }
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => Ok(String::new()),
    }
}

fn run(cli: &Cli) -> (Option<String>, kiln::Result<Value>) {
    let source = match load(cli) {
        Ok(source) => source,
        Err(e) => return (None, Err(e)),
    };
    let result = evaluate(cli, &source);
    (Some(source), result)
}

fn evaluate(cli: &Cli, source: &str) -> kiln::Result<Value> {
    let compiler = Compiler::with_options(SharedNamespace::shared("user"), options(cli)?);
    let forms = kiln::reader::read_all(source)?;
    let mut last = Value::Nil;
    for form in &forms {
        let closure = compiler.compile(form)?;
        if cli.dump {
            println!("{}", kiln::compiler::disassemble(&closure));
        }
        last = closure.call_limited(Vec::new(), compiler.options().max_call_depth)?;
    }
    Ok(last)
}

fn report(e: &Error, source: Option<String>, json: bool) {
    let mut d = Diagnostic::from(e);
    if let Some(source) = source {
        d = d.with_source(source);
    }
    if json {
        eprintln!("{}", diagnostic::json::render(&d));
        return;
    }
    eprintln!("error: {}", d.message);
    if let (Some(source), Some(label)) = (d.source.as_deref(), d.labels.first()) {
        let (line, col) = diagnostic::SourceMap::new(source).lookup(label.span.start);
        eprintln!("  --> {line}:{col}");
    }
    for note in &d.notes {
        eprintln!("  = note: {note}");
    }
    if let Some(suggestion) = &d.suggestion {
        eprintln!("  = help: {suggestion}");
    }
}
