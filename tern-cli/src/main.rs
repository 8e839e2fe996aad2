use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tern_core::services::CompletionItemKind;
use tern_core::{
    CompilerOptions, CoreError, LanguageServices, ModuleReference, OptimizerConfig, Position,
    check_sources, discover_sources, format_source, source_map,
};
use tern_host::{HostConfig, RunOutcome, run_wasm_with};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tern", version, about = "Compiler for the Tern language", long_about = None)]
struct Cli {
    #[arg(short, long, global = true, help = "Log compiler stages to stderr")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse and type check a project, printing every diagnostic.
    Check {
        #[arg(value_name = "PATH", default_value = ".")]
        input: PathBuf,
    },
    /// Compile a project to wasm, assembly or an IR dump.
    Compile {
        #[arg(value_name = "PATH", default_value = ".")]
        input: PathBuf,

        #[arg(short, long, value_name = "FILE", help = "Output file (text formats default to stdout)")]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = Emit::Wasm)]
        emit: Emit,

        #[arg(long, help = "Skip the MIR optimizer")]
        no_opt: bool,

        #[arg(long, value_name = "N", help = "Largest callee the inliner copies")]
        inline_budget: Option<usize>,

        #[arg(long, value_name = "N", help = "Upper bound on optimizer rounds")]
        max_iterations: Option<usize>,

        #[arg(long, help = "Run the program after compiling it to wasm")]
        run: bool,
    },
    /// Answer editor queries read line by line from stdin.
    Lsp {
        #[arg(value_name = "ROOT", help = "Project whose sources are opened up front")]
        root: Option<PathBuf>,
    },
    /// Print the toolchain version.
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    Wasm,
    Asm,
    Mir,
    Hir,
}

fn main() -> Result<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) if error.kind() == clap::error::ErrorKind::InvalidSubcommand => {
            Cli::command().print_help()?;
            return Ok(ExitCode::SUCCESS);
        }
        Err(error) => error.exit(),
    };
    init_logging(cli.verbose);
    execute(cli)
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn execute(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        None => {
            Cli::command().print_help()?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Version) => {
            println!("tern {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Check { input }) => check(&input),
        Some(Command::Compile {
            input,
            output,
            emit,
            no_opt,
            inline_budget,
            max_iterations,
            run,
        }) => {
            let mut optimizer = OptimizerConfig::default();
            if let Some(budget) = inline_budget {
                optimizer.inline_budget = budget;
            }
            if let Some(iterations) = max_iterations {
                optimizer.max_iterations = iterations;
            }
            let options = CompilerOptions {
                optimize: !no_opt,
                optimizer,
            };
            compile(&input, output.as_deref(), emit, &options, run)
        }
        Some(Command::Lsp { root }) => {
            let mut services = LanguageServices::new();
            if let Some(root) = root {
                for (module, source) in load_sources(&root)? {
                    services.update(module, source);
                }
            }
            let stdin = io::stdin();
            serve(&mut services, stdin.lock(), io::stdout().lock())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// A directory is a project root; a single file is the root module.
fn load_sources(input: &Path) -> Result<BTreeMap<ModuleReference, String>> {
    if input.is_file() {
        let source = fs::read_to_string(input)
            .with_context(|| format!("failed to read input file {}", input.display()))?;
        return Ok(BTreeMap::from([(ModuleReference::root(), source)]));
    }
    let files = discover_sources(input)
        .with_context(|| format!("failed to read sources under {}", input.display()))?;
    if files.is_empty() {
        bail!("no .tern sources found under {}", input.display());
    }
    Ok(source_map(files))
}

fn check(input: &Path) -> Result<ExitCode> {
    let sources = load_sources(input)?;
    let output = check_sources(&sources);
    if output.diagnostics.is_empty() {
        println!("{} module(s) checked, no problems", sources.len());
        return Ok(ExitCode::SUCCESS);
    }
    eprint!("{}", output.diagnostics);
    eprintln!("{} problem(s) found", output.diagnostics.len());
    Ok(ExitCode::FAILURE)
}

fn compile(
    input: &Path,
    output: Option<&Path>,
    emit: Emit,
    options: &CompilerOptions,
    run: bool,
) -> Result<ExitCode> {
    let sources = load_sources(input)?;
    let artifact = match tern_core::compile(&sources, options) {
        Ok(artifact) => artifact,
        Err(CoreError::Diagnostics(diagnostics)) => {
            eprint!("{diagnostics}");
            eprintln!("{} problem(s) found", diagnostics.len());
            return Ok(ExitCode::FAILURE);
        }
        Err(error) => return Err(error).context("compilation failed"),
    };

    match emit {
        Emit::Wasm => {
            let path = output.unwrap_or(Path::new("out.wasm"));
            write_output(path, &artifact.wasm)?;
        }
        Emit::Asm => emit_text(output, &artifact.assembly)?,
        Emit::Mir => emit_text(output, &artifact.mir.to_string())?,
        Emit::Hir => emit_text(output, &artifact.hir.to_string())?,
    }

    if !run {
        return Ok(ExitCode::SUCCESS);
    }
    if emit != Emit::Wasm {
        eprintln!("--run is ignored for non-wasm outputs");
        return Ok(ExitCode::SUCCESS);
    }
    let result = run_wasm_with(&artifact.wasm, HostConfig::default())
        .context("failed to execute main")?;
    print!("{}", result.stdout);
    match result.outcome {
        RunOutcome::Returned(value) => {
            println!("Program exited with {value}");
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Panicked(message) => {
            eprintln!("panic: {message}");
            Ok(ExitCode::FAILURE)
        }
        RunOutcome::OutOfFuel => {
            eprintln!("program ran out of fuel");
            Ok(ExitCode::FAILURE)
        }
        RunOutcome::StackOverflow => {
            eprintln!("stack overflow");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn emit_text(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => write_output(path, text.as_bytes()),
        None => {
            io::stdout().write_all(text.as_bytes())?;
            Ok(())
        }
    }
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}

/// Request loop of `tern lsp`.
///
/// One request per line, words separated by spaces; positions are
/// 1-indexed `line col`. Every response ends with a line holding `.`.
///
/// ```text
/// open <module> <file>
/// close <module>
/// errors <module>
/// type <module> <line> <col>
/// definition <module> <line> <col>
/// complete <module> <line> <col>
/// format <file>
/// ```
///
/// The root module is written `.`.
fn serve(services: &mut LanguageServices, input: impl BufRead, mut output: impl Write) -> Result<()> {
    for line in input.lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&request, arguments)) = words.split_first() else {
            continue;
        };
        if request == "exit" {
            break;
        }
        match respond(services, request, arguments) {
            Ok(lines) => {
                for response in lines {
                    writeln!(output, "{response}")?;
                }
            }
            Err(error) => writeln!(output, "error: {error:#}")?,
        }
        writeln!(output, ".")?;
        output.flush()?;
    }
    Ok(())
}

fn respond(services: &mut LanguageServices, request: &str, arguments: &[&str]) -> Result<Vec<String>> {
    match (request, arguments) {
        ("open", [module, file]) => {
            let source = fs::read_to_string(file).with_context(|| format!("failed to read {file}"))?;
            services.update(module_argument(module), source);
            Ok(Vec::new())
        }
        ("close", [module]) => {
            services.remove(&module_argument(module));
            Ok(Vec::new())
        }
        ("errors", [module]) => Ok(services
            .get_errors(&module_argument(module))
            .iter()
            .map(ToString::to_string)
            .collect()),
        ("type", [module, line, col]) => {
            let position = position_argument(line, col)?;
            Ok(services
                .query_type(&module_argument(module), position)
                .map(|query| format!("{} {}", query.location, query.hover))
                .into_iter()
                .collect())
        }
        ("definition", [module, line, col]) => {
            let position = position_argument(line, col)?;
            Ok(services
                .query_definition(&module_argument(module), position)
                .map(|definition| format!("{}:{}", definition.module.to_path(), definition.location))
                .into_iter()
                .collect())
        }
        ("complete", [module, line, col]) => {
            let position = position_argument(line, col)?;
            Ok(services
                .autocomplete(&module_argument(module), position)
                .into_iter()
                .map(|item| {
                    let kind = match item.kind {
                        CompletionItemKind::Method => "method",
                        CompletionItemKind::Function => "function",
                        CompletionItemKind::Field => "field",
                    };
                    format!("{}\t{}\t{kind}\t{}", item.label, item.insert_text, item.detail)
                })
                .collect())
        }
        ("format", [file]) => {
            let source = fs::read_to_string(file).with_context(|| format!("failed to read {file}"))?;
            Ok(format_source(&source).lines().map(str::to_string).collect())
        }
        _ => bail!("malformed request `{request}` with {} argument(s)", arguments.len()),
    }
}

fn module_argument(text: &str) -> ModuleReference {
    if text == "." {
        ModuleReference::root()
    } else {
        ModuleReference::from_dotted(text)
    }
}

fn position_argument(line: &str, col: &str) -> Result<Position> {
    let line: u32 = line.parse().with_context(|| format!("invalid line `{line}`"))?;
    let col: u32 = col.parse().with_context(|| format!("invalid column `{col}`"))?;
    if line == 0 || col == 0 {
        bail!("positions are 1-indexed");
    }
    Ok(Position::new(line - 1, col - 1))
}
