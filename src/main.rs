use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use jade_transpiler::{parse, tokenize, Compiler, CompilerOptions, Error};
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const EXTENSIONS: [&str; 2] = ["jade", "pug"];

#[derive(Parser)]
#[command(name = "jade")]
#[command(about = "Jade - compile indentation-based templates to PHP")]
struct Cli {
    /// Log compiler passes (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile .jade/.pug files to .php next to each source
    Compile {
        /// Template file or directory
        #[arg(required_unless_present = "stdin")]
        path: Option<PathBuf>,

        /// Read the template from stdin and write PHP to stdout
        #[arg(long)]
        stdin: bool,

        /// Indent the output
        #[arg(long)]
        pretty: bool,

        /// Directory searched for includes and extends (repeatable)
        #[arg(short = 'I', long = "path")]
        paths: Vec<PathBuf>,

        /// Extension tried when resolving includes (repeatable)
        #[arg(long = "ext")]
        extensions: Vec<String>,

        /// JSON file with compiler options
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the token stream
    Tokens {
        #[arg(required_unless_present = "stdin")]
        path: Option<PathBuf>,

        #[arg(long)]
        stdin: bool,

        /// Print tokens as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the parsed tree
    Ast {
        #[arg(required_unless_present = "stdin")]
        path: Option<PathBuf>,

        #[arg(long)]
        stdin: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Compile { path, stdin, pretty, paths, extensions, config } => {
            let mut options = match config {
                Some(config) => load_config(&config)?,
                None => CompilerOptions::default(),
            };
            options.paths.extend(paths);
            if !extensions.is_empty() {
                options.extensions = extensions;
            }
            if pretty {
                options.formatter.pretty = true;
            }
            let compiler = Compiler::new(options);

            if stdin {
                compile_stdin(&compiler)
            } else if let Some(path) = path {
                compile_path(&compiler, &path)
            } else {
                bail!("provide a file/directory or use --stdin")
            }
        }
        Commands::Tokens { path, stdin, json } => {
            let source = read_source(path.as_deref(), stdin)?;
            let tokens = tokenize(&source).map_err(|err| report(&err, &source, "<input>"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tokens)?);
            } else {
                for token in &tokens {
                    println!("{:>4}:{:<3} {:?}", token.position.line, token.position.offset, token.kind);
                }
            }
            Ok(())
        }
        Commands::Ast { path, stdin } => {
            let source = read_source(path.as_deref(), stdin)?;
            let document = parse(&source).map_err(|err| report(&err, &source, "<input>"))?;
            print!("{}", document.dump());
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<CompilerOptions> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
    let options = serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
    debug!(config = %path.display(), "loaded compiler options");
    Ok(options)
}

fn read_source(path: Option<&Path>, stdin: bool) -> Result<String> {
    if stdin {
        let mut source = String::new();
        io::stdin().read_to_string(&mut source).context("failed to read stdin")?;
        return Ok(source);
    }
    let Some(path) = path else {
        bail!("provide a file or use --stdin");
    };
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn compile_stdin(compiler: &Compiler) -> Result<()> {
    let source = read_source(None, true)?;
    let code = compiler.compile(&source).map_err(|err| report(&err, &source, "<stdin>"))?;
    print!("{code}");
    Ok(())
}

fn compile_path(compiler: &Compiler, path: &Path) -> Result<()> {
    if path.is_file() {
        if !is_template(path) {
            bail!("{} is not a .jade or .pug file", path.display());
        }
        let start = Instant::now();
        compile_file(compiler, path)?;
        print_summary(1, 0, start.elapsed());
        Ok(())
    } else if path.is_dir() {
        compile_directory(compiler, path)
    } else {
        bail!("{} does not exist", path.display())
    }
}

fn compile_directory(compiler: &Compiler, dir: &Path) -> Result<()> {
    let start = Instant::now();
    let mut compiled = 0;
    let mut failed = 0;

    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_template(e.path()))
    {
        match compile_file(compiler, entry.path()) {
            Ok(()) => compiled += 1,
            Err(err) => {
                debug!(path = %entry.path().display(), "{err}");
                failed += 1;
            }
        }
    }

    if compiled + failed == 0 {
        bail!("no .jade or .pug files found in {}", dir.display());
    }
    print_summary(compiled, failed, start.elapsed());
    if failed > 0 {
        bail!("{failed} of {} templates failed to compile", compiled + failed);
    }
    Ok(())
}

fn compile_file(compiler: &Compiler, path: &Path) -> Result<()> {
    let code = compiler.compile_file(path).map_err(|err| {
        let source = fs::read_to_string(path).unwrap_or_default();
        report(&err, &source, &path.display().to_string())
    })?;
    let output = path.with_extension("php");
    fs::write(&output, code).with_context(|| format!("failed to write {}", output.display()))?;
    print_generated(&output.display().to_string());
    Ok(())
}

fn is_template(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.contains(&ext))
}

/// Print a compile error with source context; the returned error carries the summary line
fn report(err: &Error, source: &str, filename: &str) -> anyhow::Error {
    if io::stderr().is_terminal() {
        eprint!("{}", err.render_color(source, filename));
    } else {
        eprint!("{}", err.render(source, filename));
    }
    anyhow::anyhow!("failed to compile {filename}")
}

fn print_generated(path: &str) {
    if io::stderr().is_terminal() {
        eprintln!("  \x1b[32m✓\x1b[0m {}", path);
    } else {
        eprintln!("  ✓ {}", path);
    }
}

fn print_summary(count: usize, failed: usize, elapsed: Duration) {
    let is_tty = io::stderr().is_terminal();
    let time_str = format_duration(elapsed);
    let files_word = if count == 1 { "file" } else { "files" };
    let failures = if failed > 0 { format!(", {failed} failed") } else { String::new() };

    if is_tty {
        eprintln!("\n\x1b[1m✨ Compiled {} {}{} in {}\x1b[0m", count, files_word, failures, time_str);
    } else {
        eprintln!("\n✨ Compiled {} {}{} in {}", count, files_word, failures, time_str);
    }
}

fn format_duration(d: Duration) -> String {
    let micros = d.as_micros();
    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{:.1}ms", micros as f64 / 1000.0)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}
