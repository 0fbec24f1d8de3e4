use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{bail, IntoDiagnostic, Result};

use loom::runtime::MEMORY_SIZE;
use loom::{AsmParser, Buffer, Cpu, Linker, Listing, SourceFile, ADDRESS_SPACE};

/// Loom is an assembler, linker and emulator for the Loom-16 instruction set.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble and link source files into a single object file
    Asm {
        /// Source files or glob patterns, linked in the given order
        #[arg(required = true)]
        files: Vec<String>,
        /// Destination of the object file
        #[arg(short, long, default_value = "a.out")]
        output: PathBuf,
        /// Do not write a listing file
        #[arg(short, long)]
        skip_listing: bool,
        /// Destination of the listing, `<output>.txt` by default
        #[arg(short, long)]
        listing: Option<PathBuf>,
    },
    /// Assemble and link without writing anything
    Check {
        /// Source files or glob patterns
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Run an object file, or assemble and run source files
    Run {
        /// Object file, or source files ending in `.s` or `.asm`
        #[arg(required = true)]
        files: Vec<String>,
        /// Emulator memory size in bytes
        #[arg(long, default_value_t = MEMORY_SIZE)]
        memory: usize,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Print the instructions of an object file
    Disasm {
        /// Object file to decode
        name: PathBuf,
    },
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    loom::env::init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(loom::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    let Some(command) = args.command else {
        println!("\n~ loom v{VERSION} ~");
        println!("{}", LOGO.truecolor(120, 170, 220).bold());
        println!("{SHORT_INFO}");
        return Ok(());
    };

    match command {
        Command::Asm {
            files,
            output,
            skip_listing,
            listing,
        } => {
            let mut sources = parse_sources(&expand(&files)?, false)?;
            let object = link(&mut sources, false)?;

            if !skip_listing {
                let listing = listing.unwrap_or_else(|| {
                    let mut name = output.clone().into_os_string();
                    name.push(".txt");
                    name.into()
                });
                fs::write(&listing, Listing::new(&sources, &object).to_string())
                    .into_diagnostic()?;
                file_message(Green, "Listing", &listing);
            }

            fs::write(&output, &object).into_diagnostic()?;
            file_message(Green, "Saved", &output);
            Ok(())
        }
        Command::Check { files } => {
            let mut sources = parse_sources(&expand(&files)?, false)?;
            link(&mut sources, false)?;
            message(Green, "Success", "no errors found!");
            Ok(())
        }
        Command::Run {
            files,
            memory,
            minimal,
        } => {
            if memory == 0 || memory > ADDRESS_SPACE {
                bail!("Memory size must be between 1 and {ADDRESS_SPACE} bytes");
            }
            let paths = expand(&files)?;
            let object = match paths.as_slice() {
                [path] if !is_source(path) => {
                    if !minimal {
                        file_message(Green, "Loading", path);
                    }
                    fs::read(path).into_diagnostic()?
                }
                _ => {
                    let mut sources = parse_sources(&paths, minimal)?;
                    link(&mut sources, minimal)?
                }
            };
            run(&object, memory, minimal)
        }
        Command::Disasm { name } => {
            let bytes = fs::read(&name).into_diagnostic()?;
            let buf = Buffer::from_bytes(&bytes)?;
            for (pos, decoded) in loom::disassemble(&buf) {
                println!("{pos:#06x}: {decoded}");
            }
            Ok(())
        }
    }
}

enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message(color: MsgColor, left: &str, right: &str) {
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "s" || ext == "asm")
}

/// Expand glob patterns in order. A pattern without matches is kept as a
/// plain path so that reading it reports the missing file.
fn expand(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let mut matched = glob::glob(pattern)
            .into_diagnostic()?
            .collect::<Result<Vec<_>, _>>()
            .into_diagnostic()?;
        if matched.is_empty() {
            paths.push(PathBuf::from(pattern));
        } else {
            matched.sort();
            paths.append(&mut matched);
        }
    }
    Ok(paths)
}

/// Parse every file before anything is assembled. Syntax errors of all files
/// are reported together.
fn parse_sources(paths: &[PathBuf], minimal: bool) -> Result<Vec<SourceFile>> {
    let mut sources = Vec::with_capacity(paths.len());
    let mut failed = 0;
    for path in paths {
        if !minimal {
            file_message(MsgColor::Green, "Parsing", path);
        }
        let contents = fs::read_to_string(path).into_diagnostic()?;
        match AsmParser::new(path.display().to_string(), &contents).parse() {
            Ok(file) => sources.push(file),
            Err(reports) => {
                failed += 1;
                for report in reports {
                    eprintln!("{report:?}");
                }
            }
        }
    }
    if failed > 0 {
        bail!("{failed} file(s) contain syntax errors");
    }
    Ok(sources)
}

/// Assemble the parsed files in order and link them into one image.
fn link(sources: &mut [SourceFile], minimal: bool) -> Result<Vec<u8>> {
    let mut linker = Linker::new();
    for file in sources.iter_mut() {
        if !minimal {
            message(MsgColor::Green, "Assembling", &file.name);
        }
        match linker.assemble(file) {
            Ok(count) if !minimal => {
                let line = format!("{} exporting {count} symbols", file.name);
                message(MsgColor::Cyan, "Exporting", &line);
            }
            Ok(_) => {}
            Err(errors) => {
                message(MsgColor::Red, "Failed", &file.name);
                for err in errors {
                    eprintln!("{err}");
                }
            }
        }
    }
    if !minimal {
        message(MsgColor::Green, "Linking", &format!("{} file(s)", sources.len()));
    }
    Ok(linker.link()?)
}

fn run(object: &[u8], memory: usize, minimal: bool) -> Result<()> {
    let mut cpu = Cpu::with_memory(loom::StdConsole, memory);
    cpu.load(object)?;

    if !minimal {
        message(MsgColor::Green, "Running", &format!("{} byte image", object.len()));
    }
    let trace = loom::env::is_trace_enabled();
    let outcome = loop {
        if trace {
            let iep = cpu.iep();
            match loom::decode(cpu.memory().bytes(), iep) {
                Ok(decoded) => eprintln!("{iep:#06x}: {decoded}"),
                Err(_) => eprintln!("{iep:#06x}: ??"),
            }
        }
        match cpu.execute() {
            Ok(true) => {}
            Ok(false) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    match outcome {
        Ok(()) => {
            println!("Program properly finished executing");
            println!("{cpu}");
            if !minimal {
                message(MsgColor::Green, "Finished", "program halted");
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("{cpu}");
            message(MsgColor::Red, "Failed", "program faulted");
            Err(err.into())
        }
    }
}

const LOGO: &str = r#"
 _
| | ___   ___  _ __ ___
| |/ _ \ / _ \| '_ ` _ \
| | (_) | (_) | | | | | |
|_|\___/ \___/|_| |_| |_|"#;

const SHORT_INFO: &str = r"
Welcome to loom, an assembler, linker and emulator for the Loom-16
instruction set: 15 general registers, 16-bit words and a flat 64K memory.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
