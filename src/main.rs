use std::error::Error;
use std::fs::{self, File};
use std::io::{self, Read};
use std::process;

use clap::Parser;

use just_sed::{compile, compile_quiet, Engine};

/// Stream editor for filtering and transforming text.
#[derive(Parser)]
#[command(name = "just-sed")]
#[command(about = "Stream editor for filtering and transforming text")]
#[command(version)]
struct Cli {
    /// Suppress automatic printing of the pattern space
    #[arg(short = 'n', long = "quiet", visible_alias = "silent")]
    quiet: bool,

    /// Add an expression to the script (may be repeated)
    #[arg(short = 'e', long = "expression", value_name = "SCRIPT")]
    expressions: Vec<String>,

    /// Read the script from a file
    #[arg(short = 'f', long = "file", value_name = "SCRIPT_FILE")]
    script_file: Option<String>,

    /// Edit files in place
    #[arg(short = 'i', long = "in-place")]
    in_place: bool,

    /// Input files (`-` means stdin); the first argument is the script
    /// when no -e or -f is given
    #[arg(value_name = "FILE")]
    files: Vec<String>,
}

fn main() {
    env_logger::init();
    let mut cli = Cli::parse();

    let script = match find_script(&mut cli) {
        Ok(script) => script,
        Err(message) => {
            eprintln!("just-sed: {message}");
            process::exit(1);
        }
    };

    let compiled = if cli.quiet {
        compile_quiet(script.as_bytes())
    } else {
        compile(script.as_bytes())
    };
    let engine = match compiled {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("just-sed: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(&engine, &cli) {
        eprintln!("just-sed: {e}");
        process::exit(2);
    }
}

/// Locate the script text: -e expressions joined by newlines, the -f
/// file, or the first positional argument.
fn find_script(cli: &mut Cli) -> Result<String, String> {
    if !cli.expressions.is_empty() {
        if cli.script_file.is_some() {
            return Err("cannot use both -e and -f".to_string());
        }
        return Ok(cli.expressions.join("\n"));
    }
    if let Some(ref path) = cli.script_file {
        return fs::read_to_string(path).map_err(|e| format!("cannot read {path}: {e}"));
    }
    if !cli.files.is_empty() {
        return Ok(cli.files.remove(0));
    }
    Err("no script given (use -e, -f, or a script argument)".to_string())
}

fn run(engine: &Engine, cli: &Cli) -> Result<(), Box<dyn Error>> {
    if cli.in_place {
        if cli.files.is_empty() {
            return Err("-i needs at least one input file".into());
        }
        for file in &cli.files {
            if file == "-" {
                continue;
            }
            log::debug!("editing {file} in place");
            let input = File::open(file)?;
            let mut filtered = Vec::new();
            engine.run(input, &mut filtered)?;
            fs::write(file, filtered)?;
        }
        return Ok(());
    }

    let stdout = io::stdout();
    if cli.files.is_empty() {
        engine.run(io::stdin().lock(), stdout.lock())?;
        return Ok(());
    }

    for file in &cli.files {
        log::debug!("filtering {file}");
        if file == "-" {
            copy_filtered(engine, io::stdin().lock(), &stdout)?;
        } else {
            copy_filtered(engine, File::open(file)?, &stdout)?;
        }
    }
    Ok(())
}

/// Pull a file through the streaming wrapper onto stdout.
fn copy_filtered<R: Read>(
    engine: &Engine,
    input: R,
    stdout: &io::Stdout,
) -> Result<(), Box<dyn Error>> {
    let mut wrapped = engine.wrap(input)?;
    io::copy(&mut wrapped, &mut stdout.lock())?;
    Ok(())
}
