use std::fs;
use std::io::IsTerminal;
use std::io::Read;
use std::io::{self};
use std::path::PathBuf;

use clap::Parser;

use crate::apply_patch;

#[derive(Parser, Debug)]
#[command(
    name = "apply_patch",
    about = "Apply *** Begin Patch blocks to the filesystem.",
    disable_help_subcommand = true
)]
struct Cli {
    /// Read patch content from the specified file instead of the command
    /// argument or STDIN.
    #[arg(short = 'f', long = "patch-file", value_name = "PATH")]
    patch_file: Option<PathBuf>,

    /// Treat file paths as relative to this directory (default: current directory).
    #[arg(short = 'C', long = "root", value_name = "PATH", default_value = ".")]
    root: PathBuf,

    /// Inline patch payload. If omitted, read from --patch-file or STDIN.
    #[arg(value_name = "PATCH")]
    patch: Option<String>,
}

pub fn main() -> ! {
    std::process::exit(run_main());
}

pub fn run_main() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let patch = match load_patch(&cli) {
        Ok(patch) => patch,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    match apply_patch(&patch, &cli.root, &mut stdout, &mut stderr) {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

fn load_patch(cli: &Cli) -> io::Result<String> {
    if let Some(inline) = &cli.patch {
        return Ok(inline.clone());
    }

    if let Some(path) = &cli.patch_file {
        return fs::read_to_string(path);
    }

    if io::stdin().is_terminal() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "No patch content provided. Supply via STDIN or --patch-file.",
        ));
    }

    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    if buf.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "No patch content provided. Supply via STDIN or --patch-file.",
        ));
    }
    Ok(buf)
}
