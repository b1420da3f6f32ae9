//! `pinexec`: replace this process with COMMAND through a raw `execve`.
//!
//! Unlike `env(1)` or `exec` in a shell, the command path, argv table and
//! envp block are laid out up front and handed to the kernel untouched, so
//! `--print-addresses` reports the exact pointers a seccomp filter will see.

use std::convert::Infallible;
use std::ffi::{CString, OsStr, OsString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::builder::{OsStringValueParser, TypedValueParser};
use clap::{ArgAction, Parser};
use pinexec::{Environment, ExecError, PreparedExec};

/// Exit status when COMMAND does not exist.
const EXIT_NOT_FOUND: u8 = 127;
/// Exit status when COMMAND exists but could not be executed.
const EXIT_CANNOT_EXEC: u8 = 126;

#[derive(Parser, Debug)]
#[command(name = "pinexec", version)]
#[command(about = "Run COMMAND via a raw execve with address-stable argv/envp")]
struct Cli {
    /// Start from an empty environment
    #[arg(short = 'i', long = "ignore-environment")]
    ignore_environment: bool,

    /// Remove NAME from the environment (can be repeated)
    #[arg(short = 'u', long = "unset", value_name = "NAME")]
    unset: Vec<OsString>,

    /// Set NAME to VALUE (can be repeated; applied after --unset)
    #[arg(
        short = 'e',
        long = "env",
        value_name = "NAME=VALUE",
        value_parser = OsStringValueParser::new().try_map(parse_env_pair)
    )]
    env: Vec<(OsString, OsString)>,

    /// Program name passed as argv[0] (default: COMMAND)
    #[arg(long, value_name = "NAME")]
    argv0: Option<OsString>,

    /// Print the command, argv and envp addresses to stderr before exec
    #[arg(long)]
    print_addresses: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Path of the program to execute (no PATH search)
    #[arg(value_name = "COMMAND")]
    command: OsString,

    /// Arguments after argv[0]
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<OsString>,
}

/// Splits at the first '=' on raw bytes, so values need not be UTF-8.
fn parse_env_pair(pair: OsString) -> Result<(OsString, OsString), String> {
    let bytes = pair.as_bytes();
    match bytes.iter().position(|&b| b == b'=') {
        Some(0) => Err(format!("empty variable name in '{}'", pair.to_string_lossy())),
        Some(eq) => Ok((
            OsStr::from_bytes(&bytes[..eq]).to_owned(),
            OsStr::from_bytes(&bytes[eq + 1..]).to_owned(),
        )),
        None => Err(format!("expected NAME=VALUE, got '{}'", pair.to_string_lossy())),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "error",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn build_environment(cli: &Cli) -> Environment {
    let mut env = if cli.ignore_environment {
        Environment::new()
    } else {
        Environment::capture()
    };
    for name in &cli.unset {
        env.remove(name);
    }
    for (name, value) in &cli.env {
        env.set(name.clone(), value.clone());
    }
    log::debug!(
        "environment: {} entries (inherited: {})",
        env.len(),
        !cli.ignore_environment
    );
    env
}

fn run(cli: &Cli) -> Result<Infallible> {
    let env = build_environment(cli);

    let command = CString::new(cli.command.as_bytes())
        .map_err(ExecError::InvalidCommand)
        .context("Invalid command path")?;

    let argv0 = cli.argv0.as_ref().unwrap_or(&cli.command);
    let argv = std::iter::once(argv0)
        .chain(&cli.args)
        .enumerate()
        .map(|(index, arg)| {
            CString::new(arg.as_bytes()).map_err(|source| ExecError::InvalidArgument { index, source })
        })
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid argument")?;

    let prepared = PreparedExec::new(&command, &argv, &env)
        .context("Failed to lay out argv/envp")?;

    if cli.print_addresses {
        eprintln!(
            "command={} argv={} envp={}",
            prepared.command_address(),
            prepared.argv_address(),
            prepared.envp_address()
        );
    }

    prepared
        .exec()
        .with_context(|| format!("Failed to execute {}", cli.command.to_string_lossy()))
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<ExecError>().and_then(ExecError::errno) {
        Some(errno) if io::Error::from_raw_os_error(errno).kind() == io::ErrorKind::NotFound => {
            ExitCode::from(EXIT_NOT_FOUND)
        }
        Some(_) => ExitCode::from(EXIT_CANNOT_EXEC),
        None => ExitCode::FAILURE,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(never) => match never {},
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_code_for(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(bytes: &[u8]) -> OsString {
        OsStr::from_bytes(bytes).to_owned()
    }

    #[test]
    fn env_pair_splits_at_the_first_equals() {
        assert_eq!(
            parse_env_pair(os(b"EQ=a=b")).unwrap(),
            (os(b"EQ"), os(b"a=b"))
        );
        assert_eq!(parse_env_pair(os(b"EMPTY=")).unwrap(), (os(b"EMPTY"), os(b"")));
    }

    #[test]
    fn env_pair_keeps_non_utf8_bytes() {
        assert_eq!(
            parse_env_pair(os(b"RAW=\xff\xfe")).unwrap(),
            (os(b"RAW"), os(b"\xff\xfe"))
        );
    }

    #[test]
    fn env_pair_needs_a_name_and_an_equals() {
        assert!(parse_env_pair(os(b"=v")).unwrap_err().contains("empty variable name"));
        assert!(parse_env_pair(os(b"NOEQUALS")).unwrap_err().contains("NAME=VALUE"));
    }
}
