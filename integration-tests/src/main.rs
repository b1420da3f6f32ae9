//! End-to-end checks for the `pinexec` launcher.
//!
//! A successful exec never returns, so each check spawns the launcher as a
//! child and inspects what the replacement image did: its exit status, its
//! output, or the JSON that `print-env` writes describing the argv and
//! environment it received.
//!
//! Usage: test-runner --launcher <path> --test-binaries <dir> [--work-dir <dir>]

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use serde_json::Value;

struct TestConfig {
    launcher_path: PathBuf,
    /// Holds `print-env`.
    test_binaries_dir: PathBuf,
    /// Scratch space for generated scripts; wiped at startup.
    work_dir: PathBuf,
}

/// What a launcher run produced
struct RunResult {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

impl TestConfig {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = env::args().collect();

        let mut launcher_path = None;
        let mut test_binaries_dir = None;
        let mut work_dir = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--launcher" | "--test-binaries" | "--work-dir" if i + 1 >= args.len() => {
                    return Err(format!("{} requires an argument", args[i]));
                }
                "--launcher" => {
                    i += 1;
                    launcher_path = Some(PathBuf::from(&args[i]));
                }
                "--test-binaries" => {
                    i += 1;
                    test_binaries_dir = Some(PathBuf::from(&args[i]));
                }
                "--work-dir" => {
                    i += 1;
                    work_dir = Some(PathBuf::from(&args[i]));
                }
                "--help" | "-h" => {
                    println!("Usage: test-runner --launcher <path> --test-binaries <dir> [--work-dir <dir>]");
                    println!();
                    println!("Options:");
                    println!("  --launcher       Path to the pinexec binary");
                    println!("  --test-binaries  Directory containing print-env");
                    println!("  --work-dir       Working directory for test artifacts (default: temp dir)");
                    std::process::exit(0);
                }
                _ => {
                    return Err(format!("Unknown argument: {}", args[i]));
                }
            }
            i += 1;
        }

        let launcher_path = launcher_path.ok_or("--launcher is required")?;
        let test_binaries_dir = test_binaries_dir.ok_or("--test-binaries is required")?;
        let work_dir = work_dir.unwrap_or_else(|| env::temp_dir().join("pinexec-tests"));

        if !launcher_path.exists() {
            return Err(format!("Launcher not found: {}", launcher_path.display()));
        }
        if !test_binaries_dir.exists() {
            return Err(format!("Test binaries dir not found: {}", test_binaries_dir.display()));
        }

        Ok(Self {
            launcher_path,
            test_binaries_dir,
            work_dir,
        })
    }

    fn print_env(&self) -> PathBuf {
        self.test_binaries_dir.join("print-env")
    }
}

/// Run the launcher with the given flags and capture its output
fn run_launcher(config: &TestConfig, flags: &[&str], command: &Path, args: &[&str]) -> Result<RunResult, String> {
    let mut cmd = Command::new(&config.launcher_path);
    cmd.env_remove("RUST_LOG");
    cmd.args(flags).arg("--").arg(command).args(args);

    let output = cmd.output().map_err(|e| format!("Failed to run launcher: {}", e))?;

    Ok(RunResult {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Parse the JSON report printed by print-env
fn parse_report(stdout: &str) -> Result<Value, String> {
    serde_json::from_str(stdout.trim()).map_err(|e| format!("Bad print-env output {:?}: {}", stdout, e))
}

fn report_args(report: &Value) -> Vec<String> {
    report["args"]
        .as_array()
        .map(|args| args.iter().filter_map(|a| a.as_str().map(str::to_owned)).collect())
        .unwrap_or_default()
}

/// Test: /bin/true replaces the launcher and exits 0
fn test_true_exit_zero(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: true_exit_zero");

    let result = run_launcher(config, &["-i"], Path::new("/bin/true"), &[])?;
    if result.exit_code != 0 {
        return Err(format!("Expected exit 0, got {}: {}", result.exit_code, result.stderr));
    }

    println!("    PASS");
    Ok(())
}

/// Test: argv reaches the new image in order, argv[0] included
fn test_argv_passthrough(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: argv_passthrough");

    let print_env = config.print_env();
    let result = run_launcher(config, &["-i"], &print_env, &["--flag", "value with spaces", ""])?;
    if result.exit_code != 0 {
        return Err(format!("print-env failed with exit code {}: {}", result.exit_code, result.stderr));
    }

    let args = report_args(&parse_report(&result.stdout)?);
    let expected = vec![
        print_env.to_string_lossy().into_owned(),
        "--flag".to_string(),
        "value with spaces".to_string(),
        String::new(),
    ];
    if args != expected {
        return Err(format!("Expected args {:?}, got {:?}", expected, args));
    }

    println!("    PASS");
    Ok(())
}

/// Test: --argv0 replaces only argv[0]
fn test_argv0_override(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: argv0_override");

    let result = run_launcher(config, &["-i", "--argv0", "renamed"], &config.print_env(), &["x"])?;
    if result.exit_code != 0 {
        return Err(format!("print-env failed with exit code {}: {}", result.exit_code, result.stderr));
    }

    let args = report_args(&parse_report(&result.stdout)?);
    if args != ["renamed", "x"] {
        return Err(format!("Expected [renamed, x], got {:?}", args));
    }

    println!("    PASS");
    Ok(())
}

/// Test: explicit environment arrives exactly, nothing more
fn test_explicit_environment(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: explicit_environment");

    let result = run_launcher(
        config,
        &["-i", "-e", "foo=bar", "-e", "baz=1.....", "-e", "EMPTY="],
        &config.print_env(),
        &[],
    )?;
    if result.exit_code != 0 {
        return Err(format!("print-env failed with exit code {}: {}", result.exit_code, result.stderr));
    }

    let report = parse_report(&result.stdout)?;
    let expected = serde_json::json!({"foo": "bar", "baz": "1.....", "EMPTY": ""});
    if report["env"] != expected {
        return Err(format!("Expected env {}, got {}", expected, report["env"]));
    }

    println!("    PASS");
    Ok(())
}

/// Test: inherited environment with --unset and overrides
fn test_inherited_environment(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: inherited_environment");

    let output = Command::new(&config.launcher_path)
        .env_remove("RUST_LOG")
        .env("PINEXEC_INHERITED", "yes")
        .env("PINEXEC_REMOVED", "no")
        .args(["-u", "PINEXEC_REMOVED", "-e", "PINEXEC_ADDED=1", "--"])
        .arg(config.print_env())
        .output()
        .map_err(|e| format!("Failed to run launcher: {}", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let report = parse_report(&stdout)?;
    let env = &report["env"];

    if env["PINEXEC_INHERITED"] != "yes" {
        return Err(format!("PINEXEC_INHERITED not inherited: {}", env));
    }
    if env["PINEXEC_ADDED"] != "1" {
        return Err(format!("PINEXEC_ADDED not set: {}", env));
    }
    if !env["PINEXEC_REMOVED"].is_null() {
        return Err(format!("PINEXEC_REMOVED should be unset: {}", env));
    }

    println!("    PASS");
    Ok(())
}

/// Test: a path that does not exist exits 127 with the OS message
fn test_missing_command(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: missing_command");

    let missing = config.work_dir.join("does-not-exist");
    let result = run_launcher(config, &["-i"], &missing, &[])?;

    if result.exit_code != 127 {
        return Err(format!("Expected exit 127, got {}: {}", result.exit_code, result.stderr));
    }
    if !result.stderr.contains("No such file or directory") {
        return Err(format!("Missing OS error text: {}", result.stderr));
    }

    println!("    PASS");
    Ok(())
}

/// Test: a file without the exec bit exits 126
fn test_not_executable(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: not_executable");

    let path = config.work_dir.join("not-executable.sh");
    fs::write(&path, "#!/bin/sh\nexit 0\n").map_err(|e| format!("Failed to write script: {}", e))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644))
        .map_err(|e| format!("Failed to set permissions: {}", e))?;

    let result = run_launcher(config, &["-i"], &path, &[])?;

    if result.exit_code != 126 {
        return Err(format!("Expected exit 126, got {}: {}", result.exit_code, result.stderr));
    }
    if !result.stderr.contains("Permission denied") {
        return Err(format!("Missing OS error text: {}", result.stderr));
    }

    println!("    PASS");
    Ok(())
}

/// Test: --print-addresses reports three non-null pointers before exec
fn test_print_addresses(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: print_addresses");

    let result = run_launcher(config, &["-i", "--print-addresses"], Path::new("/bin/true"), &[])?;
    if result.exit_code != 0 {
        return Err(format!("Expected exit 0, got {}: {}", result.exit_code, result.stderr));
    }

    let line = result.stderr.lines().next().unwrap_or_default();
    for name in ["command=0x", "argv=0x", "envp=0x"] {
        if !line.contains(name) {
            return Err(format!("Missing {} in address line: {:?}", name, line));
        }
    }

    println!("    PASS");
    Ok(())
}

fn main() -> ExitCode {
    println!("=== pinexec Launcher Test Suite ===");
    println!();

    let config = match TestConfig::from_args() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            return ExitCode::from(1);
        }
    };

    if config.work_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&config.work_dir) {
            eprintln!("Warning: Failed to clean work dir: {}", e);
        }
    }
    if let Err(e) = fs::create_dir_all(&config.work_dir) {
        eprintln!("Error: Failed to create work dir: {}", e);
        return ExitCode::from(1);
    }

    println!("Configuration:");
    println!("  Launcher:      {}", config.launcher_path.display());
    println!("  Test binaries: {}", config.test_binaries_dir.display());
    println!("  Work dir:      {}", config.work_dir.display());
    println!();

    let tests: Vec<(&str, fn(&TestConfig) -> Result<(), String>)> = vec![
        ("true_exit_zero", test_true_exit_zero),
        ("argv_passthrough", test_argv_passthrough),
        ("argv0_override", test_argv0_override),
        ("explicit_environment", test_explicit_environment),
        ("inherited_environment", test_inherited_environment),
        ("missing_command", test_missing_command),
        ("not_executable", test_not_executable),
        ("print_addresses", test_print_addresses),
    ];

    let mut passed = 0;
    let mut failed = 0;

    println!("Running {} tests...", tests.len());
    println!();

    for (name, test_fn) in &tests {
        match test_fn(&config) {
            Ok(()) => {
                passed += 1;
            }
            Err(e) => {
                println!("  FAILED ({}): {}", name, e);
                failed += 1;
            }
        }
    }

    println!();
    println!("=== Results ===");
    println!("Passed: {}", passed);
    println!("Failed: {}", failed);
    println!();

    if failed > 0 {
        ExitCode::from(1)
    } else {
        println!("All tests passed!");
        ExitCode::SUCCESS
    }
}
