//! Demo program: report argv and the full environment as JSON
//!
//! Usage: print-env [args...]
//! Outputs a single JSON object on stdout:
//!   {"args": ["<arg0>", "<arg1>", ...], "env": {"<key>": "<value>", ...}}
//!
//! The launcher execs into this to show exactly what the kernel delivered.

use std::collections::BTreeMap;
use std::env;
use std::process::ExitCode;

use serde_json::json;

fn main() -> ExitCode {
    let args: Vec<String> = env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    let vars: BTreeMap<String, String> = env::vars_os()
        .map(|(key, value)| {
            (
                key.to_string_lossy().into_owned(),
                value.to_string_lossy().into_owned(),
            )
        })
        .collect();

    let report = json!({
        "args": args,
        "env": vars,
    });
    println!("{report}");

    ExitCode::SUCCESS
}
