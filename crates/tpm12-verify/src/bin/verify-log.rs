// SPDX-License-Identifier: MIT OR Apache-2.0

//! Verify a signed TPM 1.2 transport session log
//!
//! Usage: `tpm12-verify-log <modulus-hex> [log.json | -]`
//!
//! Reads the log document from a file or stdin, checks the release
//! signature against the RSA modulus, and prints the result as JSON.
//! Set `RUST_LOG=debug` to trace each folded log entry.

use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use tpm12_verify::{verify_transport_log_json, VerificationResult};

/// JSON-friendly output with hex-encoded binary fields
#[derive(Serialize)]
struct VerificationResultJson {
    valid: bool,
    entries: usize,
    trans_digest: String,
    anti_replay: String,
}

impl From<VerificationResult> for VerificationResultJson {
    fn from(result: VerificationResult) -> Self {
        VerificationResultJson {
            valid: result.valid,
            entries: result.entries,
            trans_digest: hex::encode(result.trans_digest),
            anti_replay: hex::encode(result.anti_replay),
        }
    }
}

fn read_input(path: Option<&String>) -> Result<String> {
    match path {
        Some(path) if path != "-" => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path))
        }
        _ => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .context("failed to read stdin")?;
            Ok(input)
        }
    }
}

fn run(args: &[String]) -> Result<bool> {
    let modulus_hex = args
        .get(1)
        .context("usage: tpm12-verify-log <modulus-hex> [log.json | -]")?;
    let json = read_input(args.get(2))?;

    let result = verify_transport_log_json(&json, modulus_hex)?;
    let valid = result.valid;
    println!(
        "{}",
        serde_json::to_string_pretty(&VerificationResultJson::from(result))?
    );
    Ok(valid)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
