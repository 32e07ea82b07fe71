// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run a logged transport session against a real TPM 1.2
//!
//! Usage: `tpm12-transtest <signing-key-handle-hex> <key-password>`
//!
//! Opens the TPM (`TPM12_DEVICE`, default `/dev/tpm0`), establishes an
//! unencrypted transport session, wraps TPM_PcrRead(0) and
//! TPM_GetRandom(16), releases the session with a signature from the
//! given key and prints the log document as JSON on stdout. The log can
//! be checked with `tpm12-verify-log`.

use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tpm12_auth::commands::{GetRandom, PcrRead};
use tpm12_auth::crypto::{auth_from_password, random_nonce};
use tpm12_auth::{OutputRegistry, Tpm, TransportConfig, TransportSession, TPM_KH_TRANSPORT};

const USAGE: &str = "usage: tpm12-transtest <signing-key-handle-hex> <key-password>";

fn parse_handle(arg: &str) -> Result<u32> {
    let digits = arg.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).with_context(|| format!("invalid key handle {}", arg))
}

fn run(args: &[String]) -> Result<()> {
    let key_handle = parse_handle(args.get(1).context(USAGE)?)?;
    let key_auth = auth_from_password(args.get(2).context(USAGE)?.as_bytes());

    let device = std::env::var("TPM12_DEVICE").unwrap_or_else(|_| "/dev/tpm0".to_string());
    let tpm = Tpm::open_path(&device)?;

    let mut transport = TransportSession::new(&tpm, TransportConfig::default())
        .context("failed to query TPM manufacturer")?;
    info!(
        manufacturer = %format!("0x{:08X}", transport.log().manufacturer()),
        quirk = ?transport.log().quirk(),
        "TPM opened"
    );

    let secret = random_nonce();
    let handle = transport
        .start(TPM_KH_TRANSPORT, None, &secret, &secret)
        .context("TPM_EstablishTransport failed")?;
    info!(handle = %format!("0x{:08X}", handle), "transport session established");

    transport
        .execute_wrapped(&PcrRead::new(0), true)
        .context("wrapped TPM_PcrRead failed")?;
    transport
        .execute_wrapped(&GetRandom::new(16), true)
        .context("wrapped TPM_GetRandom failed")?;

    let anti_replay = random_nonce();
    let release = transport
        .release_signed(key_handle, &anti_replay, &key_auth)
        .context("TPM_ReleaseTransportSigned failed")?;
    info!(
        signature_len = release.signature.len(),
        ticks = release.current_ticks.current_ticks,
        "transport session released"
    );

    let registry = OutputRegistry::with_defaults();
    for (index, entry) in transport.log().entries().iter().enumerate() {
        let (ordinal, output) = registry.decode_entry(entry)?;
        info!(
            index,
            kind = %entry.kind,
            ordinal = %tpm12_auth::ordinal_name(ordinal),
            "{}",
            output
        );
    }

    println!("{}", transport.log().to_json()?);
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
