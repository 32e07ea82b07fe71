// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dual-session ("Auth2") authorization
//!
//! Both sessions authorize the same parameter digest, each with its own
//! nonces and secret, and the TPM answers with one trailer per session.
//!
//! The exchange is accepted when EITHER response HMAC matches. Some
//! chips do not return a valid second resAuth, so requiring both would
//! reject genuine responses from them. This is weaker than checking both
//! and is kept on purpose; a one-sided match is logged at `warn`.

use tracing::{debug, warn};

use tpm12_verify::{AuthOutData, Decode};

use crate::command::{
    decode_checked, execute_direct, expect_trailers, CommandKind, CommandOutput, Exchange,
    TpmCommand,
};
use crate::error::{Result, TpmError};
use crate::ordinal_name;
use crate::session::AuthSession;

/// Execute a command under two sessions and return its output
pub fn execute_auth2<C: TpmCommand>(
    cmd: &mut C,
    session1: &mut AuthSession,
    continue1: bool,
    session2: &mut AuthSession,
    continue2: bool,
) -> Result<C::Output> {
    execute_auth2_exchange(cmd, session1, continue1, session2, continue2)
        .map(|exchange| exchange.output)
}

/// Execute a command under two sessions, keeping the raw frames
///
/// A command built for a single session runs under `session1` only, and
/// one switched to no-auth goes straight to the driver. `session2`'s
/// continuation is left to the caller; only `session1` is deactivated
/// here when not continued.
pub fn execute_auth2_exchange<C: TpmCommand>(
    cmd: &mut C,
    session1: &mut AuthSession,
    continue1: bool,
    session2: &mut AuthSession,
    continue2: bool,
) -> Result<Exchange<C::Output>> {
    if !session1.tpm().same_device(session2.tpm()) {
        return Err(TpmError::IllegalArgument(
            "sessions are bound to different TPMs",
        ));
    }
    match cmd.kind() {
        CommandKind::Plain => return execute_direct(session1.tpm(), cmd),
        CommandKind::Auth1 => return session1.execute_exchange(cmd, continue1),
        CommandKind::Auth2 => {}
    }
    let request = authorize_auth2(cmd, session1, continue1, session2, continue2)?;
    let response = session1.tpm().transmit(&request)?;
    let output = verify_auth2_response(cmd, &response, session1, continue1, session2)?;
    Ok(Exchange {
        request,
        response,
        output,
    })
}

/// Serialize a two-session command with both trailers
///
/// Secrets are masked under `session1`. The response must go through
/// [`verify_auth2_response`] with the same sessions.
pub fn authorize_auth2<C: TpmCommand>(
    cmd: &mut C,
    session1: &mut AuthSession,
    continue1: bool,
    session2: &mut AuthSession,
    continue2: bool,
) -> Result<Vec<u8>> {
    if cmd.kind() != CommandKind::Auth2 {
        return Err(TpmError::IllegalArgument(
            "only two-session commands take two trailers",
        ));
    }
    session1.ensure_active()?;
    session2.ensure_active()?;

    session1.rotate_nonce_odd();
    session2.rotate_nonce_odd();
    cmd.encrypt_secrets(session1)?;
    let param_digest = cmd.in_param_digest();
    let auth1 = session1.auth_in(&param_digest, continue1)?;
    let auth2 = session2.auth_in(&param_digest, continue2)?;
    debug!(
        ordinal = %ordinal_name(cmd.ordinal()),
        handle1 = %format!("0x{:08X}", session1.handle()),
        handle2 = %format!("0x{:08X}", session2.handle()),
        param_digest = %hex::encode(param_digest),
        "authorizing Auth2 command"
    );
    cmd.to_frame(&[&auth1.to_array(), &auth2.to_array()])
}

/// Check both resAuths of a response to an [`authorize_auth2`]d command
/// under the relaxed policy and decode it
pub fn verify_auth2_response<C: TpmCommand>(
    cmd: &C,
    response: &[u8],
    session1: &mut AuthSession,
    continue1: bool,
    session2: &mut AuthSession,
) -> Result<C::Output> {
    let view = decode_checked(cmd.ordinal(), response)?;
    expect_trailers(&view, 2)?;
    let output = C::Output::decode(&view)?;

    let out1 = AuthOutData::from_bytes(view.trailers[0])?;
    let out2 = AuthOutData::from_bytes(view.trailers[1])?;
    let out_digest = cmd.out_param_digest(response, &view)?;
    let matched1 = session1.check_auth_out(&out_digest, &out1)?;
    let matched2 = session2.check_auth_out(&out_digest, &out2)?;

    if !matched1 && !matched2 {
        return Err(TpmError::AuthOutDataMismatch {
            ordinal: cmd.ordinal(),
            handles: vec![session1.handle(), session2.handle()],
            response: response.to_vec(),
        });
    }
    if !(matched1 && matched2) {
        // Relaxed policy: one matching session is enough
        warn!(
            ordinal = %ordinal_name(cmd.ordinal()),
            matched1,
            matched2,
            "accepting Auth2 response with a single matching session"
        );
    }

    // Each session rolls forward only on its own verified nonce
    if matched1 {
        session1.accept(&out1, true);
    }
    if matched2 {
        session2.accept(&out2, true);
    }
    if !continue1 {
        session1.deactivate();
    }
    Ok(output)
}
