// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-session ("Auth1") authorization
//!
//! Per exchange:
//!
//! 1. rotate nonceOdd, then let the command mask its secrets
//! 2. `inAuth = HMAC(secret, paramDigest || nonceEven || nonceOdd || continue)`
//! 3. transmit; a non-zero return code is surfaced without verification
//! 4. `resAuth = HMAC(secret, outDigest || nonceEven' || nonceOdd || continue')`
//!    must match, otherwise the session keeps its old nonceEven
//! 5. adopt nonceEven' and deactivate if the session was not continued

use std::fmt;

use tracing::debug;

use tpm12_verify::{AuthInData, AuthOutData, Decode, Digest, Nonce, Secret, DIGEST_SIZE};

use crate::command::{
    decode_checked, execute_direct, expect_trailers, CommandKind, CommandOutput, Exchange,
    TpmCommand,
};
use crate::crypto::{hmac_sha1, mask_secret, random_nonce};
use crate::error::{Result, TpmError};
use crate::{ordinal_name, Tpm};

/// Authorization session state shared with the TPM
pub struct AuthSession {
    tpm: Tpm,
    handle: u32,
    shared_secret: Secret,
    nonce_even: Nonce,
    nonce_odd: Nonce,
    active: bool,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("handle", &format_args!("0x{:08X}", self.handle))
            .field("nonce_even", &hex::encode(self.nonce_even))
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    /// Inactive session bound to `tpm`; start it with OIAP, OSAP or a
    /// transport establish
    pub fn new(tpm: Tpm) -> Self {
        Self {
            tpm,
            handle: 0,
            shared_secret: [0u8; DIGEST_SIZE],
            nonce_even: [0u8; DIGEST_SIZE],
            nonce_odd: [0u8; DIGEST_SIZE],
            active: false,
        }
    }

    /// Active session from values the TPM already issued
    pub fn resume(tpm: Tpm, handle: u32, nonce_even: Nonce, shared_secret: Secret) -> Self {
        let mut session = Self::new(tpm);
        session.activate(handle, nonce_even, shared_secret);
        session
    }

    pub fn tpm(&self) -> &Tpm {
        &self.tpm
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn nonce_even(&self) -> &Nonce {
        &self.nonce_even
    }

    pub fn nonce_odd(&self) -> &Nonce {
        &self.nonce_odd
    }

    pub fn shared_secret(&self) -> &Secret {
        &self.shared_secret
    }

    pub fn set_shared_secret(&mut self, secret: Secret) {
        self.shared_secret = secret;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn activate(&mut self, handle: u32, nonce_even: Nonce, shared_secret: Secret) {
        self.handle = handle;
        self.nonce_even = nonce_even;
        self.shared_secret = shared_secret;
        self.active = true;
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = false;
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if !self.active {
            return Err(TpmError::session_state(self.handle, "session is not active"));
        }
        Ok(())
    }

    pub(crate) fn ensure_inactive(&self) -> Result<()> {
        if self.active {
            return Err(TpmError::session_state(self.handle, "session is already active"));
        }
        Ok(())
    }

    pub(crate) fn rotate_nonce_odd(&mut self) {
        self.nonce_odd = random_nonce();
    }

    /// Mask `plaintext` under the shared secret and the current nonceEven
    pub fn mask_with_even(&self, plaintext: &Secret) -> Secret {
        mask_secret(&self.shared_secret, &self.nonce_even, plaintext)
    }

    /// Mask `plaintext` under the shared secret and the rotated nonceOdd
    pub fn mask_with_odd(&self, plaintext: &Secret) -> Secret {
        mask_secret(&self.shared_secret, &self.nonce_odd, plaintext)
    }

    /// Request trailer for `param_digest`
    pub(crate) fn auth_in(&self, param_digest: &Digest, continue_session: bool) -> Result<AuthInData> {
        let in_auth = hmac_sha1(
            &self.shared_secret,
            &[
                param_digest,
                &self.nonce_even,
                &self.nonce_odd,
                &[continue_session as u8],
            ],
        )?;
        Ok(AuthInData {
            auth_handle: self.handle,
            nonce_odd: self.nonce_odd,
            continue_session,
            in_auth,
        })
    }

    /// Whether `auth_out` carries the resAuth this session expects
    pub(crate) fn check_auth_out(&self, out_digest: &Digest, auth_out: &AuthOutData) -> Result<bool> {
        let expected = hmac_sha1(
            &self.shared_secret,
            &[
                out_digest,
                &auth_out.nonce_even,
                &self.nonce_odd,
                &[auth_out.continue_session as u8],
            ],
        )?;
        Ok(expected == auth_out.res_auth)
    }

    /// Roll the nonce forward after a verified response
    pub(crate) fn accept(&mut self, auth_out: &AuthOutData, continue_session: bool) {
        self.nonce_even = auth_out.nonce_even;
        if !continue_session {
            self.active = false;
        }
    }

    /// Execute a single-session command and return its output
    pub fn execute<C: TpmCommand>(&mut self, cmd: &mut C, continue_session: bool) -> Result<C::Output> {
        self.execute_exchange(cmd, continue_session)
            .map(|exchange| exchange.output)
    }

    /// Execute a single-session command, keeping the raw frames
    ///
    /// Commands switched to no-auth (and plain commands) bypass the
    /// session entirely.
    pub fn execute_exchange<C: TpmCommand>(
        &mut self,
        cmd: &mut C,
        continue_session: bool,
    ) -> Result<Exchange<C::Output>> {
        match cmd.kind() {
            CommandKind::Plain => return execute_direct(&self.tpm, cmd),
            CommandKind::Auth2 => {
                return Err(TpmError::UnsupportedOperation(
                    "two-session command needs two sessions",
                ))
            }
            CommandKind::Auth1 => {}
        }
        let request = self.authorize(cmd, continue_session)?;
        let response = self.tpm.transmit(&request)?;
        let output = self.verify_response(cmd, &response, continue_session)?;
        Ok(Exchange {
            request,
            response,
            output,
        })
    }

    /// Serialize an Auth1 command with this session's trailer
    ///
    /// Rotates nonceOdd and masks the command's secrets first. The
    /// response must go through [`AuthSession::verify_response`].
    pub fn authorize<C: TpmCommand>(&mut self, cmd: &mut C, continue_session: bool) -> Result<Vec<u8>> {
        if cmd.kind() != CommandKind::Auth1 {
            return Err(TpmError::IllegalArgument(
                "only single-session commands take one trailer",
            ));
        }
        self.ensure_active()?;

        self.rotate_nonce_odd();
        cmd.encrypt_secrets(self)?;
        let param_digest = cmd.in_param_digest();
        let auth_in = self.auth_in(&param_digest, continue_session)?;
        debug!(
            ordinal = %ordinal_name(cmd.ordinal()),
            handle = %format!("0x{:08X}", self.handle),
            param_digest = %hex::encode(param_digest),
            continue_session,
            "authorizing Auth1 command"
        );
        cmd.to_frame(&[&auth_in.to_array()])
    }

    /// Check the resAuth of a response to an [`AuthSession::authorize`]d
    /// command and decode it
    ///
    /// A non-zero return code is surfaced without verification and leaves
    /// the nonces untouched.
    pub fn verify_response<C: TpmCommand>(
        &mut self,
        cmd: &C,
        response: &[u8],
        continue_session: bool,
    ) -> Result<C::Output> {
        let view = decode_checked(cmd.ordinal(), response)?;
        expect_trailers(&view, 1)?;
        let output = C::Output::decode(&view)?;

        let auth_out = AuthOutData::from_bytes(view.trailers[0])?;
        let out_digest = cmd.out_param_digest(response, &view)?;
        if !self.check_auth_out(&out_digest, &auth_out)? {
            return Err(TpmError::AuthOutDataMismatch {
                ordinal: cmd.ordinal(),
                handles: vec![self.handle],
                response: response.to_vec(),
            });
        }
        self.accept(&auth_out, continue_session);
        Ok(output)
    }
}
