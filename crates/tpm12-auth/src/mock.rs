// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory TPM 1.2 for tests
//!
//! Implements enough of the command set to drive every session type end
//! to end: OIAP and OSAP, owner auth changes, a few plain commands and a
//! logged transport session that signs its digest on release. Wrapped
//! commands may carry their own authorization sessions. Requests
//! are authorized the way a chip authorizes them, so a client with a bad
//! HMAC gets `TPM_AUTHFAIL` back rather than a silent pass.
//!
//! Transport secrets are taken as sent: the mock holds no storage keys
//! to unwrap them with.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use rand::RngCore;
use rsa::RsaPrivateKey;
use tracing::debug;

use tpm12_verify::codec::{read_digest, read_sized, read_u16, read_u32, ByteWriter};
use tpm12_verify::digest::{sha1, unwrapped_output_digest, wrapped_command_digest};
use tpm12_verify::frame::{self, FrameView, Tag};
use tpm12_verify::log::TPM_MANUFACTURER_BROADCOM;
use tpm12_verify::result_code::{
    TPM_AUTH2FAIL, TPM_AUTHFAIL, TPM_BADINDEX, TPM_BAD_ORDINAL, TPM_BAD_PARAMETER, TPM_FAIL,
    TPM_INVALID_AUTHHANDLE, TPM_INVALID_KEYHANDLE, TPM_RESOURCES, TPM_SUCCESS,
};
use tpm12_verify::structs::{TransportLogIn, TransportLogOut};
use tpm12_verify::test_support::{modulus, sign, test_key};
use tpm12_verify::{
    AuthInData, AuthOutData, CurrentTicks, Decode, Digest, Encode, FrameError, Nonce, Secret,
    SignInfo, TransportPublic, VendorQuirk, DIGEST_SIZE,
};

use crate::crypto::{hmac_sha1, mask_secret, random_nonce, WELL_KNOWN_SECRET};
use crate::{
    Driver, Tpm, TpmOrd, TPM_CAP_PROPERTY, TPM_CAP_PROP_MANUFACTURER, TPM_ET_KEYHANDLE,
    TPM_ET_OWNER, TPM_KH_OWNER, TPM_KH_TRANSPORT, TPM_PID_ADCP,
};

/// Handle of the key installed by [`MockTpm::with_signing_key`]
pub const MOCK_SIGNING_KEY: u32 = 0x0100_0001;

const PCR_COUNT: usize = 24;
const MAX_RANDOM: u32 = 128;
const FIRST_HANDLE: u32 = 0x0200_0000;
const LOCALITY: u32 = 0;

type TpmResult<T> = std::result::Result<T, u32>;

fn bad_param<T>(res: std::result::Result<T, FrameError>) -> TpmResult<T> {
    res.map_err(|_| TPM_BAD_PARAMETER)
}

fn hmac(key: &Secret, parts: &[&[u8]]) -> TpmResult<Digest> {
    hmac_sha1(key, parts).map_err(|_| TPM_FAIL)
}

fn fold(digest: &mut Vec<u8>, structure: &impl Encode) {
    *digest = sha1(&[digest.as_slice(), &structure.to_bytes()]).to_vec();
}

fn error_frame(code: u32) -> Vec<u8> {
    frame::encode(Tag::RspCommand, code, &[], &[]).unwrap_or_default()
}

struct MockKey {
    usage_auth: Secret,
    key: RsaPrivateKey,
}

enum SessionKind {
    Oiap,
    Osap { shared_secret: Secret },
}

struct MockSession {
    kind: SessionKind,
    nonce_even: Nonce,
}

struct MockTransport {
    handle: u32,
    secret: Secret,
    nonce_even: Nonce,
    start_ticks: CurrentTicks,
    digest: Vec<u8>,
}

/// A request trailer that passed its HMAC check
struct Authorized {
    auth: AuthInData,
    secret: Secret,
    nonce_even: Nonce,
}

struct MockState {
    manufacturer: u32,
    owner_auth: Secret,
    keys: HashMap<u32, MockKey>,
    pcrs: [Digest; PCR_COUNT],
    ticks: CurrentTicks,
    next_handle: u32,
    sessions: HashMap<u32, MockSession>,
    transport: Option<MockTransport>,
    corrupt: BTreeSet<usize>,
    received: Vec<Vec<u8>>,
}

/// Shared-state mock; clones observe the same TPM
#[derive(Clone)]
pub struct MockTpm {
    state: Rc<RefCell<MockState>>,
}

impl Default for MockTpm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTpm {
    /// Broadcom-flavoured TPM with the well-known owner auth and no keys
    pub fn new() -> Self {
        let state = MockState {
            manufacturer: TPM_MANUFACTURER_BROADCOM,
            owner_auth: WELL_KNOWN_SECRET,
            keys: HashMap::new(),
            pcrs: [[0u8; DIGEST_SIZE]; PCR_COUNT],
            ticks: CurrentTicks {
                current_ticks: 0x1000,
                tick_rate: 1,
                tick_nonce: random_nonce(),
            },
            next_handle: FIRST_HANDLE,
            sessions: HashMap::new(),
            transport: None,
            corrupt: BTreeSet::new(),
            received: Vec::new(),
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn with_manufacturer(self, manufacturer: u32) -> Self {
        self.state.borrow_mut().manufacturer = manufacturer;
        self
    }

    pub fn with_owner_auth(self, owner_auth: Secret) -> Self {
        self.state.borrow_mut().owner_auth = owner_auth;
        self
    }

    /// Load a fresh RSA signing key at [`MOCK_SIGNING_KEY`]
    pub fn with_signing_key(self, usage_auth: Secret) -> Self {
        self.state.borrow_mut().keys.insert(
            MOCK_SIGNING_KEY,
            MockKey {
                usage_auth,
                key: test_key(),
            },
        );
        self
    }

    /// [`Tpm`] handle driving this mock
    pub fn tpm(&self) -> Tpm {
        Tpm::new(self.clone())
    }

    /// Public modulus of a loaded key
    pub fn modulus(&self, key_handle: u32) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .keys
            .get(&key_handle)
            .map(|key| modulus(&key.key))
    }

    pub fn owner_auth(&self) -> Secret {
        self.state.borrow().owner_auth
    }

    pub fn pcr(&self, index: usize) -> Digest {
        self.state.borrow().pcrs[index]
    }

    /// Flip a bit in the resAuth of trailer `index` of the next
    /// authorized response
    pub fn corrupt_next_res_auth(&self, index: usize) {
        self.state.borrow_mut().corrupt.insert(index);
    }

    /// Every request received so far
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.state.borrow().received.clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.borrow().sessions.len()
    }

    pub fn transport_active(&self) -> bool {
        self.state.borrow().transport.is_some()
    }
}

impl Driver for MockTpm {
    fn transmit(&mut self, command: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(self.state.borrow_mut().handle(command))
    }
}

impl MockState {
    fn handle(&mut self, request: &[u8]) -> Vec<u8> {
        self.received.push(request.to_vec());
        self.ticks.current_ticks += 1;

        let view = match frame::decode_request(request) {
            Ok(view) => view,
            Err(_) => return error_frame(TPM_BAD_PARAMETER),
        };
        let ordinal = view.code();
        let result = match view.tag() {
            Tag::RquCommand => self
                .execute_plain(ordinal, view.body)
                .and_then(|body| {
                    frame::encode(Tag::RspCommand, TPM_SUCCESS, &body, &[]).map_err(|_| TPM_FAIL)
                }),
            _ => self.execute_authorized(ordinal, &view),
        };
        result.unwrap_or_else(|code| {
            debug!(
                ordinal = %format!("0x{:08X}", ordinal),
                code = %format!("0x{:08X}", code),
                "mock TPM rejected command"
            );
            error_frame(code)
        })
    }

    fn allocate_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn key(&self, handle: u32) -> TpmResult<&MockKey> {
        self.keys.get(&handle).ok_or(TPM_INVALID_KEYHANDLE)
    }

    // ------------------------------------------------------------------
    // Unauthorized commands
    // ------------------------------------------------------------------

    fn execute_plain(&mut self, ordinal: u32, body: &[u8]) -> TpmResult<Vec<u8>> {
        match TpmOrd::from_u32(ordinal) {
            Some(TpmOrd::Oiap) => Ok(self.oiap()),
            Some(TpmOrd::Osap) => self.osap(body),
            Some(TpmOrd::TerminateHandle) => {
                let (handle, _) = bad_param(read_u32(body, 0))?;
                self.sessions
                    .remove(&handle)
                    .map(|_| Vec::new())
                    .ok_or(TPM_INVALID_AUTHHANDLE)
            }
            Some(TpmOrd::PcrRead) => {
                let (index, _) = bad_param(read_u32(body, 0))?;
                let pcr = self.pcrs.get(index as usize).ok_or(TPM_BADINDEX)?;
                Ok(pcr.to_vec())
            }
            Some(TpmOrd::Extend) => {
                let (index, off) = bad_param(read_u32(body, 0))?;
                let (digest, _) = bad_param(read_digest(body, off))?;
                let pcr = self.pcrs.get_mut(index as usize).ok_or(TPM_BADINDEX)?;
                *pcr = sha1(&[pcr.as_slice(), &digest]);
                Ok(pcr.to_vec())
            }
            Some(TpmOrd::GetRandom) => {
                let (requested, _) = bad_param(read_u32(body, 0))?;
                let mut bytes = vec![0u8; requested.min(MAX_RANDOM) as usize];
                rand::thread_rng().fill_bytes(&mut bytes);
                Ok(ByteWriter::new().write_sized(&bytes).into_vec())
            }
            Some(TpmOrd::GetCapability) => {
                let (cap_area, off) = bad_param(read_u32(body, 0))?;
                let (sub_cap, _) = bad_param(read_sized(body, off))?;
                if cap_area != TPM_CAP_PROPERTY
                    || sub_cap != TPM_CAP_PROP_MANUFACTURER.to_be_bytes()
                {
                    return Err(TPM_BAD_PARAMETER);
                }
                Ok(ByteWriter::new()
                    .write_sized(&self.manufacturer.to_be_bytes())
                    .into_vec())
            }
            Some(TpmOrd::EstablishTransport) => self.establish(body, false),
            _ => Err(TPM_BAD_ORDINAL),
        }
    }

    fn oiap(&mut self) -> Vec<u8> {
        let handle = self.allocate_handle();
        let nonce_even = random_nonce();
        self.sessions.insert(
            handle,
            MockSession {
                kind: SessionKind::Oiap,
                nonce_even,
            },
        );
        ByteWriter::new()
            .write_u32(handle)
            .write_bytes(&nonce_even)
            .into_vec()
    }

    fn osap(&mut self, body: &[u8]) -> TpmResult<Vec<u8>> {
        let (entity_type, off) = bad_param(read_u16(body, 0))?;
        let (entity_value, off) = bad_param(read_u32(body, off))?;
        let (nonce_odd_osap, _) = bad_param(read_digest(body, off))?;
        let entity_auth = match entity_type {
            TPM_ET_OWNER if entity_value == TPM_KH_OWNER => self.owner_auth,
            TPM_ET_KEYHANDLE => self.key(entity_value)?.usage_auth,
            _ => return Err(TPM_BAD_PARAMETER),
        };

        let nonce_even_osap = random_nonce();
        let shared_secret = hmac(&entity_auth, &[&nonce_even_osap, &nonce_odd_osap])?;
        let handle = self.allocate_handle();
        let nonce_even = random_nonce();
        self.sessions.insert(
            handle,
            MockSession {
                kind: SessionKind::Osap { shared_secret },
                nonce_even,
            },
        );
        Ok(ByteWriter::new()
            .write_u32(handle)
            .write_bytes(&nonce_even)
            .write_bytes(&nonce_even_osap)
            .into_vec())
    }

    // ------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------

    fn in_param_digest(&self, ordinal: u32, body: &[u8]) -> TpmResult<Digest> {
        let ord = ordinal.to_be_bytes();
        match TpmOrd::from_u32(ordinal) {
            Some(TpmOrd::ChangeAuthOwner) => Ok(sha1(&[&ord, body])),
            // Key and entity handles are not covered
            Some(TpmOrd::EstablishTransport) | Some(TpmOrd::ReleaseTransportSigned) => {
                if body.len() < 4 {
                    return Err(TPM_BAD_PARAMETER);
                }
                Ok(sha1(&[&ord, &body[4..]]))
            }
            Some(TpmOrd::ExecuteTransport) => {
                let (wrapped, _) = bad_param(read_sized(body, 0))?;
                let wrapped_digest = bad_param(wrapped_command_digest(wrapped))?;
                Ok(sha1(&[
                    &ord,
                    &(wrapped.len() as u32).to_be_bytes(),
                    &wrapped_digest,
                ]))
            }
            _ => Err(TPM_BAD_ORDINAL),
        }
    }

    /// Secret a session with `handle` uses for trailer `index`
    fn session_secret(&self, ordinal: u32, index: usize, body: &[u8], handle: u32) -> TpmResult<Secret> {
        if let Some(transport) = self.transport.as_ref().filter(|t| t.handle == handle) {
            return Ok(transport.secret);
        }
        let needs_transport = match TpmOrd::from_u32(ordinal) {
            Some(TpmOrd::ExecuteTransport) => true,
            Some(TpmOrd::ReleaseTransportSigned) => index == 1,
            _ => false,
        };
        if needs_transport {
            return Err(TPM_INVALID_AUTHHANDLE);
        }

        let session = self.sessions.get(&handle).ok_or(TPM_INVALID_AUTHHANDLE)?;
        match session.kind {
            SessionKind::Osap { shared_secret } => Ok(shared_secret),
            // OIAP carries the usage auth of the entity the command names
            SessionKind::Oiap => match TpmOrd::from_u32(ordinal) {
                Some(TpmOrd::ChangeAuthOwner) => Ok(self.owner_auth),
                Some(TpmOrd::EstablishTransport) | Some(TpmOrd::ReleaseTransportSigned) => {
                    let (key_handle, _) = bad_param(read_u32(body, 0))?;
                    Ok(self.key(key_handle)?.usage_auth)
                }
                _ => Err(TPM_BAD_ORDINAL),
            },
        }
    }

    fn session_nonce(&self, handle: u32) -> TpmResult<Nonce> {
        match &self.transport {
            Some(transport) if transport.handle == handle => Ok(transport.nonce_even),
            _ => self
                .sessions
                .get(&handle)
                .map(|session| session.nonce_even)
                .ok_or(TPM_INVALID_AUTHHANDLE),
        }
    }

    fn roll_session(&mut self, handle: u32, nonce_even: Nonce, continue_session: bool) {
        if let Some(transport) = self.transport.as_mut().filter(|t| t.handle == handle) {
            transport.nonce_even = nonce_even;
            if !continue_session {
                self.transport = None;
            }
            return;
        }
        if continue_session {
            if let Some(session) = self.sessions.get_mut(&handle) {
                session.nonce_even = nonce_even;
            }
        } else {
            self.sessions.remove(&handle);
        }
    }

    fn execute_authorized(&mut self, ordinal: u32, view: &FrameView<'_>) -> TpmResult<Vec<u8>> {
        let expected_sessions = match TpmOrd::from_u32(ordinal) {
            Some(TpmOrd::ReleaseTransportSigned) => 2,
            Some(_) => 1,
            None => return Err(TPM_BAD_ORDINAL),
        };
        if view.trailers.len() != expected_sessions {
            return Err(TPM_BAD_PARAMETER);
        }

        let param_digest = self.in_param_digest(ordinal, view.body)?;
        let mut authorized = Vec::with_capacity(view.trailers.len());
        for (index, trailer) in view.trailers.iter().enumerate() {
            let auth = bad_param(AuthInData::from_bytes(trailer))?;
            let secret = self.session_secret(ordinal, index, view.body, auth.auth_handle)?;
            let nonce_even = self.session_nonce(auth.auth_handle)?;
            let expected = hmac(
                &secret,
                &[
                    &param_digest,
                    &nonce_even,
                    &auth.nonce_odd,
                    &[auth.continue_session as u8],
                ],
            )?;
            if expected != auth.in_auth {
                return Err(if index == 0 { TPM_AUTHFAIL } else { TPM_AUTH2FAIL });
            }
            authorized.push(Authorized {
                auth,
                secret,
                nonce_even,
            });
        }

        let body = match TpmOrd::from_u32(ordinal) {
            Some(TpmOrd::ChangeAuthOwner) => self.change_auth_owner(view.body, &authorized[0])?,
            Some(TpmOrd::EstablishTransport) => self.establish(view.body, true)?,
            Some(TpmOrd::ExecuteTransport) => self.execute_transport(view.body)?,
            Some(TpmOrd::ReleaseTransportSigned) => self.release(view.body)?,
            _ => return Err(TPM_BAD_ORDINAL),
        };
        let out_digest = self.out_param_digest(ordinal, view.body, &body)?;

        let mut trailers = Vec::with_capacity(authorized.len());
        for (index, authorized) in authorized.iter().enumerate() {
            let nonce_even = random_nonce();
            let cont = authorized.auth.continue_session;
            let mut res_auth = hmac(
                &authorized.secret,
                &[
                    &out_digest,
                    &nonce_even,
                    &authorized.auth.nonce_odd,
                    &[cont as u8],
                ],
            )?;
            if self.corrupt.remove(&index) {
                res_auth[0] ^= 0x01;
            }
            self.roll_session(authorized.auth.auth_handle, nonce_even, cont);
            trailers.push(
                AuthOutData {
                    nonce_even,
                    continue_session: cont,
                    res_auth,
                }
                .to_array(),
            );
        }

        let tag = if trailers.len() == 2 {
            Tag::RspAuth2Command
        } else {
            Tag::RspAuth1Command
        };
        let trailer_refs: Vec<&[u8]> = trailers.iter().map(|t| t.as_slice()).collect();
        frame::encode(tag, TPM_SUCCESS, &body, &trailer_refs).map_err(|_| TPM_FAIL)
    }

    fn out_param_digest(&self, ordinal: u32, request_body: &[u8], body: &[u8]) -> TpmResult<Digest> {
        let rc = TPM_SUCCESS.to_be_bytes();
        let ord = ordinal.to_be_bytes();
        match TpmOrd::from_u32(ordinal) {
            Some(TpmOrd::EstablishTransport) => Ok(sha1(&[&rc, &ord, &body[4..]])),
            Some(TpmOrd::ExecuteTransport) => {
                let (wrapped_cmd, _) = bad_param(read_sized(request_body, 0))?;
                let inner_ordinal = bad_param(frame::decode_request(wrapped_cmd))?.code();
                let (wrapped_rsp, _) = bad_param(read_sized(body, 12))?;
                let inner_digest = bad_param(unwrapped_output_digest(inner_ordinal, wrapped_rsp))?;
                Ok(sha1(&[&rc, &ord, &body[..16], &inner_digest]))
            }
            _ => Ok(sha1(&[&rc, &ord, body])),
        }
    }

    // ------------------------------------------------------------------
    // Authorized commands
    // ------------------------------------------------------------------

    fn change_auth_owner(&mut self, body: &[u8], authorized: &Authorized) -> TpmResult<Vec<u8>> {
        let (protocol, off) = bad_param(read_u16(body, 0))?;
        let (enc_new_auth, off) = bad_param(read_digest(body, off))?;
        let (entity_type, _) = bad_param(read_u16(body, off))?;
        if protocol != TPM_PID_ADCP || entity_type != TPM_ET_OWNER {
            return Err(TPM_BAD_PARAMETER);
        }
        self.owner_auth = mask_secret(&authorized.secret, &authorized.nonce_even, &enc_new_auth);
        Ok(Vec::new())
    }

    fn establish(&mut self, body: &[u8], authorized: bool) -> TpmResult<Vec<u8>> {
        let (enc_handle, off) = bad_param(read_u32(body, 0))?;
        let (_public, off) = bad_param(TransportPublic::decode_at(body, off))?;
        let (secret, _) = bad_param(read_sized(body, off))?;
        if self.transport.is_some() {
            return Err(TPM_RESOURCES);
        }
        if enc_handle != TPM_KH_TRANSPORT {
            self.key(enc_handle)?;
            if !authorized {
                return Err(TPM_AUTHFAIL);
            }
        }
        let secret: Secret = secret.try_into().map_err(|_| TPM_BAD_PARAMETER)?;

        let handle = self.allocate_handle();
        let nonce_even = random_nonce();
        let start_ticks = self.ticks;
        let out = ByteWriter::new()
            .write_u32(handle)
            .write_u32(LOCALITY)
            .write_struct(&start_ticks)
            .write_bytes(&nonce_even)
            .into_vec();

        let ord = (TpmOrd::EstablishTransport as u32).to_be_bytes();
        let quirk = VendorQuirk::from_manufacturer(self.manufacturer);
        let mut digest = quirk.initial_digest();
        fold(
            &mut digest,
            &TransportLogIn {
                parameters: sha1(&[&ord, &body[4..]]),
                pub_key_hash: quirk.empty_pub_key_hash(),
            },
        );
        fold(
            &mut digest,
            &TransportLogOut {
                current_ticks: start_ticks,
                parameters: sha1(&[&TPM_SUCCESS.to_be_bytes(), &ord, &out[4..]]),
                locality: LOCALITY,
            },
        );

        self.transport = Some(MockTransport {
            handle,
            secret,
            nonce_even,
            start_ticks,
            digest,
        });
        Ok(out)
    }

    fn execute_transport(&mut self, body: &[u8]) -> TpmResult<Vec<u8>> {
        let (wrapped_cmd, _) = bad_param(read_sized(body, 0))?;
        let inner = bad_param(frame::decode_request(wrapped_cmd))?;
        let inner_ordinal = inner.code();
        let nested = matches!(
            TpmOrd::from_u32(inner_ordinal),
            Some(TpmOrd::EstablishTransport)
                | Some(TpmOrd::ExecuteTransport)
                | Some(TpmOrd::ReleaseTransportSigned)
        );

        let inner_rsp = if nested {
            error_frame(TPM_BAD_PARAMETER)
        } else if inner.tag() == Tag::RquCommand {
            match self.execute_plain(inner_ordinal, inner.body) {
                Ok(out) => {
                    frame::encode(Tag::RspCommand, TPM_SUCCESS, &out, &[]).map_err(|_| TPM_FAIL)?
                }
                Err(code) => error_frame(code),
            }
        } else {
            // Inner sessions are authorized like top-level ones
            self.execute_authorized(inner_ordinal, &inner)
                .unwrap_or_else(error_frame)
        };

        let quirk = VendorQuirk::from_manufacturer(self.manufacturer);
        let now = self.ticks.current_ticks;
        let wrapped_digest = bad_param(wrapped_command_digest(wrapped_cmd))?;
        let inner_digest = bad_param(unwrapped_output_digest(inner_ordinal, &inner_rsp))?;
        let transport = self.transport.as_mut().ok_or(TPM_INVALID_AUTHHANDLE)?;
        fold(
            &mut transport.digest,
            &TransportLogIn {
                parameters: wrapped_digest,
                pub_key_hash: quirk.empty_pub_key_hash(),
            },
        );
        fold(
            &mut transport.digest,
            &TransportLogOut {
                current_ticks: transport.start_ticks.at(now),
                parameters: inner_digest,
                locality: LOCALITY,
            },
        );

        Ok(ByteWriter::new()
            .write_u64(now)
            .write_u32(LOCALITY)
            .write_sized(&inner_rsp)
            .into_vec())
    }

    fn release(&mut self, body: &[u8]) -> TpmResult<Vec<u8>> {
        let (key_handle, off) = bad_param(read_u32(body, 0))?;
        let (anti_replay, _) = bad_param(read_digest(body, off))?;
        self.key(key_handle)?;
        let mut transport = self.transport.take().ok_or(TPM_INVALID_AUTHHANDLE)?;

        let ticks = transport.start_ticks.at(self.ticks.current_ticks);
        let ord = (TpmOrd::ReleaseTransportSigned as u32).to_be_bytes();
        fold(
            &mut transport.digest,
            &TransportLogOut {
                current_ticks: ticks,
                parameters: sha1(&[&ord, &anti_replay]),
                locality: LOCALITY,
            },
        );
        let trans_digest: Digest = transport
            .digest
            .as_slice()
            .try_into()
            .map_err(|_| TPM_FAIL)?;
        let sign_info = SignInfo::transport(anti_replay, trans_digest);
        let signature = sign(&self.key(key_handle)?.key, &sign_info.to_bytes());

        Ok(ByteWriter::new()
            .write_u32(LOCALITY)
            .write_struct(&ticks)
            .write_sized(&signature)
            .into_vec())
    }
}
