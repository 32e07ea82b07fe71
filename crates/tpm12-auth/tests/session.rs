// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authorization sessions against a scripted driver
//!
//! The driver checks each inAuth it receives and answers with a fixed
//! body, authorizing it with per-session secrets. Tampering hooks flip
//! single fields after the resAuth has been computed.

use std::cell::RefCell;
use std::rc::Rc;

use tpm12_auth::crypto::hmac_sha1;
use tpm12_auth::{
    execute_auth2, AuthSession, CommandKind, FramesAsBytes, RawCommand, Tpm, TpmError,
};
use tpm12_verify::digest::sha1;
use tpm12_verify::frame::{self, Tag};
use tpm12_verify::result_code::TPM_AUTHFAIL;
use tpm12_verify::{AuthInData, AuthOutData, Decode, Nonce, Secret};

const ORDINAL: u32 = 0x0000_0020;
const OUT_BODY: &[u8] = &[0xDE, 0xAD, 0xBE, 0xEF, 0x01];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tamper {
    ResAuth(usize),
    NonceEven(usize),
    Body,
}

struct Script {
    secrets: Vec<Secret>,
    nonce_evens: Vec<Nonce>,
    digest_skip: usize,
    return_code: u32,
    tamper: Vec<Tamper>,
    in_auth_valid: Vec<bool>,
    requests: Vec<Vec<u8>>,
    counter: u8,
}

impl Script {
    fn new(sessions: &[(Secret, Nonce)]) -> Self {
        Self {
            secrets: sessions.iter().map(|(s, _)| *s).collect(),
            nonce_evens: sessions.iter().map(|(_, n)| *n).collect(),
            digest_skip: 0,
            return_code: 0,
            tamper: Vec::new(),
            in_auth_valid: Vec::new(),
            requests: Vec::new(),
            counter: 0x80,
        }
    }

    fn respond(&mut self, request: &[u8]) -> Vec<u8> {
        self.requests.push(request.to_vec());
        if self.return_code != 0 {
            return frame::encode(Tag::RspCommand, self.return_code, &[0xFF; 7], &[]).unwrap();
        }

        let view = frame::decode_request(request).unwrap();
        let ordinal = view.code().to_be_bytes();
        // Plain requests carry no trailers and may be shorter than the skip
        let params = view.body.get(self.digest_skip..).unwrap_or_default();
        let param_digest = sha1(&[&ordinal, params]);
        let out_digest = sha1(&[&0u32.to_be_bytes(), &ordinal, OUT_BODY]);

        let mut trailers = Vec::new();
        for (index, trailer) in view.trailers.iter().enumerate() {
            let auth = AuthInData::from_bytes(trailer).unwrap();
            let cont = [auth.continue_session as u8];
            let expected = hmac_sha1(
                &self.secrets[index],
                &[&param_digest, &self.nonce_evens[index], &auth.nonce_odd, &cont],
            )
            .unwrap();
            self.in_auth_valid.push(expected == auth.in_auth);

            self.counter += 1;
            let nonce_even = [self.counter; 20];
            let res_auth = hmac_sha1(
                &self.secrets[index],
                &[&out_digest, &nonce_even, &auth.nonce_odd, &cont],
            )
            .unwrap();
            let mut out = AuthOutData {
                nonce_even,
                continue_session: auth.continue_session,
                res_auth,
            };
            if self.tamper.contains(&Tamper::ResAuth(index)) {
                out.res_auth[19] ^= 0x80;
            }
            if self.tamper.contains(&Tamper::NonceEven(index)) {
                out.nonce_even[0] ^= 0x01;
            }
            self.nonce_evens[index] = nonce_even;
            trailers.push(out.to_array());
        }

        let mut body = OUT_BODY.to_vec();
        if self.tamper.contains(&Tamper::Body) {
            body[4] ^= 0x01;
        }
        let refs: Vec<&[u8]> = trailers.iter().map(|t| t.as_slice()).collect();
        let tag = Tag::response(refs.len()).unwrap();
        frame::encode(tag, 0, &body, &refs).unwrap()
    }
}

fn scripted(sessions: &[(Secret, Nonce)]) -> (Tpm, Rc<RefCell<Script>>) {
    let script = Rc::new(RefCell::new(Script::new(sessions)));
    let driver_script = Rc::clone(&script);
    let tpm = Tpm::new(move |request: &[u8]| -> anyhow::Result<Vec<u8>> {
        Ok(driver_script.borrow_mut().respond(request))
    });
    (tpm, script)
}

const SECRET1: Secret = [0x11; 20];
const SECRET2: Secret = [0x22; 20];
const NONCE1: Nonce = [0x01; 20];
const NONCE2: Nonce = [0x02; 20];

fn auth1_command() -> RawCommand {
    RawCommand::new(CommandKind::Auth1, ORDINAL, vec![1, 2, 3, 4, 5, 6])
}

fn auth2_command() -> RawCommand {
    RawCommand::new(CommandKind::Auth2, ORDINAL, vec![0, 0, 0, 9, 7, 7, 7]).with_digest_skip(4)
}

// ============================================================================
// Auth1
// ============================================================================

#[test]
fn test_auth1_exchange_verifies_both_ways() {
    let (tpm, script) = scripted(&[(SECRET1, NONCE1)]);
    let mut session = AuthSession::resume(tpm, 0x0200_0001, NONCE1, SECRET1);

    let exchange = session.execute_exchange(&mut auth1_command(), true).unwrap();
    assert_eq!(exchange.output.body, OUT_BODY);
    assert_eq!(exchange.output.return_code, 0);
    assert_eq!(script.borrow().in_auth_valid, vec![true]);

    // Adopted the TPM's nonce and stays open
    assert_eq!(session.nonce_even(), &[0x81; 20]);
    assert!(session.is_active());

    // A second exchange authorizes against the rolled nonce
    session.execute(&mut auth1_command(), true).unwrap();
    assert_eq!(script.borrow().in_auth_valid, vec![true, true]);
}

#[test]
fn test_auth1_trailer_carries_session_values() {
    let (tpm, script) = scripted(&[(SECRET1, NONCE1)]);
    let mut session = AuthSession::resume(tpm, 0x0200_0001, NONCE1, SECRET1);
    session.execute(&mut auth1_command(), false).unwrap();

    let request = script.borrow().requests[0].clone();
    let view = frame::decode_request(&request).unwrap();
    assert_eq!(view.tag(), Tag::RquAuth1Command);
    let auth = AuthInData::from_bytes(view.trailers[0]).unwrap();
    assert_eq!(auth.auth_handle, 0x0200_0001);
    assert!(!auth.continue_session);
    assert_eq!(&auth.nonce_odd, session.nonce_odd());
}

#[test]
fn test_auth1_nonce_odd_rotates() {
    let (tpm, script) = scripted(&[(SECRET1, NONCE1)]);
    let mut session = AuthSession::resume(tpm, 0x0200_0001, NONCE1, SECRET1);
    session.execute(&mut auth1_command(), true).unwrap();
    session.execute(&mut auth1_command(), true).unwrap();

    let script = script.borrow();
    let odd: Vec<_> = script
        .requests
        .iter()
        .map(|r| {
            let view = frame::decode_request(r).unwrap();
            AuthInData::from_bytes(view.trailers[0]).unwrap().nonce_odd
        })
        .collect();
    assert_ne!(odd[0], odd[1]);
}

#[test]
fn test_auth1_discontinued_session_goes_inactive() {
    let (tpm, _script) = scripted(&[(SECRET1, NONCE1)]);
    let mut session = AuthSession::resume(tpm, 0x0200_0001, NONCE1, SECRET1);
    session.execute(&mut auth1_command(), false).unwrap();
    assert!(!session.is_active());
    assert!(matches!(
        session.execute(&mut auth1_command(), true),
        Err(TpmError::SessionState { .. })
    ));
}

#[test]
fn test_auth1_rejects_any_tampered_field() {
    for tamper in [Tamper::ResAuth(0), Tamper::NonceEven(0), Tamper::Body] {
        let (tpm, script) = scripted(&[(SECRET1, NONCE1)]);
        script.borrow_mut().tamper.push(tamper);
        let mut session = AuthSession::resume(tpm, 0x0200_0001, NONCE1, SECRET1);

        let err = session.execute(&mut auth1_command(), true).unwrap_err();
        match err {
            TpmError::AuthOutDataMismatch {
                ordinal, handles, ..
            } => {
                assert_eq!(ordinal, ORDINAL);
                assert_eq!(handles, vec![0x0200_0001]);
            }
            other => panic!("{:?}: unexpected error {other}", tamper),
        }
        assert_eq!(session.nonce_even(), &NONCE1, "{:?}", tamper);
    }
}

#[test]
fn test_auth1_wrong_secret_is_mismatch() {
    let (tpm, script) = scripted(&[(SECRET1, NONCE1)]);
    let mut session = AuthSession::resume(tpm, 0x0200_0001, NONCE1, SECRET2);
    assert!(matches!(
        session.execute(&mut auth1_command(), true),
        Err(TpmError::AuthOutDataMismatch { .. })
    ));
    assert_eq!(script.borrow().in_auth_valid, vec![false]);
}

#[test]
fn test_return_code_skips_verification() {
    let (tpm, script) = scripted(&[(SECRET1, NONCE1)]);
    script.borrow_mut().return_code = TPM_AUTHFAIL;
    let mut session = AuthSession::resume(tpm, 0x0200_0001, NONCE1, SECRET1);

    let err = session.execute(&mut auth1_command(), true).unwrap_err();
    match err {
        TpmError::TpmReturnCode {
            ordinal,
            code,
            name,
        } => {
            assert_eq!(ordinal, ORDINAL);
            assert_eq!(code, TPM_AUTHFAIL);
            assert_eq!(name, "TPM_AUTHFAIL");
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(session.nonce_even(), &NONCE1);
    assert!(session.is_active());
}

#[test]
fn test_no_auth_command_bypasses_session() {
    let (tpm, script) = scripted(&[(SECRET1, NONCE1)]);
    let mut session = AuthSession::resume(tpm, 0x0200_0001, NONCE1, SECRET1);
    let mut cmd = auth1_command();
    cmd.switch_to_no_auth().unwrap();

    let out = session.execute(&mut cmd, true).unwrap();
    assert_eq!(out.body, OUT_BODY);
    let request = script.borrow().requests[0].clone();
    assert_eq!(&request[0..2], &[0x00, 0xC1]);
    assert_eq!(request.len(), 10 + 6);
    assert_eq!(session.nonce_even(), &NONCE1);
}

#[test]
fn test_auth1_session_refuses_two_session_command() {
    let (tpm, script) = scripted(&[(SECRET1, NONCE1)]);
    let mut session = AuthSession::resume(tpm, 0x0200_0001, NONCE1, SECRET1);
    assert!(matches!(
        session.execute(&mut auth2_command(), true),
        Err(TpmError::UnsupportedOperation(_))
    ));
    assert!(script.borrow().requests.is_empty());
}

#[test]
fn test_authorize_and_verify_as_separate_steps() {
    let (tpm, script) = scripted(&[(SECRET1, NONCE1)]);
    let mut session = AuthSession::resume(tpm.clone(), 0x0200_0001, NONCE1, SECRET1);
    let mut cmd = auth1_command();

    let request = session.authorize(&mut cmd, true).unwrap();
    assert_eq!(session.nonce_even(), &NONCE1);
    let response = tpm.transmit(&request).unwrap();
    let out = session.verify_response(&cmd, &response, true).unwrap();
    assert_eq!(out.body, OUT_BODY);
    assert_eq!(session.nonce_even(), &[0x81; 20]);
    assert_eq!(script.borrow().in_auth_valid, vec![true]);

    let mut plain = RawCommand::new(CommandKind::Plain, ORDINAL, vec![1]);
    assert!(matches!(
        session.authorize(&mut plain, true),
        Err(TpmError::IllegalArgument(_))
    ));
    assert_eq!(script.borrow().requests.len(), 1);
}

// ============================================================================
// Auth2
// ============================================================================

fn auth2_pair() -> (AuthSession, AuthSession, Rc<RefCell<Script>>) {
    let (tpm, script) = scripted(&[(SECRET1, NONCE1), (SECRET2, NONCE2)]);
    script.borrow_mut().digest_skip = 4;
    let session1 = AuthSession::resume(tpm.clone(), 0x0200_0001, NONCE1, SECRET1);
    let session2 = AuthSession::resume(tpm, 0x0200_0002, NONCE2, SECRET2);
    (session1, session2, script)
}

#[test]
fn test_auth2_both_sessions_verify() {
    let (mut s1, mut s2, script) = auth2_pair();
    let out = execute_auth2(&mut auth2_command(), &mut s1, true, &mut s2, true).unwrap();
    assert_eq!(out.body, OUT_BODY);
    assert_eq!(script.borrow().in_auth_valid, vec![true, true]);
    assert_eq!(s1.nonce_even(), &[0x81; 20]);
    assert_eq!(s2.nonce_even(), &[0x82; 20]);

    let request = script.borrow().requests[0].clone();
    let view = frame::decode_request(&request).unwrap();
    assert_eq!(view.tag(), Tag::RquAuth2Command);
    let a1 = AuthInData::from_bytes(view.trailers[0]).unwrap();
    let a2 = AuthInData::from_bytes(view.trailers[1]).unwrap();
    assert_eq!((a1.auth_handle, a2.auth_handle), (0x0200_0001, 0x0200_0002));
    assert_ne!(a1.nonce_odd, a2.nonce_odd);
}

#[test]
fn test_auth2_accepts_either_session() {
    for bad in [0, 1] {
        let (mut s1, mut s2, script) = auth2_pair();
        script.borrow_mut().tamper.push(Tamper::ResAuth(bad));

        execute_auth2(&mut auth2_command(), &mut s1, true, &mut s2, true).unwrap();
        // Only the session that verified rolls its nonce
        let (bad_session, good_session, bad_nonce) = if bad == 0 {
            (&s1, &s2, NONCE1)
        } else {
            (&s2, &s1, NONCE2)
        };
        assert_eq!(bad_session.nonce_even(), &bad_nonce);
        assert_ne!(good_session.nonce_even(), &NONCE1);
        assert_ne!(good_session.nonce_even(), &NONCE2);
    }
}

#[test]
fn test_auth2_rejects_when_neither_verifies() {
    let (mut s1, mut s2, script) = auth2_pair();
    script
        .borrow_mut()
        .tamper
        .extend([Tamper::ResAuth(0), Tamper::ResAuth(1)]);

    let err = execute_auth2(&mut auth2_command(), &mut s1, true, &mut s2, true).unwrap_err();
    match err {
        TpmError::AuthOutDataMismatch { handles, .. } => {
            assert_eq!(handles, vec![0x0200_0001, 0x0200_0002]);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(s1.nonce_even(), &NONCE1);
    assert_eq!(s2.nonce_even(), &NONCE2);
}

#[test]
fn test_auth2_deactivates_discontinued_first_session() {
    let (mut s1, mut s2, _script) = auth2_pair();
    execute_auth2(&mut auth2_command(), &mut s1, false, &mut s2, true).unwrap();
    assert!(!s1.is_active());
    assert!(s2.is_active());
}

#[test]
fn test_auth2_requires_active_sessions() {
    let (mut s1, _s2, script) = auth2_pair();
    let mut inactive = AuthSession::new(s1.tpm().clone());
    assert!(matches!(
        execute_auth2(&mut auth2_command(), &mut s1, true, &mut inactive, true),
        Err(TpmError::SessionState { .. })
    ));
    assert!(script.borrow().requests.is_empty());
}

#[test]
fn test_auth2_plain_command_goes_direct() {
    let (mut s1, mut s2, script) = auth2_pair();
    let mut cmd = RawCommand::new(CommandKind::Plain, ORDINAL, vec![1]);
    let out = execute_auth2(&mut cmd, &mut s1, true, &mut s2, true).unwrap();
    assert_eq!(out.body, OUT_BODY);
    assert_eq!(script.borrow().requests[0].len(), 11);
    assert_eq!(s1.nonce_even(), &NONCE1);
}
