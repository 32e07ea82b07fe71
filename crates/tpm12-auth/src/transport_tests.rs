// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end session tests against the mock TPM

use tpm12_verify::frame;
use tpm12_verify::log::TPM_MANUFACTURER_INFINEON;
use tpm12_verify::result_code::{TPM_AUTHFAIL, TPM_BADINDEX, TPM_BAD_ORDINAL};
use tpm12_verify::{verify_transport_log_json, EntryKind, Secret, TransportLog, VendorQuirk};

use crate::auth2::execute_auth2;
use crate::command::{CommandKind, FramesAsBytes, OpaqueOutput, RawCommand};
use crate::commands::{ChangeAuthOwner, Extend, GetRandom, PcrRead};
use crate::mock::{MockTpm, MOCK_SIGNING_KEY};
use crate::oiap::{oiap, osap};
use crate::registry::{DecodedOutput, OutputRegistry};
use crate::transport::{
    InnerAuth, ReleaseTransportSigned, TransportConfig, TransportSession, Unwrapped,
};
use crate::{Tpm, TpmError, TpmOrd, TPM_ET_OWNER, TPM_KH_OWNER, TPM_KH_TRANSPORT};

const SECRET: Secret = [0x42; 20];
const KEY_AUTH: Secret = [0x5C; 20];
const ANTI_REPLAY: [u8; 20] = [0xA7; 20];

fn mock() -> MockTpm {
    MockTpm::new().with_signing_key(KEY_AUTH)
}

fn started(mock: &MockTpm, config: TransportConfig) -> TransportSession {
    let tpm = mock.tpm();
    let mut transport = TransportSession::new(&tpm, config).unwrap();
    transport
        .start(TPM_KH_TRANSPORT, None, &SECRET, &SECRET)
        .unwrap();
    transport
}

fn modulus(mock: &MockTpm) -> Vec<u8> {
    mock.modulus(MOCK_SIGNING_KEY).unwrap()
}

// ============================================================================
// Transport sessions
// ============================================================================

#[test]
fn test_full_session_verifies() {
    let mock = mock();
    let mut transport = started(&mock, TransportConfig::default());
    assert!(transport.is_active());
    assert_eq!(transport.log().quirk(), VendorQuirk::EmptyDigest);

    let pcr = transport
        .execute_wrapped(&PcrRead::new(0), true)
        .unwrap()
        .output()
        .unwrap();
    assert_eq!(pcr.digest, mock.pcr(0));

    let random = transport
        .execute_wrapped(&GetRandom::new(16), true)
        .unwrap()
        .output()
        .unwrap();
    assert_eq!(random.random_bytes.len(), 16);

    let release = transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap();
    assert!(!transport.is_active());
    assert!(!mock.transport_active());
    assert_eq!(release.signature.len(), 128);

    let kinds: Vec<_> = transport.log().entries().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [
            EntryKind::Establish,
            EntryKind::Execute,
            EntryKind::Execute,
            EntryKind::Release
        ]
    );
    assert!(transport.verify(&modulus(&mock)).unwrap());
    assert_eq!(transport.log().anti_replay().unwrap(), ANTI_REPLAY);
}

#[test]
fn test_wrong_key_does_not_verify() {
    let mock = mock();
    let other = MockTpm::new().with_signing_key(KEY_AUTH);
    let mut transport = started(&mock, TransportConfig::default());
    transport.execute_wrapped(&PcrRead::new(1), true).unwrap();
    transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap();

    assert!(!transport.verify(&modulus(&other)).unwrap());
}

#[test]
fn test_log_survives_json() {
    let mock = mock();
    let mut transport = started(&mock, TransportConfig::default());
    transport.execute_wrapped(&GetRandom::new(8), true).unwrap();
    transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap();

    let json = transport.log().to_json().unwrap();
    let restored = TransportLog::from_json(&json).unwrap();
    assert_eq!(&restored, transport.log());

    let result = verify_transport_log_json(&json, &hex::encode(modulus(&mock))).unwrap();
    assert!(result.valid);
    assert_eq!(result.entries, 3);
}

#[test]
fn test_infineon_log_uses_zeroed_digest() {
    let mock = MockTpm::new()
        .with_manufacturer(TPM_MANUFACTURER_INFINEON)
        .with_signing_key(KEY_AUTH);
    let mut transport = started(&mock, TransportConfig::default());
    assert_eq!(transport.log().quirk(), VendorQuirk::ZeroedDigest);
    assert_eq!(transport.log().manufacturer(), TPM_MANUFACTURER_INFINEON);

    transport.execute_wrapped(&PcrRead::new(2), true).unwrap();
    transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap();
    assert!(transport.verify(&modulus(&mock)).unwrap());
}

#[test]
fn test_quirk_override_changes_chain() {
    let mock = MockTpm::new()
        .with_manufacturer(TPM_MANUFACTURER_INFINEON)
        .with_signing_key(KEY_AUTH);
    let config = TransportConfig::default().with_quirk(VendorQuirk::EmptyDigest);
    let mut transport = started(&mock, config);
    transport.execute_wrapped(&PcrRead::new(2), true).unwrap();
    transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap();

    // The chip chained with zeroed digests, the log with empty ones
    assert!(!transport.verify(&modulus(&mock)).unwrap());
}

#[test]
fn test_establish_under_key_uses_one_shot_session() {
    let mock = mock();
    let tpm = mock.tpm();
    let mut transport = TransportSession::new(&tpm, TransportConfig::default()).unwrap();
    transport
        .start(MOCK_SIGNING_KEY, Some(&KEY_AUTH), &SECRET, &SECRET)
        .unwrap();
    // OIAP + establish after the capability query
    assert_eq!(mock.received().len(), 3);
    assert_eq!(mock.open_sessions(), 0);

    transport.execute_wrapped(&PcrRead::new(0), true).unwrap();
    transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap();
    assert!(transport.verify(&modulus(&mock)).unwrap());
}

#[test]
fn test_establish_with_wrong_key_auth_fails() {
    let mock = mock();
    let tpm = mock.tpm();
    let mut transport = TransportSession::new(&tpm, TransportConfig::default()).unwrap();
    let err = transport
        .start(MOCK_SIGNING_KEY, Some(&[0u8; 20]), &SECRET, &SECRET)
        .unwrap_err();
    assert!(matches!(
        err,
        TpmError::TpmReturnCode { code: TPM_AUTHFAIL, .. }
    ));
    assert!(!transport.is_active());
    assert!(transport.log().is_empty());
}

#[test]
fn test_wrapped_extend_updates_pcr() {
    let mock = mock();
    let mut transport = started(&mock, TransportConfig::default());
    let out = transport
        .execute_wrapped(&Extend::new(3, [0x11; 20]), true)
        .unwrap()
        .output()
        .unwrap();
    assert_eq!(out.out_digest, mock.pcr(3));
    assert_ne!(out.out_digest, [0u8; 20]);
}

#[test]
fn test_inner_error_is_opaque_and_logged() {
    let mock = mock();
    let mut transport = started(&mock, TransportConfig::default());
    let (envelope, unwrapped) = transport
        .execute_transport(&PcrRead::new(99), true)
        .unwrap();
    assert!(unwrapped.is_opaque());
    let Unwrapped::Opaque(bytes) = unwrapped else {
        unreachable!()
    };
    assert_eq!(bytes, envelope.wrapped_rsp);
    assert_eq!(OpaqueOutput::from_frame(&bytes).unwrap().return_code, TPM_BADINDEX);
    assert_eq!(transport.log().len(), 2);

    transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap();
    assert!(transport.verify(&modulus(&mock)).unwrap());
}

#[test]
fn test_envelope_reports_ticks_and_locality() {
    let mock = mock();
    let mut transport = started(&mock, TransportConfig::default());
    let (first, _) = transport.execute_transport(&PcrRead::new(0), true).unwrap();
    let (second, _) = transport.execute_transport(&PcrRead::new(0), true).unwrap();
    assert_eq!(first.locality, 0);
    assert!(second.current_ticks > first.current_ticks);
}

#[test]
fn test_corrupted_envelope_auth_is_rejected() {
    let mock = mock();
    let mut transport = started(&mock, TransportConfig::default());
    let handle = transport.session().handle();
    let nonce_before = *transport.session().nonce_even();

    mock.corrupt_next_res_auth(0);
    let err = transport.execute_wrapped(&PcrRead::new(0), true).unwrap_err();
    match err {
        TpmError::AuthOutDataMismatch {
            ordinal, handles, ..
        } => {
            assert_eq!(ordinal, TpmOrd::ExecuteTransport as u32);
            assert_eq!(handles, vec![handle]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.session().nonce_even(), &nonce_before);
    assert_eq!(transport.log().len(), 1);
}

#[test]
fn test_release_accepts_single_matching_session() {
    for corrupted in [0, 1] {
        let mock = mock();
        let mut transport = started(&mock, TransportConfig::default());
        transport.execute_wrapped(&PcrRead::new(0), true).unwrap();

        mock.corrupt_next_res_auth(corrupted);
        transport
            .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
            .unwrap();
        assert!(!transport.is_active());
        assert!(transport.verify(&modulus(&mock)).unwrap());
    }
}

#[test]
fn test_release_rejects_when_no_session_matches() {
    let mock = mock();
    let mut transport = started(&mock, TransportConfig::default());
    let handle = transport.session().handle();

    mock.corrupt_next_res_auth(0);
    mock.corrupt_next_res_auth(1);
    let err = transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap_err();
    match err {
        TpmError::AuthOutDataMismatch { handles, .. } => {
            assert_eq!(handles.len(), 2);
            assert_eq!(handles[1], handle);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.log().len(), 1);
}

#[test]
fn test_release_with_wrong_key_auth_fails() {
    let mock = mock();
    let mut transport = started(&mock, TransportConfig::default());
    let err = transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &[0u8; 20])
        .unwrap_err();
    assert!(matches!(
        err,
        TpmError::TpmReturnCode { code: TPM_AUTHFAIL, .. }
    ));
    assert!(transport.is_active());
}

#[test]
fn test_session_state_errors_send_nothing() {
    let mock = mock();
    let tpm = mock.tpm();
    let mut transport = TransportSession::new(&tpm, TransportConfig::default()).unwrap();
    let sent = mock.received().len();

    assert!(matches!(
        transport.execute_wrapped(&PcrRead::new(0), true),
        Err(TpmError::SessionState { .. })
    ));
    assert!(matches!(
        transport.release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH),
        Err(TpmError::SessionState { .. })
    ));
    assert_eq!(mock.received().len(), sent);

    transport
        .start(TPM_KH_TRANSPORT, None, &SECRET, &SECRET)
        .unwrap();
    let sent = mock.received().len();
    assert!(matches!(
        transport.start(TPM_KH_TRANSPORT, None, &SECRET, &SECRET),
        Err(TpmError::SessionState { .. })
    ));
    assert_eq!(mock.received().len(), sent);
}

#[test]
fn test_released_session_cannot_restart() {
    let mock = mock();
    let mut transport = started(&mock, TransportConfig::default());
    transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap();
    assert!(matches!(
        transport.start(TPM_KH_TRANSPORT, None, &SECRET, &SECRET),
        Err(TpmError::SessionState { .. })
    ));
}

#[test]
fn test_encrypted_session_refuses_to_wrap() {
    let mock = mock();
    let config = TransportConfig::default().with_attributes(0x0000_0003);
    let mut transport = started(&mock, config);
    assert!(transport.is_encrypted());
    assert!(matches!(
        transport.execute_wrapped(&PcrRead::new(0), true),
        Err(TpmError::UnsupportedOperation(_))
    ));
}

fn started_on(tpm: &Tpm) -> TransportSession {
    let mut transport = TransportSession::new(tpm, TransportConfig::default()).unwrap();
    transport
        .start(TPM_KH_TRANSPORT, None, &SECRET, &SECRET)
        .unwrap();
    transport
}

fn wrapped_trailers(transport: &TransportSession, index: usize) -> usize {
    let entry = &transport.log().entries()[index];
    frame::decode_request(&entry.orig_cmd).unwrap().trailers.len()
}

#[test]
fn test_wrapped_owner_auth_change_verifies() {
    let mock = MockTpm::new()
        .with_owner_auth([0x11; 20])
        .with_signing_key(KEY_AUTH);
    let tpm = mock.tpm();
    let mut transport = started_on(&tpm);
    let mut owner = osap(&tpm, TPM_ET_OWNER, TPM_KH_OWNER, &[0x11; 20]).unwrap();

    let unwrapped = transport
        .execute_wrapped_authorized(
            &mut ChangeAuthOwner::owner([0x22; 20]),
            InnerAuth::Auth1 {
                session: &mut owner,
                continue_session: false,
            },
            true,
        )
        .unwrap();
    assert_eq!(unwrapped, Unwrapped::Output(()));
    assert_eq!(mock.owner_auth(), [0x22; 20]);
    assert!(!owner.is_active());
    assert_eq!(wrapped_trailers(&transport, 1), 1);

    transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap();
    assert_eq!(mock.open_sessions(), 0);
    assert!(transport.verify(&modulus(&mock)).unwrap());
}

#[test]
fn test_wrapped_inner_mismatch_stays_logged() {
    let mock = MockTpm::new()
        .with_owner_auth([0x11; 20])
        .with_signing_key(KEY_AUTH);
    let tpm = mock.tpm();
    let mut transport = started_on(&tpm);
    let mut owner = osap(&tpm, TPM_ET_OWNER, TPM_KH_OWNER, &[0x11; 20]).unwrap();
    let nonce_before = *owner.nonce_even();

    // The inner response is the first authorized one the mock builds
    mock.corrupt_next_res_auth(0);
    let err = transport
        .execute_wrapped_authorized(
            &mut ChangeAuthOwner::owner([0x22; 20]),
            InnerAuth::Auth1 {
                session: &mut owner,
                continue_session: true,
            },
            true,
        )
        .unwrap_err();
    assert!(matches!(err, TpmError::AuthOutDataMismatch { .. }));
    assert_eq!(owner.nonce_even(), &nonce_before);
    assert_eq!(transport.log().len(), 2);
    assert!(transport.is_active());

    transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap();
    assert!(transport.verify(&modulus(&mock)).unwrap());
}

#[test]
fn test_wrapped_two_session_command_is_chained() {
    let mock = mock();
    let tpm = mock.tpm();
    let mut transport = started_on(&tpm);
    let mut session1 = oiap(&tpm, &KEY_AUTH).unwrap();
    let mut session2 = oiap(&tpm, &SECRET).unwrap();
    let nonce1 = *session1.nonce_even();

    let mut cmd = RawCommand::new(CommandKind::Auth2, 0xDD, vec![0, 0, 0, 1, 9, 9]);
    let (_, unwrapped) = transport
        .execute_transport_authorized(
            &mut cmd,
            InnerAuth::Auth2 {
                session1: &mut session1,
                continue1: true,
                session2: &mut session2,
                continue2: true,
            },
            true,
        )
        .unwrap();
    let Unwrapped::Opaque(bytes) = unwrapped else {
        panic!("unknown ordinal decoded");
    };
    assert_eq!(
        OpaqueOutput::from_frame(&bytes).unwrap().return_code,
        TPM_BAD_ORDINAL
    );
    assert_eq!(session1.nonce_even(), &nonce1);
    assert_eq!(wrapped_trailers(&transport, 1), 2);

    transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap();
    assert!(transport.verify(&modulus(&mock)).unwrap());
}

#[test]
fn test_inner_sessions_must_fit_command() {
    let mock = mock();
    let tpm = mock.tpm();
    let mut transport = started_on(&tpm);
    let mut owner = osap(&tpm, TPM_ET_OWNER, TPM_KH_OWNER, &mock.owner_auth()).unwrap();
    let other = MockTpm::new();
    let mut foreign = oiap(&other.tpm(), &[0u8; 20]).unwrap();
    let sent = mock.received().len();

    assert!(matches!(
        transport.execute_wrapped(&ChangeAuthOwner::owner([1; 20]), true),
        Err(TpmError::IllegalArgument(_))
    ));
    assert!(matches!(
        transport.execute_wrapped_authorized(
            &mut ChangeAuthOwner::owner([1; 20]),
            InnerAuth::None,
            true
        ),
        Err(TpmError::IllegalArgument(_))
    ));
    assert!(matches!(
        transport.execute_wrapped_authorized(
            &mut PcrRead::new(0),
            InnerAuth::Auth1 {
                session: &mut owner,
                continue_session: true,
            },
            true
        ),
        Err(TpmError::IllegalArgument(_))
    ));
    assert!(matches!(
        transport.execute_wrapped_authorized(
            &mut ChangeAuthOwner::owner([1; 20]),
            InnerAuth::Auth1 {
                session: &mut foreign,
                continue_session: true,
            },
            true
        ),
        Err(TpmError::IllegalArgument(_))
    ));
    assert_eq!(mock.received().len(), sent);
    assert_eq!(transport.log().len(), 1);
}

#[test]
fn test_registry_decodes_log_entries() {
    let mock = mock();
    let mut transport = started(&mock, TransportConfig::default());
    transport.execute_wrapped(&PcrRead::new(0), true).unwrap();
    transport
        .release_signed(MOCK_SIGNING_KEY, &ANTI_REPLAY, &KEY_AUTH)
        .unwrap();

    let registry = OutputRegistry::with_defaults();
    let decoded: Vec<_> = transport
        .log()
        .entries()
        .iter()
        .map(|entry| registry.decode_entry(entry).unwrap())
        .collect();
    assert_eq!(decoded[0].0, TpmOrd::EstablishTransport as u32);
    assert!(matches!(decoded[0].1, DecodedOutput::EstablishTransport(_)));
    assert_eq!(
        decoded[1].1,
        DecodedOutput::PcrRead(crate::commands::PcrReadOutput {
            digest: mock.pcr(0)
        })
    );
    assert!(matches!(
        decoded[2].1,
        DecodedOutput::ReleaseTransportSigned(_)
    ));
}

// ============================================================================
// OIAP / OSAP
// ============================================================================

#[test]
fn test_change_owner_auth_over_osap() {
    let mock = MockTpm::new().with_owner_auth([0x11; 20]);
    let tpm = mock.tpm();

    let mut session = osap(&tpm, TPM_ET_OWNER, TPM_KH_OWNER, &[0x11; 20]).unwrap();
    let mut cmd = ChangeAuthOwner::owner([0x22; 20]);
    session.execute(&mut cmd, true).unwrap();
    assert_eq!(mock.owner_auth(), [0x22; 20]);
    assert_ne!(cmd.enc_new_auth(), &[0x22; 20]);
    assert!(session.is_active());

    // The rolled nonce authorizes the next exchange
    let mut cmd = ChangeAuthOwner::owner([0x33; 20]);
    session.execute(&mut cmd, false).unwrap();
    assert_eq!(mock.owner_auth(), [0x33; 20]);
    assert!(!session.is_active());
    assert_eq!(mock.open_sessions(), 0);
}

#[test]
fn test_wrong_owner_auth_surfaces_return_code() {
    let mock = MockTpm::new().with_owner_auth([0x11; 20]);
    let tpm = mock.tpm();

    let mut session = osap(&tpm, TPM_ET_OWNER, TPM_KH_OWNER, &[0x99; 20]).unwrap();
    let nonce_before = *session.nonce_even();
    let err = session
        .execute(&mut ChangeAuthOwner::owner([0x22; 20]), true)
        .unwrap_err();
    assert!(matches!(
        err,
        TpmError::TpmReturnCode { code: TPM_AUTHFAIL, .. }
    ));
    assert_eq!(session.nonce_even(), &nonce_before);
    assert_eq!(mock.owner_auth(), [0x11; 20]);
}

#[test]
fn test_oiap_session_terminates() {
    let mock = MockTpm::new();
    let tpm = mock.tpm();
    let mut session = oiap(&tpm, &[0u8; 20]).unwrap();
    assert!(session.is_active());
    assert_eq!(mock.open_sessions(), 1);

    session.terminate().unwrap();
    assert!(!session.is_active());
    assert_eq!(mock.open_sessions(), 0);
    assert!(matches!(
        session.terminate(),
        Err(TpmError::SessionState { .. })
    ));
    assert!(matches!(
        session.start_oiap().and_then(|_| session.start_oiap()),
        Err(TpmError::SessionState { .. })
    ));
}

#[test]
fn test_auth2_requires_one_device() {
    let first = mock();
    let second = MockTpm::new();
    let mut session1 = oiap(&first.tpm(), &KEY_AUTH).unwrap();
    let mut session2 = oiap(&second.tpm(), &SECRET).unwrap();
    let sent = first.received().len() + second.received().len();

    let mut cmd = ReleaseTransportSigned::new(MOCK_SIGNING_KEY, ANTI_REPLAY);
    assert!(matches!(
        execute_auth2(&mut cmd, &mut session1, false, &mut session2, false),
        Err(TpmError::IllegalArgument(_))
    ));
    assert_eq!(first.received().len() + second.received().len(), sent);
}

#[test]
fn test_auth2_runs_single_session_command_on_first_session() {
    let mock = MockTpm::new().with_owner_auth([0x11; 20]);
    let tpm = mock.tpm();
    let mut session1 = osap(&tpm, TPM_ET_OWNER, TPM_KH_OWNER, &[0x11; 20]).unwrap();
    let mut session2 = oiap(&tpm, &[0u8; 20]).unwrap();
    let nonce2 = *session2.nonce_even();

    let mut cmd = ChangeAuthOwner::owner([0x44; 20]);
    execute_auth2(&mut cmd, &mut session1, false, &mut session2, true).unwrap();
    assert_eq!(mock.owner_auth(), [0x44; 20]);
    assert!(!session1.is_active());
    assert_eq!(session2.nonce_even(), &nonce2);
    assert_eq!(cmd.kind(), CommandKind::Auth1);
}
