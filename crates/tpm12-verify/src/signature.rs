// SPDX-License-Identifier: MIT OR Apache-2.0

//! RSA PKCS#1 v1.5 / SHA-1 signature verification
//!
//! TPM 1.2 signing keys are exchanged as a bare modulus; the public
//! exponent is always 65537.

use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey};
use sha1::Sha1;
use tracing::debug;

use crate::error::{InvalidKeyReason, VerifyError};

/// Public exponent of every TPM 1.2 RSA key
pub const RSA_PUBLIC_EXPONENT: u32 = 65537;

/// Build an RSA public key from a big-endian modulus
pub fn rsa_public_key(modulus: &[u8]) -> Result<RsaPublicKey, VerifyError> {
    if modulus.iter().all(|&b| b == 0) {
        return Err(InvalidKeyReason::EmptyModulus.into());
    }
    RsaPublicKey::new(
        BigUint::from_bytes_be(modulus),
        BigUint::from(RSA_PUBLIC_EXPONENT),
    )
    .map_err(|e| InvalidKeyReason::Rejected(e.to_string()).into())
}

/// Verify `signature` over `message`
///
/// Returns `Ok(false)` when the signature does not match, and an error
/// only when the modulus itself is unusable.
pub fn verify_sha1_rsa(modulus: &[u8], signature: &[u8], message: &[u8]) -> Result<bool, VerifyError> {
    let verifying_key = RsaVerifyingKey::<Sha1>::new(rsa_public_key(modulus)?);

    let signature = match RsaSignature::try_from(signature) {
        Ok(sig) => sig,
        Err(e) => {
            debug!("signature rejected before verification: {}", e);
            return Ok(false);
        }
    };

    let valid = verifying_key.verify(message, &signature).is_ok();
    debug!(valid, modulus_bytes = modulus.len(), "checked SHA-1 RSA signature");
    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::traits::PublicKeyParts;
    use rsa::RsaPrivateKey;

    fn test_key() -> RsaPrivateKey {
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, 1024).expect("key generation")
    }

    #[test]
    fn test_verify_accepts_matching_signature() {
        let key = test_key();
        let modulus = key.to_public_key().n().to_bytes_be();
        let signature = SigningKey::<Sha1>::new(key).sign(b"sign info").to_vec();
        assert!(verify_sha1_rsa(&modulus, &signature, b"sign info").unwrap());
        assert!(!verify_sha1_rsa(&modulus, &signature, b"sign infp").unwrap());
    }

    #[test]
    fn test_verify_rejects_wrong_modulus() {
        let key = test_key();
        let other = test_key();
        let signature = SigningKey::<Sha1>::new(key).sign(b"message").to_vec();
        let other_modulus = other.to_public_key().n().to_bytes_be();
        assert!(!verify_sha1_rsa(&other_modulus, &signature, b"message").unwrap());
    }

    #[test]
    fn test_verify_rejects_truncated_signature() {
        let key = test_key();
        let modulus = key.to_public_key().n().to_bytes_be();
        let signature = SigningKey::<Sha1>::new(key).sign(b"message").to_vec();
        assert!(!verify_sha1_rsa(&modulus, &signature[1..], b"message").unwrap());
    }

    #[test]
    fn test_zero_modulus_is_an_error() {
        assert!(matches!(
            verify_sha1_rsa(&[0u8; 128], &[1u8; 128], b"message"),
            Err(VerifyError::InvalidKey(InvalidKeyReason::EmptyModulus))
        ));
    }
}
