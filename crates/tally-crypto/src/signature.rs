//! RSA PKCS#1 v1.5 signatures over SHA-256

use crate::keys::{PrivateKey, PublicKey};
use crate::{CryptoError, CryptoResult};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use sha2::Sha256;

/// Sign a message with RSASSA-PKCS1-v1_5 and SHA-256
pub fn sign(msg: &[u8], private_key: &PrivateKey) -> CryptoResult<Vec<u8>> {
    let signing_key = SigningKey::<Sha256>::new(private_key.as_rsa().clone());
    let signature = signing_key
        .try_sign(msg)
        .map_err(|e| CryptoError::Signing(e.to_string()))?;
    Ok(signature.to_vec())
}

/// Verify a signature against a message and public key
pub fn verify(signature: &[u8], msg: &[u8], public_key: &PublicKey) -> bool {
    if signature.is_empty() {
        return false;
    }
    let signature = match Signature::try_from(signature) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    VerifyingKey::<Sha256>::new(public_key.as_rsa().clone())
        .verify(msg, &signature)
        .is_ok()
}
