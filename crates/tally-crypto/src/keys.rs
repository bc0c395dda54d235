//! RSA key material and its string form

use crate::{CryptoError, CryptoResult};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use std::fmt;
use std::str::FromStr;

/// Public exponent used for every generated key
pub const PUBLIC_EXPONENT: u32 = 65_537;

/// Smallest modulus that still fits a PKCS#1 v1.5 SHA-256 signature
pub const MIN_KEY_BITS: u64 = 512;

/// RSA public key (modulus, public exponent)
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: RsaPublicKey,
}

impl PublicKey {
    /// Create a public key from its parts
    pub fn new(n: BigUint, e: BigUint) -> CryptoResult<Self> {
        if n.bits() == 0 {
            return Err(CryptoError::InvalidPublicKey("zero modulus".into()));
        }
        let inner =
            RsaPublicKey::new(n, e).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Modulus
    pub fn modulus(&self) -> &BigUint {
        self.inner.n()
    }

    /// Public exponent
    pub fn exponent(&self) -> &BigUint {
        self.inner.e()
    }

    /// Modulus size in bits
    pub fn bits(&self) -> u64 {
        self.inner.n().bits() as u64
    }

    pub(crate) fn as_rsa(&self) -> &RsaPublicKey {
        &self.inner
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.modulus(), self.exponent())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.modulus().to_str_radix(16);
        let tail = &n[n.len().saturating_sub(8)..];
        write!(f, "PublicKey({} bits, n=..{}, e={})", self.bits(), tail, self.exponent())
    }
}

impl FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (n, e) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| CryptoError::InvalidPublicKey("expected <modulus>-<exponent>".into()))?;
        let n = parse_decimal(n)
            .ok_or_else(|| CryptoError::InvalidPublicKey(format!("modulus {:?}", n)))?;
        let e = parse_decimal(e)
            .ok_or_else(|| CryptoError::InvalidPublicKey(format!("exponent {:?}", e)))?;
        Self::new(n, e)
    }
}

fn parse_decimal(s: &str) -> Option<BigUint> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    BigUint::parse_bytes(s.as_bytes(), 10)
}

/// RSA private key
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

impl PrivateKey {
    /// Matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.to_public_key(),
        }
    }

    pub(crate) fn as_rsa(&self) -> &RsaPrivateKey {
        &self.inner
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({} bits, <redacted>)", self.inner.n().bits())
    }
}

/// Generate a key pair with a modulus of exactly `bits` bits using the OS RNG
pub fn generate_keypair(bits: u64) -> CryptoResult<(PrivateKey, PublicKey)> {
    generate_keypair_with_rng(bits, &mut OsRng)
}

/// Generate a key pair from the given RNG
pub fn generate_keypair_with_rng<R: RngCore + CryptoRng + ?Sized>(
    bits: u64,
    mut rng: &mut R,
) -> CryptoResult<(PrivateKey, PublicKey)> {
    if bits < MIN_KEY_BITS {
        return Err(CryptoError::KeyTooSmall {
            bits,
            min: MIN_KEY_BITS,
        });
    }

    let inner = RsaPrivateKey::new(&mut rng, bits as usize)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let private_key = PrivateKey { inner };
    let public_key = private_key.public_key();
    Ok((private_key, public_key))
}
