//! Long-term DSA identity keys: signing, verification, and the OTR wire
//! serialization.
//!
//! A public key travels as `keyType (0x0000) || MPI(p) || MPI(q) ||
//! MPI(g) || MPI(y)`; a signature is the concatenation of `r` and `s`,
//! each padded to the byte length of `q`.

use num_bigint::BigUint;
use num_traits::Zero;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::types::{OtrError, Result};
use crate::wire::{append_mpi, append_short, extract_mpi, extract_short};

/// Key type tag for DSA public keys.
const KEY_TYPE_DSA: u16 = 0x0000;

/// A peer's long-term DSA public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    p: BigUint,
    q: BigUint,
    g: BigUint,
    y: BigUint,
}

/// Our long-term DSA private key.
#[derive(Clone)]
pub struct PrivateKey {
    public_key: PublicKey,
    x: BigUint,
}

impl PublicKey {
    /// Builds a public key from its raw DSA components.
    pub fn from_components(p: BigUint, q: BigUint, g: BigUint, y: BigUint) -> Self {
        Self { p, q, g, y }
    }

    /// Serializes this key in its wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    pub(crate) fn encode_into(&self, dst: &mut Vec<u8>) {
        append_short(dst, KEY_TYPE_DSA);
        append_mpi(dst, &self.p);
        append_mpi(dst, &self.q);
        append_mpi(dst, &self.g);
        append_mpi(dst, &self.y);
    }

    /// Parses a wire-form public key, returning the remaining bytes.
    pub(crate) fn decode(data: &[u8]) -> Result<(&[u8], Self)> {
        let (rest, key_type) = extract_short(data)?;
        if key_type != KEY_TYPE_DSA {
            return Err(OtrError::InvalidOtrMessage);
        }
        let (rest, p) = extract_mpi(rest)?;
        let (rest, q) = extract_mpi(rest)?;
        let (rest, g) = extract_mpi(rest)?;
        let (rest, y) = extract_mpi(rest)?;
        if p.is_zero() || q.is_zero() || g.is_zero() || y.is_zero() {
            return Err(OtrError::InvalidOtrMessage);
        }
        Ok((rest, Self { p, q, g, y }))
    }

    /// Byte length of one signature half, set by the size of `q`.
    fn parameter_len(&self) -> usize {
        ((self.q.bits() + 7) / 8) as usize
    }

    /// Total byte length of a signature made with this key.
    pub(crate) fn signature_length(&self) -> usize {
        2 * self.parameter_len()
    }

    /// Verifies a DSA signature over `digest`.
    ///
    /// The digest is truncated to the byte length of `q` before
    /// verification, per FIPS 186.
    pub(crate) fn verify(&self, digest: &[u8], signature: &[u8]) -> bool {
        let n = self.parameter_len();
        if signature.len() != 2 * n {
            return false;
        }
        let r = BigUint::from_bytes_be(&signature[..n]);
        let s = BigUint::from_bytes_be(&signature[n..]);
        if r.is_zero() || s.is_zero() || r >= self.q || s >= self.q {
            return false;
        }

        let hm = truncated_digest(digest, n);
        let two = BigUint::from(2u32);
        let w = s.modpow(&(&self.q - &two), &self.q);
        let u1 = (&hm * &w) % &self.q;
        let u2 = (&r * &w) % &self.q;
        let v = (self.g.modpow(&u1, &self.p) * self.y.modpow(&u2, &self.p) % &self.p) % &self.q;
        v == r
    }

    /// A human-readable fingerprint of this key for out-of-band
    /// comparison, e.g. `"5f9c3a01 77b2..."`.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.serialize());
        digest[..20]
            .chunks(4)
            .map(|chunk| chunk.iter().map(|b| format!("{:02x}", b)).collect::<String>())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl PrivateKey {
    /// Builds a private key from DSA group parameters and the secret
    /// exponent; the public `y = g^x mod p` is derived.
    pub fn from_components(p: BigUint, q: BigUint, g: BigUint, x: BigUint) -> Self {
        let y = g.modpow(&x, &p);
        Self {
            public_key: PublicKey { p, q, g, y },
            x,
        }
    }

    /// The public half of this key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Signs `digest` with a random nonce drawn from `rand`.
    ///
    /// The digest is truncated to the byte length of `q` before signing,
    /// per FIPS 186.
    pub(crate) fn sign(&self, rand: &mut dyn RngCore, digest: &[u8]) -> Result<Vec<u8>> {
        let pk = &self.public_key;
        let n = pk.parameter_len();
        let hm = truncated_digest(digest, n);
        let two = BigUint::from(2u32);

        loop {
            let mut buf = vec![0u8; n];
            rand.try_fill_bytes(&mut buf)
                .map_err(|_| OtrError::ShortRandomRead)?;
            let k = BigUint::from_bytes_be(&buf) % &pk.q;
            if k.is_zero() {
                continue;
            }

            let r = pk.g.modpow(&k, &pk.p) % &pk.q;
            if r.is_zero() {
                continue;
            }

            let k_inv = k.modpow(&(&pk.q - &two), &pk.q);
            let s = (&k_inv * (&hm + &self.x * &r)) % &pk.q;
            if s.is_zero() {
                continue;
            }

            let mut signature = vec![0u8; 2 * n];
            let r_bytes = r.to_bytes_be();
            let s_bytes = s.to_bytes_be();
            signature[n - r_bytes.len()..n].copy_from_slice(&r_bytes);
            signature[2 * n - s_bytes.len()..].copy_from_slice(&s_bytes);
            return Ok(signature);
        }
    }
}

/// Interprets the leftmost `q`-sized prefix of a digest as an integer.
fn truncated_digest(digest: &[u8], parameter_len: usize) -> BigUint {
    let take = parameter_len.min(digest.len());
    BigUint::from_bytes_be(&digest[..take])
}

#[cfg(test)]
pub(crate) fn fixture_private_key() -> PrivateKey {
    // A fixed 1024/160-bit DSA key used across the test suite.
    let p = biguint_from_hex(
        "e977897ac45281d2932d375eca44f7a15115d247e648efea6cb592c715b24691\
         94a0a660940152d5af5784b98c851764f4e198ec6011922a22a3f7c3a6d433d9\
         79ed51fd20576aff8f74a8a9197630d6365805a6313cb7793a718294d753bca3\
         66c6679e5a5e2cd94456da6721fc98171978cc236691a1ed180a35400e33304d",
    );
    let q = biguint_from_hex("b134acc0eb462e54ebd5f4c4ba669f8e8d313be9");
    let g = biguint_from_hex(
        "26a1e25812372e4a40e0506917c55ce18b3a6853da8926fd84e2ee7bde48b359\
         e61fbc5074791322a527466af46553071d0c05fe76b440410df7091d1b6b093a\
         0b6965a4a58f24e5aa74ac422ea1c5266646c0483567c6a4e5cb9b267c7b3ca4\
         75e7dc76494525c638a6c60b433e0c11bf1c265321d61ab6ced5449f91f7c66f",
    );
    let x = biguint_from_hex("0e1f1f49b7be04dd19c21ce725152fcccba6d6fb");
    PrivateKey::from_components(p, q, g, x)
}

#[cfg(test)]
pub(crate) fn biguint_from_hex(s: &str) -> BigUint {
    BigUint::from_bytes_be(&hex::decode(s).expect("valid hex in test fixture"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_sign_and_verify() {
        let key = fixture_private_key();
        let digest = crate::crypto::sha256(b"message to authenticate");

        let signature = key.sign(&mut OsRng, &digest).unwrap();
        assert_eq!(signature.len(), 40);
        assert!(key.public_key().verify(&digest, &signature));
    }

    #[test]
    fn test_verify_rejects_wrong_digest() {
        let key = fixture_private_key();
        let digest = crate::crypto::sha256(b"original");
        let signature = key.sign(&mut OsRng, &digest).unwrap();

        let other = crate::crypto::sha256(b"tampered");
        assert!(!key.public_key().verify(&other, &signature));
    }

    #[test]
    fn test_verify_rejects_tampered_signature() {
        let key = fixture_private_key();
        let digest = crate::crypto::sha256(b"message");
        let mut signature = key.sign(&mut OsRng, &digest).unwrap();
        signature[10] ^= 0x01;
        assert!(!key.public_key().verify(&digest, &signature));
    }

    #[test]
    fn test_verify_rejects_bad_length() {
        let key = fixture_private_key();
        let digest = crate::crypto::sha256(b"message");
        assert!(!key.public_key().verify(&digest, &[0u8; 39]));
        assert!(!key.public_key().verify(&digest, &[0u8; 41]));
    }

    #[test]
    fn test_serialize_decode_roundtrip() {
        let key = fixture_private_key();
        let serialized = key.public_key().serialize();

        let (rest, decoded) = PublicKey::decode(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(&decoded, key.public_key());
    }

    #[test]
    fn test_decode_rejects_unknown_key_type() {
        let mut serialized = fixture_private_key().public_key().serialize();
        serialized[1] = 0x01;
        assert!(matches!(
            PublicKey::decode(&serialized),
            Err(OtrError::InvalidOtrMessage)
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_key() {
        let serialized = fixture_private_key().public_key().serialize();
        assert!(matches!(
            PublicKey::decode(&serialized[..serialized.len() - 3]),
            Err(OtrError::InvalidOtrMessage)
        ));
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = fixture_private_key().public_key().fingerprint();
        assert_eq!(fp.len(), 44); // five groups of eight hex chars
        assert_eq!(fp.split(' ').count(), 5);
    }

    #[test]
    fn test_signature_length() {
        let key = fixture_private_key();
        assert_eq!(key.public_key().signature_length(), 40);
    }

    #[test]
    fn test_exhausted_rng_fails_signing() {
        struct NoRandom;
        impl RngCore for NoRandom {
            fn next_u32(&mut self) -> u32 {
                0
            }
            fn next_u64(&mut self) -> u64 {
                0
            }
            fn fill_bytes(&mut self, _dest: &mut [u8]) {}
            fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
                Err(rand::Error::new("exhausted"))
            }
        }

        let key = fixture_private_key();
        let digest = crate::crypto::sha256(b"message");
        assert_eq!(
            key.sign(&mut NoRandom, &digest),
            Err(OtrError::ShortRandomRead)
        );
    }
}
