//! Symmetric primitives and key derivation for the key exchange.
//!
//! All keys are derived from the shared DH secret `s` through
//! `h2(b) = SHA-256(b || MPI(s))` with a distinct one-byte prefix per key,
//! exactly as the handshake's peers must agree on them.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::{DH_COMMIT_KEY_LEN, MAC_LEN, SHA256_LEN};
use crate::wire::append_mpi;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// The key material both parties derive from the shared DH secret.
///
/// `c`/`m1`/`m2` protect the Reveal-Signature message, the primed variants
/// protect the Signature message, and `ssid` is the 64-bit session
/// identifier shown to users for out-of-band verification.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct DerivedKeys {
    pub ssid: [u8; 8],
    pub c: [u8; 16],
    pub c_prime: [u8; 16],
    pub m1: [u8; 32],
    pub m2: [u8; 32],
    pub m1_prime: [u8; 32],
    pub m2_prime: [u8; 32],
}

impl DerivedKeys {
    /// Derives the full key set from the shared secret `s`.
    pub fn derive(s: &BigUint) -> Self {
        let mut secbytes = Vec::new();
        append_mpi(&mut secbytes, s);

        let h_ssid = h2(0x00, &secbytes);
        let h_c = h2(0x01, &secbytes);

        let mut keys = DerivedKeys {
            ssid: [0u8; 8],
            c: [0u8; 16],
            c_prime: [0u8; 16],
            m1: h2(0x02, &secbytes),
            m2: h2(0x03, &secbytes),
            m1_prime: h2(0x04, &secbytes),
            m2_prime: h2(0x05, &secbytes),
        };
        keys.ssid.copy_from_slice(&h_ssid[..8]);
        keys.c.copy_from_slice(&h_c[..16]);
        keys.c_prime.copy_from_slice(&h_c[16..]);
        keys
    }
}

fn h2(b: u8, secbytes: &[u8]) -> [u8; SHA256_LEN] {
    let mut hasher = Sha256::new();
    hasher.update([b]);
    hasher.update(secbytes);
    hasher.finalize().into()
}

/// Computes the SHA-256 digest of `data`.
pub(crate) fn sha256(data: &[u8]) -> [u8; SHA256_LEN] {
    Sha256::digest(data).into()
}

/// Computes a full-length HMAC-SHA-256 over `data`.
pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; SHA256_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Computes an HMAC-SHA-256 over `data` truncated to 160 bits, the form
/// used on the wire.
pub(crate) fn hmac_sha256_160(key: &[u8], data: &[u8]) -> [u8; MAC_LEN] {
    let full = hmac_sha256(key, data);
    let mut truncated = [0u8; MAC_LEN];
    truncated.copy_from_slice(&full[..MAC_LEN]);
    truncated
}

/// Applies AES-128 in counter mode with an all-zero initial counter.
///
/// Counter mode is its own inverse, so this both encrypts and decrypts.
pub(crate) fn aes128_ctr(key: &[u8; DH_COMMIT_KEY_LEN], data: &[u8]) -> Vec<u8> {
    let iv = [0u8; 16];
    let mut cipher =
        Aes128Ctr::new_from_slices(key, &iv).expect("16-byte key and IV are valid for AES-128-CTR");
    let mut out = data.to_vec();
    cipher.apply_keystream(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // Derivation vectors computed independently from
    // s = 0x05a1b2c3d4e5f60718293a4b5c6d7e8f9091a2b3c4d5e6f7.
    const S_HEX: &str = "05a1b2c3d4e5f60718293a4b5c6d7e8f9091a2b3c4d5e6f7";
    const SSID_HEX: &str = "f367747377e81981";
    const C_HEX: &str = "07c7dd9c0d72fd9a49c38d87e5ffde7e";
    const C_PRIME_HEX: &str = "318c87a6e18835db26fc97a5b9d3f855";
    const M1_HEX: &str = "949f0fd3322ee52788ee72aab0d891a04586658c4d9461ed485d07b48a56733d";
    const M2_HEX: &str = "57e3600682232f23479aeacc34a4052c25b5b539e07c68a083959e6f313203fe";
    const M1_PRIME_HEX: &str = "de04d43a5d98565ff4de11b25400c41cb34c16ea0ee24f2477ed50db7f239440";
    const M2_PRIME_HEX: &str = "e1dc27ec289faaf2e3567ba48cb0cc090cdcea20f3ed3d2a88391b1e1c81ba52";

    #[test]
    fn test_derive_known_vectors() {
        let s = BigUint::from_bytes_be(&hex::decode(S_HEX).unwrap());
        let keys = DerivedKeys::derive(&s);

        assert_eq!(hex::encode(keys.ssid), SSID_HEX);
        assert_eq!(hex::encode(keys.c), C_HEX);
        assert_eq!(hex::encode(keys.c_prime), C_PRIME_HEX);
        assert_eq!(hex::encode(keys.m1), M1_HEX);
        assert_eq!(hex::encode(keys.m2), M2_HEX);
        assert_eq!(hex::encode(keys.m1_prime), M1_PRIME_HEX);
        assert_eq!(hex::encode(keys.m2_prime), M2_PRIME_HEX);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let s = BigUint::from(0xDEADBEEFu32);
        let a = DerivedKeys::derive(&s);
        let b = DerivedKeys::derive(&s);
        assert_eq!(a.ssid, b.ssid);
        assert_eq!(a.c, b.c);
        assert_eq!(a.m1, b.m1);
    }

    #[test]
    fn test_aes_ctr_is_involutive() {
        let key = [0x42u8; 16];
        let plaintext = b"a DH public value, MPI-encoded";
        let ciphertext = aes128_ctr(&key, plaintext);
        assert_ne!(&ciphertext[..], &plaintext[..]);
        assert_eq!(aes128_ctr(&key, &ciphertext), plaintext.to_vec());
    }

    #[test]
    fn test_hmac_truncation() {
        let full = hmac_sha256(b"key", b"data");
        let truncated = hmac_sha256_160(b"key", b"data");
        assert_eq!(&truncated[..], &full[..20]);
    }

    #[test]
    fn test_sha256_known_value() {
        // SHA-256 of the empty string
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
