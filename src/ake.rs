//! Construction and processing of the four key exchange messages.
//!
//! The initiator commits to `g^x` under a throwaway AES key `r`, the
//! responder answers with `g^y`, and the two Reveal-Signature/Signature
//! messages authenticate both exponents under the parties' long-term DSA
//! keys. State transitions live in `auth`; this module owns the
//! per-exchange scratch and the cryptographic work on each message.

use num_bigint::BigUint;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::auth::AuthState;
use crate::conversation::Conversation;
use crate::crypto::{aes128_ctr, hmac_sha256, hmac_sha256_160, sha256, DerivedKeys};
use crate::dh;
use crate::keys::PublicKey;
use crate::types::{
    OtrError, Result, DH_COMMIT_KEY_LEN, FIRST_KEY_ID, MAC_LEN, SHA256_LEN,
};
use crate::wire::{
    append_data, append_mpi, append_word, extract_mpi, extract_word, DhCommitBody, DhKeyBody,
    RevealSigBody, SigBody, MSG_TYPE_DH_COMMIT, MSG_TYPE_DH_KEY, MSG_TYPE_REVEAL_SIG, MSG_TYPE_SIG,
};

/// Scratch state for one run of the key exchange.
///
/// Everything here lives only until the exchange succeeds or is
/// abandoned; `reset` wipes the secret material.
pub(crate) struct AkeScratch {
    /// Current authentication state.
    pub state: AuthState,
    /// AES key that encrypted our `g^x`, revealed in Reveal-Signature.
    pub r: [u8; DH_COMMIT_KEY_LEN],
    /// Our secret exponent: `x` as initiator, `y` as responder.
    pub secret_exponent: Option<BigUint>,
    /// Our public value: `g^x` as initiator, `g^y` as responder.
    pub our_public_value: Option<BigUint>,
    /// The peer's public value once revealed.
    pub their_public_value: Option<BigUint>,
    /// The peer's encrypted `g^x` from their DH-Commit.
    pub encrypted_gx: Vec<u8>,
    /// The peer's commitment hash from their DH-Commit.
    pub hashed_gx: [u8; SHA256_LEN],
    /// Keys derived from the shared secret.
    pub keys: Option<DerivedKeys>,
    /// Our last DH-Commit, kept for collision retransmission.
    pub last_dh_commit: Option<Vec<u8>>,
    /// Our last Reveal-Signature, kept for duplicate-DH-Key retransmission.
    pub last_reveal_sig: Option<Vec<u8>>,
}

impl Default for AkeScratch {
    fn default() -> Self {
        Self {
            state: AuthState::None,
            r: [0u8; DH_COMMIT_KEY_LEN],
            secret_exponent: None,
            our_public_value: None,
            their_public_value: None,
            encrypted_gx: Vec::new(),
            hashed_gx: [0u8; SHA256_LEN],
            keys: None,
            last_dh_commit: None,
            last_reveal_sig: None,
        }
    }
}

impl AkeScratch {
    /// Wipes all scratch state and returns to the initial authentication
    /// state. The commitment key and derived keys are zeroed in place;
    /// the big-integer exponents are dropped.
    pub fn reset(&mut self) {
        self.r.zeroize();
        *self = AkeScratch::default();
    }

    /// Drops our initiator material so the exchange can restart in the
    /// responder role.
    pub fn forget_initiator_role(&mut self) {
        self.r.zeroize();
        self.secret_exponent = None;
        self.our_public_value = None;
        self.last_dh_commit = None;
    }
}

impl Conversation {
    /// Fills `buf` from the conversation's randomness source.
    pub(crate) fn random_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.rand
            .try_fill_bytes(buf)
            .map_err(|_| OtrError::ShortRandomRead)
    }

    /// Draws a fresh secret exponent of the negotiated version's length.
    fn random_exponent(&mut self) -> Result<BigUint> {
        let version = self.version.ok_or(OtrError::InvalidVersion)?;
        let mut buf = vec![0u8; version.parameter_length()];
        self.random_bytes(&mut buf)?;
        Ok(BigUint::from_bytes_be(&buf))
    }

    /// Builds a DH-Commit message: a fresh `x` and `r`, with `g^x`
    /// AES-encrypted under `r` next to its SHA-256 commitment.
    ///
    /// The serialized message is cached for collision retransmission.
    pub(crate) fn dh_commit_message(&mut self) -> Result<Vec<u8>> {
        let x = self.random_exponent()?;
        let gx = dh::public_value(&x);

        let mut r = [0u8; DH_COMMIT_KEY_LEN];
        self.random_bytes(&mut r)?;

        let mut gx_mpi = Vec::new();
        append_mpi(&mut gx_mpi, &gx);
        let hashed_gx = sha256(&gx_mpi);
        let encrypted_gx = aes128_ctr(&r, &gx_mpi);

        self.ake.r = r;
        self.ake.secret_exponent = Some(x);
        self.ake.our_public_value = Some(gx);

        let body = DhCommitBody {
            encrypted_gx,
            hashed_gx,
        }
        .encode();
        let message = self.ake_message(MSG_TYPE_DH_COMMIT, &body)?;
        self.ake.last_dh_commit = Some(message.clone());
        Ok(message)
    }

    /// Builds a DH-Key message, generating the responder exponent on
    /// first use and reusing it afterwards so retransmissions are
    /// byte-identical.
    pub(crate) fn dh_key_message(&mut self) -> Result<Vec<u8>> {
        if self.ake.our_public_value.is_none() {
            let y = self.random_exponent()?;
            let gy = dh::public_value(&y);
            self.ake.secret_exponent = Some(y);
            self.ake.our_public_value = Some(gy);
        }
        let gy = self
            .ake
            .our_public_value
            .clone()
            .ok_or(OtrError::InvalidOtrMessage)?;
        let body = DhKeyBody { gy }.encode();
        self.ake_message(MSG_TYPE_DH_KEY, &body)
    }

    /// Builds the Reveal-Signature message and caches it for duplicate
    /// DH-Key retransmission.
    pub(crate) fn reveal_sig_message(&mut self) -> Result<Vec<u8>> {
        let derived = self.ake.keys.clone().ok_or(OtrError::InvalidOtrMessage)?;
        let (encrypted_sig, mac) =
            self.encrypted_signature(&derived.c, &derived.m1, &derived.m2)?;
        let body = RevealSigBody {
            r: self.ake.r,
            encrypted_sig,
            mac,
        }
        .encode();
        let message = self.ake_message(MSG_TYPE_REVEAL_SIG, &body)?;
        self.ake.last_reveal_sig = Some(message.clone());
        Ok(message)
    }

    /// Builds the final Signature message under the primed key set.
    pub(crate) fn sig_message(&mut self) -> Result<Vec<u8>> {
        let derived = self.ake.keys.clone().ok_or(OtrError::InvalidOtrMessage)?;
        let (encrypted_sig, mac) =
            self.encrypted_signature(&derived.c_prime, &derived.m1_prime, &derived.m2_prime)?;
        let body = SigBody { encrypted_sig, mac }.encode();
        self.ake_message(MSG_TYPE_SIG, &body)
    }

    /// Stores the commitment fields of a peer's DH-Commit, replacing any
    /// previous commitment.
    pub(crate) fn process_dh_commit(&mut self, body: &[u8]) -> Result<()> {
        let commit = DhCommitBody::decode(body)?;
        self.ake.encrypted_gx = commit.encrypted_gx;
        self.ake.hashed_gx = commit.hashed_gx;
        Ok(())
    }

    /// Validates and stores the peer's `g^y`, then derives the session
    /// key set from the shared secret.
    pub(crate) fn process_dh_key(&mut self, body: &[u8]) -> Result<()> {
        let DhKeyBody { gy } = DhKeyBody::decode(body)?;
        if !dh::is_group_element(&gy) {
            return Err(OtrError::DhValueOutOfRange);
        }
        let x = self
            .ake
            .secret_exponent
            .clone()
            .ok_or(OtrError::InvalidOtrMessage)?;
        let s = dh::shared_secret(&gy, &x);
        self.ake.keys = Some(DerivedKeys::derive(&s));
        self.ake.their_public_value = Some(gy);
        Ok(())
    }

    /// Verifies a Reveal-Signature: the revealed `r` must decrypt the
    /// committed `g^x` to a value matching the commitment hash, and the
    /// encrypted signature must verify under the derived key set.
    pub(crate) fn process_reveal_sig(&mut self, body: &[u8]) -> Result<()> {
        let reveal = RevealSigBody::decode(body)?;

        let gx_mpi = aes128_ctr(&reveal.r, &self.ake.encrypted_gx);
        if sha256(&gx_mpi) != self.ake.hashed_gx {
            return Err(OtrError::CommitmentMismatch);
        }
        let (_, gx) = extract_mpi(&gx_mpi)?;
        if !dh::is_group_element(&gx) {
            return Err(OtrError::DhValueOutOfRange);
        }

        let y = self
            .ake
            .secret_exponent
            .clone()
            .ok_or(OtrError::InvalidOtrMessage)?;
        let s = dh::shared_secret(&gx, &y);
        let derived = DerivedKeys::derive(&s);

        self.verify_encrypted_signature(
            &reveal.encrypted_sig,
            &reveal.mac,
            &derived.c,
            &derived.m1,
            &derived.m2,
            &gx,
        )?;

        self.ake.their_public_value = Some(gx);
        self.ake.keys = Some(derived);
        Ok(())
    }

    /// Verifies the final Signature message under the primed key set.
    pub(crate) fn process_sig(&mut self, body: &[u8]) -> Result<()> {
        let sig = SigBody::decode(body)?;
        let derived = self.ake.keys.clone().ok_or(OtrError::InvalidOtrMessage)?;
        let their_public = self
            .ake
            .their_public_value
            .clone()
            .ok_or(OtrError::InvalidOtrMessage)?;
        self.verify_encrypted_signature(
            &sig.encrypted_sig,
            &sig.mac,
            &derived.c_prime,
            &derived.m1_prime,
            &derived.m2_prime,
            &their_public,
        )
    }

    /// SHA-256 over our own MPI-encoded public value, as the peer would
    /// see it in our DH-Commit. Used to break initiation collisions.
    pub(crate) fn our_commitment_hash(&self) -> Option<[u8; SHA256_LEN]> {
        let gx = self.ake.our_public_value.as_ref()?;
        let mut gx_mpi = Vec::new();
        append_mpi(&mut gx_mpi, gx);
        Some(sha256(&gx_mpi))
    }

    /// Signs `our || their || our key || key ID` under `m1`, encrypts the
    /// signature block under `c`, and MACs the framed ciphertext under
    /// `m2`.
    fn encrypted_signature(
        &mut self,
        c: &[u8; 16],
        m1: &[u8; 32],
        m2: &[u8; 32],
    ) -> Result<(Vec<u8>, [u8; MAC_LEN])> {
        let our_public = self
            .ake
            .our_public_value
            .clone()
            .ok_or(OtrError::InvalidOtrMessage)?;
        let their_public = self
            .ake
            .their_public_value
            .clone()
            .ok_or(OtrError::InvalidOtrMessage)?;

        let mut verify_data = Vec::new();
        append_mpi(&mut verify_data, &our_public);
        append_mpi(&mut verify_data, &their_public);
        self.our_key.public_key().encode_into(&mut verify_data);
        append_word(&mut verify_data, FIRST_KEY_ID);
        let m = hmac_sha256(m1, &verify_data);

        let mut block = Vec::new();
        self.our_key.public_key().encode_into(&mut block);
        append_word(&mut block, FIRST_KEY_ID);
        let signature = self.our_key.sign(self.rand.as_mut(), &m)?;
        block.extend_from_slice(&signature);

        let encrypted = aes128_ctr(c, &block);
        let mut framed = Vec::new();
        append_data(&mut framed, &encrypted);
        let mac = hmac_sha256_160(m2, &framed);

        Ok((encrypted, mac))
    }

    /// Checks the MAC over an encrypted signature, decrypts it, and
    /// verifies the peer's DSA signature over `their || our || their key
    /// || key ID`. The peer's long-term key is stored on success.
    fn verify_encrypted_signature(
        &mut self,
        encrypted_sig: &[u8],
        mac: &[u8; MAC_LEN],
        c: &[u8; 16],
        m1: &[u8; 32],
        m2: &[u8; 32],
        their_public: &BigUint,
    ) -> Result<()> {
        let mut framed = Vec::new();
        append_data(&mut framed, encrypted_sig);
        let expected = hmac_sha256_160(m2, &framed);
        if !bool::from(expected[..].ct_eq(&mac[..])) {
            return Err(OtrError::SignatureMacMismatch);
        }

        let block = aes128_ctr(c, encrypted_sig);
        let (rest, their_key) = PublicKey::decode(&block)?;
        let (signature, key_id) = extract_word(rest)?;
        if signature.len() != their_key.signature_length() {
            return Err(OtrError::InvalidOtrMessage);
        }

        let our_public = self
            .ake
            .our_public_value
            .clone()
            .ok_or(OtrError::InvalidOtrMessage)?;
        let mut verify_data = Vec::new();
        append_mpi(&mut verify_data, their_public);
        append_mpi(&mut verify_data, &our_public);
        their_key.encode_into(&mut verify_data);
        append_word(&mut verify_data, key_id);
        let m = hmac_sha256(m1, &verify_data);

        if !their_key.verify(&m, signature) {
            return Err(OtrError::InvalidSignature);
        }

        self.their_key = Some(their_key);
        Ok(())
    }
}
