//! Wire encoding and decoding for OTR key exchange messages.
//!
//! All multi-byte integers are big-endian. Variable-length fields use the
//! `DATA` encoding (`u32` length prefix followed by that many bytes);
//! multi-precision integers (`MPI`) use the same framing around their
//! minimal big-endian representation.

use num_bigint::BigUint;

use crate::types::{OtrError, Result, DH_COMMIT_KEY_LEN, MAC_LEN, SHA256_LEN};

/// DH-Commit message type byte.
pub const MSG_TYPE_DH_COMMIT: u8 = 0x02;
/// Data message type byte.
pub const MSG_TYPE_DATA: u8 = 0x03;
/// DH-Key message type byte.
pub const MSG_TYPE_DH_KEY: u8 = 0x0A;
/// Reveal-Signature message type byte.
pub const MSG_TYPE_REVEAL_SIG: u8 = 0x11;
/// Signature message type byte.
pub const MSG_TYPE_SIG: u8 = 0x12;

/// Whether a message type byte names one of the four key exchange messages.
pub(crate) fn is_ake_message_type(message_type: u8) -> bool {
    matches!(
        message_type,
        MSG_TYPE_DH_COMMIT | MSG_TYPE_DH_KEY | MSG_TYPE_REVEAL_SIG | MSG_TYPE_SIG
    )
}

pub(crate) fn append_short(dst: &mut Vec<u8>, n: u16) {
    dst.extend_from_slice(&n.to_be_bytes());
}

pub(crate) fn append_word(dst: &mut Vec<u8>, n: u32) {
    dst.extend_from_slice(&n.to_be_bytes());
}

pub(crate) fn append_data(dst: &mut Vec<u8>, bytes: &[u8]) {
    append_word(dst, bytes.len() as u32);
    dst.extend_from_slice(bytes);
}

pub(crate) fn append_mpi(dst: &mut Vec<u8>, n: &BigUint) {
    append_data(dst, &n.to_bytes_be());
}

pub(crate) fn extract_short(data: &[u8]) -> Result<(&[u8], u16)> {
    if data.len() < 2 {
        return Err(OtrError::InvalidOtrMessage);
    }
    let n = u16::from_be_bytes([data[0], data[1]]);
    Ok((&data[2..], n))
}

pub(crate) fn extract_word(data: &[u8]) -> Result<(&[u8], u32)> {
    if data.len() < 4 {
        return Err(OtrError::InvalidOtrMessage);
    }
    let n = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    Ok((&data[4..], n))
}

pub(crate) fn extract_data(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (rest, len) = extract_word(data)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(OtrError::InvalidOtrMessage);
    }
    Ok((&rest[len..], &rest[..len]))
}

pub(crate) fn extract_mpi(data: &[u8]) -> Result<(&[u8], BigUint)> {
    let (rest, bytes) = extract_data(data)?;
    Ok((rest, BigUint::from_bytes_be(bytes)))
}

/// Body of a DH-Commit message: the AES-encrypted `g^x` and its SHA-256
/// commitment hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DhCommitBody {
    pub encrypted_gx: Vec<u8>,
    pub hashed_gx: [u8; SHA256_LEN],
}

impl DhCommitBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(8 + self.encrypted_gx.len() + SHA256_LEN);
        append_data(&mut body, &self.encrypted_gx);
        append_data(&mut body, &self.hashed_gx);
        body
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let (rest, encrypted_gx) = extract_data(body)?;
        let (_, hashed) = extract_data(rest)?;
        let hashed_gx: [u8; SHA256_LEN] = hashed
            .try_into()
            .map_err(|_| OtrError::InvalidOtrMessage)?;
        Ok(Self {
            encrypted_gx: encrypted_gx.to_vec(),
            hashed_gx,
        })
    }
}

/// Body of a DH-Key message: the bare public value `g^y`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DhKeyBody {
    pub gy: BigUint,
}

impl DhKeyBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        append_mpi(&mut body, &self.gy);
        body
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let (_, gy) = extract_mpi(body)?;
        Ok(Self { gy })
    }
}

/// Body of a Reveal-Signature message: the revealed commitment key `r`,
/// the encrypted signature block, and its truncated MAC.
///
/// The MAC covers the encrypted signature *including* its length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RevealSigBody {
    pub r: [u8; DH_COMMIT_KEY_LEN],
    pub encrypted_sig: Vec<u8>,
    pub mac: [u8; MAC_LEN],
}

impl RevealSigBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(8 + DH_COMMIT_KEY_LEN + self.encrypted_sig.len() + MAC_LEN);
        append_data(&mut body, &self.r);
        append_data(&mut body, &self.encrypted_sig);
        body.extend_from_slice(&self.mac);
        body
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let (rest, revealed) = extract_data(body)?;
        let r: [u8; DH_COMMIT_KEY_LEN] = revealed
            .try_into()
            .map_err(|_| OtrError::InvalidOtrMessage)?;
        let (rest, encrypted_sig) = extract_data(rest)?;
        let mac = extract_mac(rest)?;
        Ok(Self {
            r,
            encrypted_sig: encrypted_sig.to_vec(),
            mac,
        })
    }
}

/// Body of a Signature message: like `RevealSigBody` without the revealed
/// key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SigBody {
    pub encrypted_sig: Vec<u8>,
    pub mac: [u8; MAC_LEN],
}

impl SigBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(4 + self.encrypted_sig.len() + MAC_LEN);
        append_data(&mut body, &self.encrypted_sig);
        body.extend_from_slice(&self.mac);
        body
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let (rest, encrypted_sig) = extract_data(body)?;
        let mac = extract_mac(rest)?;
        Ok(Self {
            encrypted_sig: encrypted_sig.to_vec(),
            mac,
        })
    }
}

fn extract_mac(data: &[u8]) -> Result<[u8; MAC_LEN]> {
    if data.len() < MAC_LEN {
        return Err(OtrError::InvalidOtrMessage);
    }
    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&data[..MAC_LEN]);
    Ok(mac)
}
