//! Type definitions and protocol constants for the OTR key exchange.

use thiserror::Error;

/// Length of an OTR version 2 message header: protocol version + message type.
pub const OTRV2_HEADER_LEN: usize = 3;

/// Length of an OTR version 3 message header: protocol version + message
/// type + sender and receiver instance tags.
pub const OTRV3_HEADER_LEN: usize = 11;

/// Length of the AES-128 key that encrypts `g^x` in a DH-Commit message.
pub const DH_COMMIT_KEY_LEN: usize = 16;

/// Length of a truncated HMAC-SHA-256 as it appears on the wire.
pub const MAC_LEN: usize = 20;

/// Length of a SHA-256 digest.
pub const SHA256_LEN: usize = 32;

/// Smallest instance tag a conversation may claim for itself (v3 only).
pub const MIN_INSTANCE_TAG: u32 = 0x100;

/// The key ID both sides assign to their first DH key pair.
pub const FIRST_KEY_ID: u32 = 1;

/// Whether the conversation carries plaintext or encrypted payloads.
///
/// A successful key exchange moves the conversation from `PlainText` to
/// `Encrypted`; `Finished` is entered when the peer ends the secure
/// conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// No encryption is in place; payloads pass through as-is.
    PlainText,
    /// The key exchange completed and the data layer holds session keys.
    Encrypted,
    /// The peer ended the secure conversation; nothing may be sent.
    Finished,
}

/// Errors that can occur while driving an OTR conversation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtrError {
    /// The message is structurally malformed: short buffer, truncated
    /// length-prefixed field, or missing header.
    #[error("invalid OTR message")]
    InvalidOtrMessage,

    /// The protocol version in the message header is not 2 or 3.
    #[error("unsupported OTR version")]
    UnsupportedOtrVersion,

    /// A data message carried a protocol version other than the one the
    /// key exchange negotiated.
    #[error("wrong protocol version")]
    WrongProtocolVersion,

    /// A query message advertised no version acceptable under the current
    /// policy.
    #[error("no acceptable OTR version advertised")]
    InvalidVersion,

    /// The randomness source could not supply enough bytes.
    #[error("short read from random source")]
    ShortRandomRead,

    /// The message type byte is not one of the known OTR message types.
    #[error("unknown message type 0x{0:02X}")]
    UnknownMessageType(u8),

    /// A received Diffie-Hellman value is outside the valid subgroup.
    #[error("DH value out of range")]
    DhValueOutOfRange,

    /// The revealed `g^x` does not hash to the value committed earlier.
    #[error("DH commitment hash mismatch")]
    CommitmentMismatch,

    /// The MAC over an encrypted signature did not verify.
    #[error("bad MAC on encrypted signature")]
    SignatureMacMismatch,

    /// The DSA signature inside an encrypted signature did not verify.
    #[error("bad signature in encrypted signature")]
    InvalidSignature,

    /// The secure conversation has finished; no further messages may be sent.
    #[error("cannot send a message: the secure conversation has finished")]
    ConversationFinished,

    /// Sending is not possible in the current message state.
    #[error("cannot send a message in the current state")]
    InvalidMessageState,
}

impl OtrError {
    /// Whether this error is a cryptographic verification failure, which
    /// aborts the key exchange and resets its scratch state.
    pub(crate) fn aborts_ake(self) -> bool {
        matches!(
            self,
            OtrError::CommitmentMismatch
                | OtrError::SignatureMacMismatch
                | OtrError::InvalidSignature
        )
    }
}

pub type Result<T> = std::result::Result<T, OtrError>;
