//! The data-layer key schedule populated when a key exchange completes.

use num_bigint::BigUint;

use crate::conversation::Conversation;
use crate::types::{MessageState, FIRST_KEY_ID};

/// A Diffie-Hellman key pair owned by this conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhKeyPair {
    /// The secret exponent.
    pub secret: BigUint,
    /// The public value `g^secret mod p`.
    pub public: BigUint,
}

/// Session key state handed to the data layer by a completed exchange.
///
/// Key IDs and the counter start at 1; the data-layer ratchet rotates
/// them afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyManagement {
    /// Our current DH key pair.
    pub our_current_dh_keys: Option<DhKeyPair>,
    /// The peer's current DH public value.
    pub their_current_dh_pub_key: Option<BigUint>,
    /// The peer's previous DH public value, empty right after a handshake.
    pub their_previous_dh_pub_key: Option<BigUint>,
    /// Counter for outgoing data messages.
    pub our_counter: u64,
    /// ID of our current DH key pair.
    pub our_key_id: u32,
    /// ID of the peer's current DH key.
    pub their_key_id: u32,
    /// The 64-bit secure session identifier.
    pub ssid: [u8; 8],
}

impl KeyManagement {
    /// Creates an empty key schedule.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Conversation {
    /// Publishes the completed exchange into the key schedule and flips
    /// the conversation to encrypted.
    ///
    /// The AKE scratch is consumed and zeroed; the authentication state
    /// returns to its initial value.
    pub(crate) fn install_session_keys(&mut self) {
        let secret = self.ake.secret_exponent.take();
        let public = self.ake.our_public_value.take();
        if let (Some(secret), Some(public)) = (secret, public) {
            self.keys.our_current_dh_keys = Some(DhKeyPair { secret, public });
        }
        self.keys.their_current_dh_pub_key = self.ake.their_public_value.take();
        self.keys.their_previous_dh_pub_key = None;
        self.keys.our_counter = 1;
        self.keys.our_key_id = FIRST_KEY_ID;
        self.keys.their_key_id = FIRST_KEY_ID;
        if let Some(derived) = &self.ake.keys {
            self.keys.ssid = derived.ssid;
        }

        self.msg_state = MessageState::Encrypted;
        self.ake.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_key_management_is_empty() {
        let keys = KeyManagement::new();
        assert!(keys.our_current_dh_keys.is_none());
        assert!(keys.their_current_dh_pub_key.is_none());
        assert!(keys.their_previous_dh_pub_key.is_none());
        assert_eq!(keys.our_counter, 0);
        assert_eq!(keys.our_key_id, 0);
        assert_eq!(keys.their_key_id, 0);
        assert_eq!(keys.ssid, [0u8; 8]);
    }
}
