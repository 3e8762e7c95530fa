//! The top-level conversation object tying policy, version negotiation,
//! the key exchange, and the data-layer key schedule together.
//!
//! A `Conversation` is single-threaded and owned; independent
//! conversations may run in parallel. All protocol input goes through
//! [`Conversation::receive`], which returns the raw reply bytes to hand
//! to the transport (base-64 framing and fragmentation happen outside
//! this crate).

use rand::rngs::OsRng;
use rand::RngCore;

use crate::ake::AkeScratch;
use crate::auth::AuthState;
use crate::keys::{PrivateKey, PublicKey};
use crate::policy::Policies;
use crate::session::KeyManagement;
use crate::types::{
    MessageState, OtrError, Result, MIN_INSTANCE_TAG, OTRV2_HEADER_LEN,
};
use crate::version::{
    accept_version, parse_query_message, query_message_for, Version, QUERY_MARKER,
};
use crate::wire::{append_short, append_word, is_ake_message_type, MSG_TYPE_DATA};

/// One OTR conversation with a single peer.
pub struct Conversation {
    /// The negotiated protocol version, once known.
    pub(crate) version: Option<Version>,
    /// Policy flags for this conversation.
    pub policies: Policies,
    /// Plaintext/encrypted/finished flag of the data layer.
    pub(crate) msg_state: MessageState,
    /// Our long-term DSA key.
    pub(crate) our_key: PrivateKey,
    /// The peer's long-term DSA key, learned during the exchange.
    pub(crate) their_key: Option<PublicKey>,
    /// Our instance tag; non-zero only after the first outbound v3 message.
    pub(crate) our_instance_tag: u32,
    /// The peer's instance tag; learned from their first v3 message.
    pub(crate) their_instance_tag: u32,
    /// Scratch state of the running key exchange.
    pub(crate) ake: AkeScratch,
    /// The data-layer key schedule.
    pub keys: KeyManagement,
    /// Source of randomness for exponents, commitment keys, and nonces.
    pub(crate) rand: Box<dyn RngCore>,
}

impl Conversation {
    /// Creates a conversation using the operating system's randomness.
    pub fn new(our_key: PrivateKey) -> Self {
        Self::with_rng(our_key, OsRng)
    }

    /// Creates a conversation drawing randomness from `rand`.
    pub fn with_rng(our_key: PrivateKey, rand: impl RngCore + 'static) -> Self {
        Self {
            version: None,
            policies: Policies::new(),
            msg_state: MessageState::PlainText,
            our_key,
            their_key: None,
            our_instance_tag: 0,
            their_instance_tag: 0,
            ake: AkeScratch::default(),
            keys: KeyManagement::new(),
            rand: Box::new(rand),
        }
    }

    /// Handles one incoming message and returns the bytes to send back,
    /// which may be empty.
    ///
    /// Query messages start a key exchange; key exchange messages drive
    /// the state machine; data messages are checked for the negotiated
    /// version and otherwise left to the data layer.
    pub fn receive(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        if message.starts_with(QUERY_MARKER) {
            return self.receive_query_message(message);
        }

        if message.len() < OTRV2_HEADER_LEN {
            return Err(OtrError::InvalidOtrMessage);
        }
        let version = Version::from_protocol(u16::from_be_bytes([message[0], message[1]]))?;
        let message_type = message[2];

        if message_type == MSG_TYPE_DATA {
            if self.version != Some(version) {
                return Err(OtrError::WrongProtocolVersion);
            }
            return Ok(Vec::new());
        }
        if !is_ake_message_type(message_type) {
            return Err(OtrError::UnknownMessageType(message_type));
        }

        self.receive_ake(version, message_type, message)
    }

    /// Prepares an outgoing payload under the current policy and message
    /// state.
    ///
    /// With no version allowed at all the payload always passes through
    /// untouched. While unencrypted, `REQUIRE_ENCRYPTION` turns the
    /// payload into a query message so the peers negotiate first;
    /// otherwise the payload passes through untouched. Encrypted payload
    /// handling belongs to the data layer.
    pub fn send(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        if !self.policies.is_otr_enabled() {
            return Ok(message.to_vec());
        }
        match self.msg_state {
            MessageState::PlainText => {
                if self.policies.has(Policies::REQUIRE_ENCRYPTION) {
                    Ok(self.query_message())
                } else {
                    Ok(message.to_vec())
                }
            }
            MessageState::Encrypted => Err(OtrError::InvalidMessageState),
            MessageState::Finished => Err(OtrError::ConversationFinished),
        }
    }

    /// The query message advertising every version our policy accepts.
    pub fn query_message(&self) -> Vec<u8> {
        query_message_for(self.policies)
    }

    /// Starts a key exchange from a received query message: picks the
    /// highest mutually acceptable version and answers with a DH-Commit.
    pub(crate) fn receive_query_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        let advertised = parse_query_message(message);
        let version =
            accept_version(self.policies, &advertised).ok_or(OtrError::InvalidVersion)?;
        self.version = Some(version);

        // any exchange already in flight is abandoned for the fresh one
        self.ake.reset();
        let commit = self.dh_commit_message()?;
        self.ake.state = AuthState::AwaitingDhKey;
        Ok(commit)
    }

    /// Serializes a key exchange message: version header, type byte, and
    /// on v3 the instance tags, claiming ours first if needed.
    pub(crate) fn ake_message(&mut self, message_type: u8, body: &[u8]) -> Result<Vec<u8>> {
        let version = self.version.ok_or(OtrError::InvalidVersion)?;
        let mut message = Vec::with_capacity(version.header_len() + body.len());
        append_short(&mut message, version.protocol_version());
        message.push(message_type);
        if version.needs_instance_tags() {
            self.generate_instance_tag()?;
            append_word(&mut message, self.our_instance_tag);
            append_word(&mut message, self.their_instance_tag);
        }
        message.extend_from_slice(body);
        Ok(message)
    }

    /// Draws our instance tag on first use. Tags below `0x100` are
    /// reserved, so the draw repeats until the value is valid.
    fn generate_instance_tag(&mut self) -> Result<()> {
        if self.our_instance_tag != 0 {
            return Ok(());
        }
        let mut buf = [0u8; 4];
        loop {
            self.random_bytes(&mut buf)?;
            let tag = u32::from_be_bytes(buf);
            if tag >= MIN_INSTANCE_TAG {
                self.our_instance_tag = tag;
                return Ok(());
            }
        }
    }

    /// The data-layer message state.
    pub fn message_state(&self) -> MessageState {
        self.msg_state
    }

    /// Where the key exchange currently stands.
    pub fn auth_state(&self) -> AuthState {
        self.ake.state
    }

    /// The negotiated protocol version, if any.
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// The peer's long-term public key, once authenticated.
    pub fn their_public_key(&self) -> Option<&PublicKey> {
        self.their_key.as_ref()
    }

    /// Our and the peer's instance tags; zero means not yet assigned.
    pub fn instance_tags(&self) -> (u32, u32) {
        (self.our_instance_tag, self.their_instance_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::fixture_private_key;
    use crate::types::{OTRV3_HEADER_LEN, SHA256_LEN};
    use crate::wire::{extract_data, MSG_TYPE_DH_COMMIT};

    /// A randomness source that hands out a fixed pool of bytes and then
    /// fails.
    struct LimitedRng {
        pool: Vec<u8>,
        position: usize,
    }

    impl LimitedRng {
        fn with_bytes(count: usize) -> Self {
            Self {
                pool: (0..count).map(|i| i as u8).collect(),
                position: 0,
            }
        }
    }

    impl RngCore for LimitedRng {
        fn next_u32(&mut self) -> u32 {
            let mut buf = [0u8; 4];
            self.fill_bytes(&mut buf);
            u32::from_be_bytes(buf)
        }

        fn next_u64(&mut self) -> u64 {
            let mut buf = [0u8; 8];
            self.fill_bytes(&mut buf);
            u64::from_be_bytes(buf)
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            self.try_fill_bytes(dest).expect("rng pool exhausted");
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            if self.pool.len() - self.position < dest.len() {
                return Err(rand::Error::new("rng pool exhausted"));
            }
            dest.copy_from_slice(&self.pool[self.position..self.position + dest.len()]);
            self.position += dest.len();
            Ok(())
        }
    }

    fn conversation() -> Conversation {
        Conversation::new(fixture_private_key())
    }

    #[test]
    fn test_new_conversation_initial_state() {
        let c = conversation();
        assert_eq!(c.auth_state(), AuthState::None);
        assert_eq!(c.message_state(), MessageState::PlainText);
        assert_eq!(c.version(), None);
        assert_eq!(c.instance_tags(), (0, 0));
        assert!(c.their_public_key().is_none());
    }

    #[test]
    fn test_query_starts_exchange_v3() {
        let mut c = conversation();
        c.policies.add(Policies::ALLOW_V3);

        let commit = c.receive(b"?OTRv3?").unwrap();

        assert_eq!(c.auth_state(), AuthState::AwaitingDhKey);
        assert_eq!(c.version(), Some(Version::V3));
        assert_eq!(&commit[..3], &[0x00, 0x03, MSG_TYPE_DH_COMMIT]);
        assert!(c.our_instance_tag >= MIN_INSTANCE_TAG);

        // body is DATA(encrypted gx) || DATA(32-byte hash)
        let body = &commit[OTRV3_HEADER_LEN..];
        let (rest, _encrypted) = extract_data(body).unwrap();
        let (rest, hash) = extract_data(rest).unwrap();
        assert_eq!(hash.len(), SHA256_LEN);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_query_starts_exchange_v2_without_tags() {
        let mut c = conversation();
        c.policies.add(Policies::ALLOW_V2);

        let commit = c.receive(b"?OTRv2?").unwrap();

        assert_eq!(c.version(), Some(Version::V2));
        assert_eq!(&commit[..3], &[0x00, 0x02, MSG_TYPE_DH_COMMIT]);
        assert_eq!(c.instance_tags(), (0, 0));

        let body = &commit[3..];
        let (rest, _encrypted) = extract_data(body).unwrap();
        let (rest, hash) = extract_data(rest).unwrap();
        assert_eq!(hash.len(), SHA256_LEN);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_query_prefers_v3_over_v2() {
        let mut c = conversation();
        c.policies.add(Policies::ALLOW_V2);
        c.policies.add(Policies::ALLOW_V3);

        c.receive(b"?OTRv23?").unwrap();
        assert_eq!(c.version(), Some(Version::V3));
    }

    #[test]
    fn test_query_with_no_acceptable_version() {
        let mut c = conversation();
        c.policies.add(Policies::ALLOW_V3);

        assert_eq!(c.receive(b"?OTRv2?"), Err(OtrError::InvalidVersion));
        assert_eq!(c.auth_state(), AuthState::None);
    }

    #[test]
    fn test_query_with_exhausted_rng() {
        let mut c = Conversation::with_rng(fixture_private_key(), LimitedRng::with_bytes(8));
        c.policies.add(Policies::ALLOW_V3);

        assert_eq!(c.receive(b"?OTRv3?"), Err(OtrError::ShortRandomRead));
    }

    #[test]
    fn test_receive_empty_and_truncated_input() {
        let mut c = conversation();
        c.policies.add(Policies::ALLOW_V3);

        assert_eq!(c.receive(&[]), Err(OtrError::InvalidOtrMessage));
        assert_eq!(c.receive(&[0x00, 0x03]), Err(OtrError::InvalidOtrMessage));
    }

    #[test]
    fn test_receive_unknown_message_type() {
        let mut c = conversation();
        c.policies.add(Policies::ALLOW_V3);

        let err = c.receive(&[0x00, 0x03, 0x56]).unwrap_err();
        assert_eq!(err, OtrError::UnknownMessageType(0x56));
        assert_eq!(err.to_string(), "unknown message type 0x56");
    }

    #[test]
    fn test_receive_unsupported_version() {
        let mut c = conversation();
        assert_eq!(
            c.receive(&[0x00, 0x01, 0x02]),
            Err(OtrError::UnsupportedOtrVersion)
        );
        assert_eq!(
            c.receive(&[0x00, 0x04, 0x02]),
            Err(OtrError::UnsupportedOtrVersion)
        );
    }

    #[test]
    fn test_data_message_version_check() {
        let mut c = conversation();
        c.policies.add(Policies::ALLOW_V3);
        c.receive(b"?OTRv3?").unwrap();

        // v2 data message against a v3 conversation
        assert_eq!(
            c.receive(&[0x00, 0x02, MSG_TYPE_DATA, 0xAA]),
            Err(OtrError::WrongProtocolVersion)
        );
        // matching version is left to the data layer
        assert_eq!(c.receive(&[0x00, 0x03, MSG_TYPE_DATA, 0xAA]), Ok(Vec::new()));
    }

    #[test]
    fn test_data_message_before_negotiation() {
        let mut c = conversation();
        assert_eq!(
            c.receive(&[0x00, 0x03, MSG_TYPE_DATA]),
            Err(OtrError::WrongProtocolVersion)
        );
    }

    #[test]
    fn test_send_passes_plaintext_through() {
        let mut c = conversation();
        c.policies.add(Policies::ALLOW_V3);
        assert_eq!(c.send(b"hello").unwrap(), b"hello".to_vec());
    }

    #[test]
    fn test_send_with_otr_disabled_ignores_other_policies() {
        let mut c = conversation();
        c.policies.add(Policies::REQUIRE_ENCRYPTION);

        // no version is allowed, so the payload passes through unchanged
        assert_eq!(c.send(b"hello").unwrap(), b"hello".to_vec());

        // even in states that would otherwise refuse to send
        c.msg_state = MessageState::Finished;
        assert_eq!(c.send(b"hello").unwrap(), b"hello".to_vec());
    }

    #[test]
    fn test_send_with_require_encryption_queries() {
        let mut c = conversation();
        c.policies.add(Policies::ALLOW_V3);
        c.policies.add(Policies::REQUIRE_ENCRYPTION);

        assert_eq!(c.send(b"hello").unwrap(), b"?OTRv3?".to_vec());
        // nothing was sent, so no exchange started either
        assert_eq!(c.auth_state(), AuthState::None);
    }

    #[test]
    fn test_send_in_encrypted_and_finished_states() {
        let mut c = conversation();
        c.policies.add(Policies::ALLOW_V3);
        c.msg_state = MessageState::Encrypted;
        assert_eq!(c.send(b"x"), Err(OtrError::InvalidMessageState));

        c.msg_state = MessageState::Finished;
        assert_eq!(c.send(b"x"), Err(OtrError::ConversationFinished));
    }

    #[test]
    fn test_query_message_reflects_policies() {
        let mut c = conversation();
        c.policies.add(Policies::ALLOW_V2);
        c.policies.add(Policies::ALLOW_V3);
        assert_eq!(c.query_message(), b"?OTRv23?".to_vec());
    }

    #[test]
    fn test_instance_tag_is_stable_across_messages() {
        let mut c = conversation();
        c.policies.add(Policies::ALLOW_V3);

        c.receive(b"?OTRv3?").unwrap();
        let (first_tag, _) = c.instance_tags();

        let another = c.ake_message(MSG_TYPE_DH_COMMIT, &[]).unwrap();
        let tag_bytes = &another[3..7];
        assert_eq!(u32::from_be_bytes(tag_bytes.try_into().unwrap()), first_tag);
    }
}
