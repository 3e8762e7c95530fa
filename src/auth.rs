//! The authentication state machine driving the four-message key
//! exchange.
//!
//! Incoming messages are gated on policy, negotiated version, and (for
//! version 3) instance tags before they reach the per-state transition
//! logic. Messages that are valid but arrive in the wrong state are
//! dropped silently: the reply is empty and no state changes, so an
//! observer cannot distinguish which check failed.

use std::fmt;

use crate::conversation::Conversation;
use crate::types::{OtrError, Result, OTRV3_HEADER_LEN};
use crate::version::Version;
use crate::wire::{
    extract_word, DhKeyBody, MSG_TYPE_DH_COMMIT, MSG_TYPE_DH_KEY, MSG_TYPE_REVEAL_SIG,
    MSG_TYPE_SIG,
};

/// Where a conversation stands in the key exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthState {
    /// No exchange in progress.
    #[default]
    None,
    /// We sent a DH-Commit and await the peer's DH-Key.
    AwaitingDhKey,
    /// We sent a DH-Key and await the peer's Reveal-Signature.
    AwaitingRevealSig,
    /// We sent a Reveal-Signature and await the peer's Signature.
    AwaitingSig,
    /// Placeholder for the version 1 handshake; never entered.
    V1Setup,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthState::None => "AUTHSTATE_NONE",
            AuthState::AwaitingDhKey => "AUTHSTATE_AWAITING_DHKEY",
            AuthState::AwaitingRevealSig => "AUTHSTATE_AWAITING_REVEALSIG",
            AuthState::AwaitingSig => "AUTHSTATE_AWAITING_SIG",
            AuthState::V1Setup => "AUTHSTATE_V1_SETUP",
        };
        f.write_str(name)
    }
}

impl Conversation {
    /// Dispatches a key exchange message to the current state.
    ///
    /// `message` is the full wire message including its header; `version`
    /// and `message_type` have already been read from it.
    pub(crate) fn receive_ake(
        &mut self,
        version: Version,
        message_type: u8,
        message: &[u8],
    ) -> Result<Vec<u8>> {
        if !version.is_allowed(self.policies) {
            return Ok(Vec::new());
        }
        match self.version {
            Some(negotiated) if negotiated != version => return Ok(Vec::new()),
            Some(_) => {}
            None => self.version = Some(version),
        }

        let body = match version {
            Version::V2 => &message[version.header_len()..],
            Version::V3 => {
                if message.len() < OTRV3_HEADER_LEN {
                    return Err(OtrError::InvalidOtrMessage);
                }
                let (rest, sender_tag) = extract_word(&message[3..])?;
                let (_, receiver_tag) = extract_word(rest)?;
                if self.our_instance_tag != 0
                    && receiver_tag != 0
                    && receiver_tag != self.our_instance_tag
                {
                    return Ok(Vec::new());
                }
                if self.their_instance_tag == 0 && sender_tag != 0 {
                    self.their_instance_tag = sender_tag;
                }
                &message[OTRV3_HEADER_LEN..]
            }
        };

        match message_type {
            MSG_TYPE_DH_COMMIT => self.receive_dh_commit(body),
            MSG_TYPE_DH_KEY => self.receive_dh_key(body),
            MSG_TYPE_REVEAL_SIG => self.receive_reveal_sig(body),
            MSG_TYPE_SIG => self.receive_sig(body),
            other => Err(OtrError::UnknownMessageType(other)),
        }
    }

    fn receive_dh_commit(&mut self, body: &[u8]) -> Result<Vec<u8>> {
        match self.ake.state {
            AuthState::None => self.accept_dh_commit(body),
            AuthState::AwaitingDhKey => self.resolve_commit_collision(body),
            AuthState::AwaitingRevealSig => {
                // A second commit supersedes the first; the DH-Key reply
                // reuses our existing exponent and is byte-identical.
                self.process_dh_commit(body)?;
                self.dh_key_message()
            }
            AuthState::AwaitingSig => match self.ake.last_reveal_sig.clone() {
                Some(cached) => {
                    self.ake.state = AuthState::AwaitingRevealSig;
                    Ok(cached)
                }
                None => self.accept_dh_commit(body),
            },
            AuthState::V1Setup => Ok(Vec::new()),
        }
    }

    /// Accepts a DH-Commit as responder: store the commitment, answer
    /// with a DH-Key, and wait for the Reveal-Signature.
    fn accept_dh_commit(&mut self, body: &[u8]) -> Result<Vec<u8>> {
        self.process_dh_commit(body)?;
        let reply = self.dh_key_message()?;
        self.ake.state = AuthState::AwaitingRevealSig;
        Ok(reply)
    }

    /// Both sides sent a DH-Commit. The higher commitment hash wins and
    /// keeps the initiator role; the loser restarts as responder.
    fn resolve_commit_collision(&mut self, body: &[u8]) -> Result<Vec<u8>> {
        let (rest, _) = crate::wire::extract_data(body)?;
        let (_, their_hash) = crate::wire::extract_data(rest)?;

        let ours_is_higher = match self.our_commitment_hash() {
            Some(our_hash) => &our_hash[..] > their_hash,
            None => false,
        };

        if ours_is_higher {
            let resend = self.ake.last_dh_commit.clone().unwrap_or_default();
            self.ake.state = AuthState::AwaitingRevealSig;
            Ok(resend)
        } else {
            self.ake.forget_initiator_role();
            self.accept_dh_commit(body)
        }
    }

    fn receive_dh_key(&mut self, body: &[u8]) -> Result<Vec<u8>> {
        match self.ake.state {
            AuthState::AwaitingDhKey => {
                self.process_dh_key(body)?;
                let reply = self.reveal_sig_message()?;
                self.ake.state = AuthState::AwaitingSig;
                Ok(reply)
            }
            AuthState::AwaitingSig => {
                // Only a retransmission of the same DH-Key earns a reply.
                let DhKeyBody { gy } = DhKeyBody::decode(body)?;
                if Some(&gy) == self.ake.their_public_value.as_ref() {
                    Ok(self.ake.last_reveal_sig.clone().unwrap_or_default())
                } else {
                    Ok(Vec::new())
                }
            }
            _ => Ok(Vec::new()),
        }
    }

    fn receive_reveal_sig(&mut self, body: &[u8]) -> Result<Vec<u8>> {
        match self.ake.state {
            AuthState::AwaitingRevealSig => {
                if let Err(err) = self.process_reveal_sig(body) {
                    if err.aborts_ake() {
                        self.ake.reset();
                    }
                    return Err(err);
                }
                let reply = self.sig_message()?;
                self.install_session_keys();
                Ok(reply)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn receive_sig(&mut self, body: &[u8]) -> Result<Vec<u8>> {
        match self.ake.state {
            AuthState::AwaitingSig => {
                if let Err(err) = self.process_sig(body) {
                    if err.aborts_ake() {
                        self.ake.reset();
                    }
                    return Err(err);
                }
                self.install_session_keys();
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }
}
