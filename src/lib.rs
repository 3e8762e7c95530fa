//! Off-the-Record messaging for protocol versions 2 and 3.
//!
//! This crate implements the authenticated key exchange: the four-message
//! DH-Commit / DH-Key / Reveal-Signature / Signature handshake that takes
//! a conversation from plaintext to encrypted, mutually authenticating
//! both parties' long-term DSA keys along the way. Data-message
//! encryption, the socialist millionaire protocol, and transport framing
//! live outside this crate.

mod ake;
mod auth;
mod conversation;
mod crypto;
mod dh;
mod keys;
mod policy;
mod session;
mod types;
mod version;
mod wire;

pub use auth::AuthState;
pub use conversation::Conversation;
pub use keys::{PrivateKey, PublicKey};
pub use policy::Policies;
pub use session::{DhKeyPair, KeyManagement};
pub use types::{MessageState, OtrError, Result};
pub use version::{parse_query_message, Version};
