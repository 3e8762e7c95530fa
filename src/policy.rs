//! Policy flags controlling which protocol versions and behaviors a
//! conversation accepts.
//!
//! Policies are a small bitmap; a conversation with an empty policy set
//! refuses to negotiate OTR at all.

/// A set of policy flags for one conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policies(u32);

impl Policies {
    /// Accept OTR version 1 offers. Present for wire compatibility only;
    /// no version 1 exchange is ever carried out.
    pub const ALLOW_V1: Policies = Policies(1);
    /// Accept OTR version 2.
    pub const ALLOW_V2: Policies = Policies(1 << 1);
    /// Accept OTR version 3.
    pub const ALLOW_V3: Policies = Policies(1 << 2);
    /// Refuse to send plaintext; sending while unencrypted emits a query
    /// message instead.
    pub const REQUIRE_ENCRYPTION: Policies = Policies(1 << 3);
    /// Advertise OTR support by appending a whitespace tag to plaintext.
    pub const SEND_WHITESPACE_TAG: Policies = Policies(1 << 4);
    /// Start a key exchange when a whitespace tag is received.
    pub const WHITESPACE_START_AKE: Policies = Policies(1 << 5);
    /// Start a key exchange when an OTR error message is received.
    pub const ERROR_START_AKE: Policies = Policies(1 << 6);

    /// Creates an empty policy set.
    pub fn new() -> Self {
        Policies(0)
    }

    /// Adds the given flags to this set.
    pub fn add(&mut self, flags: Policies) {
        self.0 |= flags.0;
    }

    /// Returns a copy of this set with the given flags added.
    pub fn with(mut self, flags: Policies) -> Self {
        self.add(flags);
        self
    }

    /// Whether every flag in `flags` is present in this set.
    pub fn has(self, flags: Policies) -> bool {
        self.0 & flags.0 == flags.0
    }

    /// Whether any version of OTR may be negotiated under this set.
    pub fn is_otr_enabled(self) -> bool {
        self.has(Policies::ALLOW_V1) || self.has(Policies::ALLOW_V2) || self.has(Policies::ALLOW_V3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_policies() {
        let p = Policies::new();
        assert!(!p.has(Policies::ALLOW_V2));
        assert!(!p.has(Policies::ALLOW_V3));
        assert!(!p.is_otr_enabled());
    }

    #[test]
    fn test_add_and_has() {
        let mut p = Policies::new();
        p.add(Policies::ALLOW_V3);
        assert!(p.has(Policies::ALLOW_V3));
        assert!(!p.has(Policies::ALLOW_V2));

        p.add(Policies::ALLOW_V2);
        assert!(p.has(Policies::ALLOW_V2));
        assert!(p.has(Policies::ALLOW_V3));
        assert!(p.is_otr_enabled());
    }

    #[test]
    fn test_builder_style() {
        let p = Policies::new()
            .with(Policies::ALLOW_V3)
            .with(Policies::REQUIRE_ENCRYPTION);
        assert!(p.has(Policies::ALLOW_V3));
        assert!(p.has(Policies::REQUIRE_ENCRYPTION));
        assert!(!p.has(Policies::SEND_WHITESPACE_TAG));
    }

    #[test]
    fn test_has_requires_all_flags() {
        let p = Policies::new().with(Policies::ALLOW_V2);
        let both = Policies::ALLOW_V2.with(Policies::ALLOW_V3);
        assert!(!p.has(both));
    }
}
