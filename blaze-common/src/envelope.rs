use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::address::Address;

/// The addressing state of one mail transaction.
///
/// A sender must be set before recipients can be added, and setting a new
/// sender discards the recipients of the previous cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    session: Ulid,
    received_at: DateTime<Utc>,
    sender: Option<Address>,
    recipients: Vec<Address>,
}

impl Envelope {
    #[must_use]
    pub fn new(session: Ulid) -> Self {
        Self {
            session,
            received_at: Utc::now(),
            sender: None,
            recipients: Vec::new(),
        }
    }

    /// Identifier of the session that owns this envelope
    #[inline]
    #[must_use]
    pub const fn session(&self) -> Ulid {
        self.session
    }

    /// When the current transaction was started
    #[inline]
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    #[inline]
    #[must_use]
    pub const fn sender(&self) -> Option<&Address> {
        self.sender.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    /// Set the sender, starting a fresh transaction.
    pub fn set_sender(&mut self, sender: Address) {
        self.sender = Some(sender);
        self.recipients.clear();
        self.received_at = Utc::now();
    }

    /// Append a recipient, returning `false` if no sender has been set yet.
    #[must_use]
    pub fn add_recipient(&mut self, recipient: Address) -> bool {
        if self.sender.is_none() {
            return false;
        }

        self.recipients.push(recipient);
        true
    }

    /// An envelope can carry data once it has a sender and a recipient.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.sender.is_some() && !self.recipients.is_empty()
    }

    pub fn clear(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn recipients_require_sender() {
        let mut envelope = Envelope::new(Ulid::new());
        assert!(!envelope.add_recipient(addr("to@example.com")));
        assert!(envelope.recipients().is_empty());
        assert!(!envelope.is_ready());

        envelope.set_sender(addr("from@example.com"));
        assert!(envelope.add_recipient(addr("to@example.com")));
        assert!(envelope.add_recipient(addr("cc@example.com")));
        assert!(envelope.is_ready());
        assert_eq!(
            envelope.recipients(),
            &[addr("to@example.com"), addr("cc@example.com")]
        );
    }

    #[test]
    fn new_sender_starts_new_cycle() {
        let mut envelope = Envelope::new(Ulid::new());
        envelope.set_sender(addr("first@example.com"));
        assert!(envelope.add_recipient(addr("to@example.com")));

        envelope.set_sender(addr("second@example.com"));
        assert_eq!(envelope.sender(), Some(&addr("second@example.com")));
        assert!(envelope.recipients().is_empty());
    }

    #[test]
    fn clear_keeps_session() {
        let session = Ulid::new();
        let mut envelope = Envelope::new(session);
        envelope.set_sender(addr("from@example.com"));
        envelope.clear();

        assert_eq!(envelope.session(), session);
        assert!(envelope.sender().is_none());
    }
}
