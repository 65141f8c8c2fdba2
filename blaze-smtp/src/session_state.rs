//! The record an inbound session carries between FSM transitions.
//!
//! Everything the transition function needs to decide on a reply lives
//! here, so [`crate::State::transition`] stays free of I/O.

use std::sync::Arc;

use blaze_common::envelope::Envelope;
use ulid::Ulid;

use crate::{config::Limits, extensions::Extension, session::SessionConfig};

#[derive(Debug, Clone)]
pub struct SessionState {
    /// Session identifier, also stamped on the envelope
    pub id: Ulid,

    /// Client identifier from EHLO/HELO
    pub helo: Option<String>,

    /// `true` if the client greeted with EHLO
    pub extended: bool,

    /// Username accepted by AUTH; survives RSET
    pub authenticated: Option<String>,

    pub envelope: Envelope,

    pub hostname: Arc<str>,
    pub extensions: Vec<Extension>,
    pub limits: Limits,
    pub require_auth: bool,
}

impl SessionState {
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        let id = Ulid::new();

        Self {
            id,
            helo: None,
            extended: false,
            authenticated: None,
            envelope: Envelope::new(id),
            hostname: Arc::clone(&config.hostname),
            extensions: config.extensions.clone(),
            limits: config.limits,
            require_auth: config.require_auth,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated.is_some()
    }

    /// Clears the mail transaction, keeping greeting and authentication.
    pub fn reset_transaction(&mut self) {
        self.envelope.clear();
    }

    /// The EHLO capability lines, greeting first.
    #[must_use]
    pub fn capabilities(&self) -> Vec<String> {
        let mut lines = vec![
            format!(
                "{} greets {}",
                self.hostname,
                self.helo.as_deref().unwrap_or("you")
            ),
            "AUTH PLAIN".to_string(),
            format!("SIZE {}", self.limits.max_message_size),
        ];
        lines.extend(self.extensions.iter().map(ToString::to_string));
        lines
    }
}
