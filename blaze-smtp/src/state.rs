use core::fmt::{self, Display, Formatter};

use blaze_common::{Address, GatewayError, status::Status};

use crate::{command::Command, session::Reply};

/// Position of an inbound session in the SMTP command sequence.
///
/// Authentication is tracked separately in [`crate::session_state::SessionState`]
/// because RSET and a new transaction never clear it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum State {
    #[default]
    Idle,
    MailSet,
    RecipientsSet,
    Receiving,
    Closed,
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "Idle",
            Self::MailSet => "MailSet",
            Self::RecipientsSet => "RecipientsSet",
            Self::Receiving => "Receiving",
            Self::Closed => "Closed",
        })
    }
}

/// Inputs to the session FSM: client commands, and the outcome of work an
/// earlier [`Effect`] asked for.
#[derive(Debug, Clone)]
pub enum Event {
    Command(Command),
    Authenticated(String),
    SenderVerified(Address),
    /// The message was delivered to every recipient
    DataReceived,
    Failed(GatewayError),
}

/// What the session has to do after a transition.
#[derive(Debug, Clone)]
pub enum Effect {
    Reply(Reply),
    /// Report `error` to the client with `status`; the session stays usable
    Reject {
        status: Status,
        error: GatewayError,
    },
    /// Check PLAIN credentials, prompting for them if no initial response
    /// was given
    Authenticate(Option<String>),
    VerifySender(Address),
    /// Send 354 and read the message data
    ReceiveData,
    Close(Reply),
}

impl Effect {
    pub(crate) fn reply(status: Status, text: impl Into<String>) -> Self {
        Self::Reply(Reply::new(status, text))
    }

    pub(crate) fn reject(status: Status, error: GatewayError) -> Self {
        Self::Reject { status, error }
    }
}
