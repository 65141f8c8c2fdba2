//! SMTP Finite State Machine implementation.
//!
//! Transitions only touch the [`SessionState`] record and return the
//! [`Effect`] the session must carry out next. Anything that needs the
//! network (credential checks, sender verification, reading DATA, relaying)
//! is requested through an effect and its outcome fed back in as an
//! [`Event`].

use blaze_common::{
    Capacity, GatewayError, status::Status, traits::fsm::FiniteStateMachine,
};

use crate::{
    command::{Command, HeloVariant},
    session::Reply,
    session_state::SessionState,
    state::{Effect, Event, State},
};

/// The reply code used to report `error` while in `state`.
fn rejection_status(state: State, error: &GatewayError) -> Status {
    match (state, error) {
        (State::Receiving, GatewayError::CapacityExceeded(_)) => Status::ExceededStorage,
        (State::Receiving, GatewayError::Network(_) | GatewayError::Authentication(_)) => {
            Status::ActionAborted
        }
        (State::Receiving, _) => Status::TransactionFailed,
        (_, GatewayError::Authentication(_)) => Status::AuthFailed,
        (_, GatewayError::TrustVerification(_)) => Status::Error,
        (_, GatewayError::Validation(_)) => Status::ParameterError,
        (_, GatewayError::CapacityExceeded(Capacity::Recipients { .. })) => {
            Status::InsufficientStorage
        }
        (_, GatewayError::CapacityExceeded(_)) => Status::ExceededStorage,
        // Outside DATA only sender verification reaches the network
        (_, GatewayError::Network(_)) => Status::MailboxUnavailable,
        (_, GatewayError::Protocol(_)) => Status::InvalidCommandSequence,
    }
}

impl State {
    fn on_command(self, command: Command, ctx: &mut SessionState) -> (Self, Effect) {
        match command {
            Command::Helo(variant) => {
                let (id, extended) = match variant {
                    HeloVariant::Ehlo(id) => (id, true),
                    HeloVariant::Helo(id) => (id, false),
                };

                ctx.reset_transaction();
                ctx.extended = extended;
                ctx.helo = Some(id);

                let reply = if extended {
                    Reply::multiline(Status::Ok, ctx.capabilities())
                } else {
                    let mut lines = ctx.capabilities();
                    lines.truncate(1);
                    Reply::multiline(Status::Ok, lines)
                };

                (Self::Idle, Effect::Reply(reply))
            }

            Command::Auth { mechanism, initial } => {
                if ctx.is_authenticated() {
                    let error = GatewayError::Protocol("already authenticated".to_string());
                    (self, Effect::reject(Status::InvalidCommandSequence, error))
                } else if self != Self::Idle {
                    let error = GatewayError::Protocol(
                        "AUTH is not permitted during a mail transaction".to_string(),
                    );
                    (self, Effect::reject(Status::InvalidCommandSequence, error))
                } else if mechanism != "PLAIN" {
                    let error = GatewayError::Protocol(format!(
                        "unrecognised authentication mechanism {mechanism}"
                    ));
                    (self, Effect::reject(Status::ParameterNotImplemented, error))
                } else {
                    (self, Effect::Authenticate(initial))
                }
            }

            Command::MailFrom(from, params) => {
                let limit = ctx.limits.max_message_size;

                if ctx.require_auth && !ctx.is_authenticated() {
                    let error = GatewayError::Authentication("authentication required".to_string());
                    (self, Effect::reject(Status::AuthRequired, error))
                } else if params.size().is_some_and(|size| size > limit) {
                    let error = GatewayError::CapacityExceeded(Capacity::MessageSize { limit });
                    (self, Effect::reject(Status::ExceededStorage, error))
                } else {
                    (self, Effect::VerifySender(from))
                }
            }

            Command::RcptTo(to) => {
                let limit = ctx.limits.max_recipients;

                if self == Self::Idle {
                    let error = GatewayError::Protocol("need MAIL before RCPT".to_string());
                    (self, Effect::reject(Status::InvalidCommandSequence, error))
                } else if ctx.envelope.recipients().len() >= limit {
                    let error = GatewayError::CapacityExceeded(Capacity::Recipients { limit });
                    (self, Effect::reject(Status::InsufficientStorage, error))
                } else if ctx.envelope.add_recipient(to) {
                    (Self::RecipientsSet, Effect::reply(Status::Ok, "2.1.5 Recipient OK"))
                } else {
                    let error = GatewayError::Protocol("no sender set".to_string());
                    (self, Effect::reject(Status::InvalidCommandSequence, error))
                }
            }

            Command::Data => match self {
                Self::RecipientsSet => (Self::Receiving, Effect::ReceiveData),
                Self::MailSet => {
                    let error = GatewayError::Protocol("need RCPT before DATA".to_string());
                    (self, Effect::reject(Status::InvalidCommandSequence, error))
                }
                _ => {
                    let error = GatewayError::Protocol("need MAIL before DATA".to_string());
                    (self, Effect::reject(Status::InvalidCommandSequence, error))
                }
            },

            Command::Rset => {
                ctx.reset_transaction();
                (Self::Idle, Effect::reply(Status::Ok, "2.0.0 Reset state"))
            }

            Command::Noop => (self, Effect::reply(Status::Ok, "2.0.0 Ok")),

            Command::Quit => {
                ctx.reset_transaction();
                (
                    Self::Closed,
                    Effect::Close(Reply::new(Status::GoodBye, "2.0.0 Bye")),
                )
            }

            Command::Malformed { verb, reason } => {
                let error = GatewayError::Validation(format!("{verb}: {reason}"));
                (self, Effect::reject(Status::ParameterError, error))
            }

            Command::Invalid(command) => {
                let error = GatewayError::Protocol(format!("unrecognised command '{command}'"));
                (self, Effect::reject(Status::SyntaxError, error))
            }
        }
    }
}

impl FiniteStateMachine for State {
    type Input = Event;
    type Context = SessionState;
    type Effect = Effect;

    fn transition(self, input: Self::Input, ctx: &mut Self::Context) -> (Self, Self::Effect) {
        match (self, input) {
            (Self::Closed, _) => (
                Self::Closed,
                Effect::Close(Reply::new(Status::Unavailable, "Session closed")),
            ),

            (Self::Receiving, Event::DataReceived) => {
                ctx.reset_transaction();
                (
                    Self::Idle,
                    Effect::reply(Status::Ok, format!("2.0.0 Ok: relayed as {}", ctx.id)),
                )
            }

            (Self::Receiving, Event::Failed(error)) => {
                let status = rejection_status(Self::Receiving, &error);
                ctx.reset_transaction();
                (Self::Idle, Effect::reject(status, error))
            }

            (Self::Receiving, _) => {
                let error = GatewayError::Protocol("message data in progress".to_string());
                (Self::Receiving, Effect::reject(Status::InvalidCommandSequence, error))
            }

            (state, Event::Command(command)) => state.on_command(command, ctx),

            (state, Event::Authenticated(user)) => {
                ctx.authenticated = Some(user);
                (
                    state,
                    Effect::reply(Status::AuthSucceeded, "2.7.0 Authentication successful"),
                )
            }

            (_, Event::SenderVerified(sender)) => {
                ctx.envelope.set_sender(sender);
                (Self::MailSet, Effect::reply(Status::Ok, "2.1.0 Sender OK"))
            }

            (state, Event::Failed(error)) => {
                let status = rejection_status(state, &error);
                (state, Effect::reject(status, error))
            }

            (state, Event::DataReceived) => {
                let error = GatewayError::Protocol("no message in progress".to_string());
                (state, Effect::reject(Status::InvalidCommandSequence, error))
            }
        }
    }
}
