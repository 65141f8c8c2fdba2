pub mod auth;
pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod data;
pub mod error;
pub mod extensions;
mod fsm;
pub mod listener;
pub mod session;
pub mod session_state;
pub mod state;

pub use config::{Limits, SmtpConfig, SmtpTimeouts, TlsContext};
pub use listener::Listener;
pub use session::{Reply, Session, SessionConfig};
pub use state::State;
