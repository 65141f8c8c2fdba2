//! Sender trust verification and upstream relaying.

pub mod config;
pub mod dns;
pub mod error;
pub mod gate;
pub mod relay;
pub mod verifier;

pub use config::{RelayConfig, RelayProfile, VerifyConfig};
pub use dns::{DnsError, DnsLookup, HickoryLookup};
pub use error::RelayError;
pub use gate::SenderGate;
pub use relay::Relay;
pub use verifier::DomainVerifier;
