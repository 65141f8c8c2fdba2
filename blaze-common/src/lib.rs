pub mod address;
pub mod credentials;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod message;
pub mod status;
pub mod traits;
pub mod trust;

pub use tracing;

pub use self::{
    address::Address,
    credentials::Credentials,
    domain::Domain,
    error::{Capacity, GatewayError},
    trust::{Check, CheckStatus, TrustPolicy, TrustReport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
