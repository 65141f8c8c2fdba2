//! HTTP submission and verification API.

pub mod claims;
pub mod config;
pub mod error;
mod handlers;
pub mod middleware;
pub mod rate_limiter;
pub mod request;
mod server;
mod state;

pub use claims::{Claims, TokenError, TokenIssuer};
pub use config::{ApiConfig, ApiUser, RateLimitConfig};
pub use error::{ApiError, ServerError};
pub use rate_limiter::RateLimiter;
pub use server::{ApiServer, router};
pub use state::ApiState;
