//! Client Module
//!
//! Request execution against the remote query API.
//!
//! # Components
//! - `RequestExecutor`: cache check, deduplication, retries and invalidation
//! - `ConcurrencyGate`: bounded number of requests in flight
//! - `RateLimiter`: outbound pacing with burst protection
//! - `Transport` / `AuthProvider`: injected collaborators

mod auth;
mod executor;
mod gate;
mod invalidation;
mod rate_limiter;
mod retry;
mod transport;

pub use auth::{AuthProvider, StaticTokenAuth};
pub use executor::{
    BatchRequest, Operation, QueryContext, RequestExecutor, RequestOptions, RequestState,
};
pub use gate::ConcurrencyGate;
pub use invalidation::{tag_pattern, InvalidationPlan, InvalidationRules, ACCOUNT_DETAIL_OPERATION};
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
pub use transport::{
    classify_response, looks_like_auth_failure, HttpTransport, Transport, TransportResponse,
};
