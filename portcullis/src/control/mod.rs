//! IPC control plane: request dispatch, rate limiting, and the local
//! socket server.

pub mod dispatcher;
pub mod rate_limit;
pub mod server;

pub use rate_limit::RateLimiter;
pub use server::serve;
