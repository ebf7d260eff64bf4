//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs (cap request body size)
//!     → rate_limit.rs (general per-IP, login per-IP, admin per-user)
//!     → headers.rs (security headers on the way out)
//!     → Pass to auth / handlers
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - No trust in client input: the peer address is the socket address,
//!   never a forwarded header

use axum::extract::ConnectInfo;
use axum::http::Request;
use std::net::SocketAddr;

pub mod headers;
pub mod limits;
pub mod rate_limit;

pub use rate_limit::{LimiterRole, RateDecision, RateLimiter, RateLimiters};

/// Peer IP recorded by the server, or "unknown" when served without connect info.
pub fn client_ip<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_from_connect_info() {
        let mut req = Request::builder().body(()).unwrap();
        assert_eq!(client_ip(&req), "unknown");

        let addr: SocketAddr = "10.1.2.3:5555".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_ip(&req), "10.1.2.3");
    }
}
