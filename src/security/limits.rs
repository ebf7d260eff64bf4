//! Request size limits.
//!
//! Bodies above `security.max_body_size` are rejected with 413 Payload Too
//! Large before any handler or downstream call sees them.

use tower_http::limit::RequestBodyLimitLayer;

use crate::config::SecurityConfig;

pub fn body_limit_layer(config: &SecurityConfig) -> RequestBodyLimitLayer {
    RequestBodyLimitLayer::new(config.max_body_size)
}
