//! Outbound calls to downstream services.
//!
//! # Data Flow
//! ```text
//! Handler: invoke(service, method, path, payload)
//!     → service.rs (resolve base URL + service key; unknown → configuration error)
//!     → circuit breaker for that service (fail fast when open)
//!     → client.rs (HTTP call under the downstream deadline)
//!     → classify: ok / client-error / server-error / transport-error
//!     → metrics (service, endpoint, outcome, latency)
//!     → decode JSON body
//! ```
//!
//! # Design Decisions
//! - Services are a closed enum; no string routing past the edge
//! - 5xx and transport failures trip the breaker; 4xx and undecodable bodies do not
//! - Downstream bodies are never forwarded in error responses

pub mod client;
pub mod service;

pub use client::Dispatcher;
pub use service::{Service, ServiceDirectory, ServiceEndpoint};
