//! Service gateway library.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                    SERVICE GATEWAY                   │
//!                     │                                                      │
//!   Client Request    │  ┌──────────┐   ┌──────────┐   ┌──────────┐          │
//!   ──────────────────┼─▶│ security │──▶│   auth   │──▶│ handlers │          │
//!                     │  │rate limit│   │ jwt/revoc│   │          │          │
//!                     │  └──────────┘   └──────────┘   └────┬─────┘          │
//!                     │                                     │                │
//!                     │                                     ▼                │
//!                     │                              ┌─────────────┐         │
//!                     │                              │  dispatch   │         │
//!                     │                              │ + breakers  │─────────┼──▶ data service
//!                     │                              └─────────────┘─────────┼──▶ rules service
//!                     │                                                      │
//!                     │  ┌────────────────────────────────────────────────┐  │
//!                     │  │              Cross-Cutting Concerns            │  │
//!                     │  │  config · observability (logs, metrics, audit) │  │
//!                     │  │  lifecycle (shutdown, maintenance sweeps)      │  │
//!                     │  └────────────────────────────────────────────────┘  │
//!                     └──────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod http;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
