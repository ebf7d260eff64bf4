//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware pipeline)
//!     → request.rs (request ID assigned or propagated)
//!     → handlers.rs (validate payload, dispatch downstream)
//!     → response.rs (errors become the JSON error envelope)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::REQUEST_ID_HEADER;
pub use response::ApiError;
pub use server::{AppState, GatewayServer};
