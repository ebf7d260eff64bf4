//! Caller authentication.
//!
//! # Data Flow
//! ```text
//! Authorization: Bearer <jwt>
//!     → middleware.rs (extract bearer token)
//!     → token.rs (revocation check, signature, expiry)
//!     → Identity in request extensions
//!     → require_roles (privileged routes only)
//! ```
//!
//! # Design Decisions
//! - Revocation is checked before the signature so a logged-out token is
//!   reported as revoked even when it has also expired
//! - One secret, HMAC family only (HS256/384/512); anything else is malformed
//! - Revocations live in memory only and are swept once they expire

pub mod middleware;
pub mod revocation;
pub mod token;

pub use middleware::{bearer_token, require_auth, require_roles, AuthState};
pub use revocation::RevocationStore;
pub use token::{Claims, Identity, TokenValidator};
