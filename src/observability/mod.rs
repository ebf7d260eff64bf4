//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → audit.rs (one audit record per request)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON or human format)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Audit trail (`audit` tracing target)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows into every audit record
//! - Metrics are cheap (atomic increments)

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::{AuditRecord, AuditSink, MemoryAuditSink, TracingAuditSink};
