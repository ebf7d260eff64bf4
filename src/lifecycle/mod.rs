//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger → server drains, sweeps exit
//!
//! Maintenance (maintenance.rs):
//!     interval tick → sweep closure (buckets, revocations)
//!     stop() or process shutdown → loop exits, join awaited
//! ```
//!
//! # Design Decisions
//! - Background work is owned: every spawned loop has a handle that stops it
//! - Shutdown is a broadcast so any number of tasks can observe it

pub mod maintenance;
pub mod shutdown;

pub use maintenance::MaintenanceTask;
pub use shutdown::Shutdown;
