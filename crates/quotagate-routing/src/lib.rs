//! QuotaGate Routing Engine
//!
//! This crate decides which upstream node serves a request:
//! - Active-node selection with reverse-priority (last registered is
//!   primary)
//! - Two-pass failover search when the active node is unusable
//! - Background sweep scheduler (quota refresh, drained recheck,
//!   offline recovery, discovery)

pub mod engine;
pub mod scheduler;

pub use engine::FailoverEngine;
pub use scheduler::{Scheduler, SweepConfig};
