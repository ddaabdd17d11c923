//! # Sync Engine
//!
//! Drains PENDING visits to the remote authority.
//!
//! | Remote outcome | Local effect |
//! |----------------|--------------|
//! | accepted | PENDING → SENT, summary stored |
//! | duplicate idempotency key | PENDING → SENT (an earlier attempt landed) |
//! | rejected | PENDING → ERROR, no automatic retry |
//! | transport error / timeout | stays PENDING, `attempts += 1` |
//! | transport limit reached | PENDING → ERROR |
//!
//! A single in-flight guard prevents overlapping drain passes; the scheduler
//! and on-demand triggers share it.

pub mod engine;
pub mod scheduler;

pub use engine::SyncEngine;
pub use scheduler::SyncScheduler;
