//! Scheduled delivery core for the Herald notification service.
//!
//! Three pieces of state must stay consistent under restarts and concurrent
//! requests:
//! 1. the relational queue row (listing/audit source of truth),
//! 2. the Redis job store (existence/cancellation source of truth),
//! 3. the process-local timer that actually fires delivery.
//!
//! The [`scheduler::Scheduler`] coordinates all three for schedule, cancel
//! and reschedule operations; the [`pipeline::DeliveryPipeline`] runs the
//! multi-channel retry protocol when a timer fires and cleans up
//! idempotently; the [`restore::RestoreCoordinator`] re-arms timers from the
//! relational store at process start, since timers do not survive a restart.

pub mod job_store;
pub mod pipeline;
pub mod repo;
pub mod restore;
pub mod scheduler;
pub mod timer;
