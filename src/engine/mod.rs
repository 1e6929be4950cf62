//! Supervisors that drive the queue: the worker loop and the maintenance loop.
//!
//! Retry policy lives here, not in the queue. A [`Worker`] leases messages,
//! hands them to a [`Handler`], and then records exactly one outcome.

pub mod maintenance;
pub mod worker;

pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceReport};
pub use worker::{BatchReport, Handler, HandlerError, Worker, WorkerConfig};
