//! Request lifecycle reconstruction from thread-tagged command logs.
//!
//! Raw logs are scanned once: start and end lines are paired per thread to
//! produce completed requests with concurrency snapshots, and start lines
//! are counted into per-second, per-minute and per-hour rate tables. The
//! completed requests are joined with CPU and switch-flow series and
//! persisted one file at a time into a timestamp-keyed training table.

pub mod cmdlog;
pub mod config;
pub mod dataset;
pub mod export;
pub mod join;
pub mod lifecycle;
pub mod migrate;
pub mod pipeline;
pub mod rate;
pub mod registry;
