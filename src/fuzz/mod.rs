//! Stress driving: enabled calls, feature flags, mutation and workers.
#[macro_use]
pub mod worker_log;
pub mod calls;
pub mod features;
pub mod mutation;
pub mod stats;
pub mod worker;
