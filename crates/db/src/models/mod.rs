//! Row types for the job store.

pub mod job;
