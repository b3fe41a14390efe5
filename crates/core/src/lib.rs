//! Domain types shared by every cruncher crate.
//!
//! Nothing in here performs I/O: the store, the worker pool and the
//! engine build on these types but live in their own crates.

pub mod analysis;
pub mod error;
pub mod status;
pub mod types;
