//! Offloading decoded messages to a worker pool with per-group limits.
//!
//! [`TaskGroups`] is the admission table, [`TaskPool`] the tokio worker pool
//! built on it, and [`OffloadFilter`] the chain filter that feeds it.

mod filter;
mod groups;
mod listener;
mod pool;
mod task;
#[cfg(test)]
mod tests;

pub use filter::OffloadFilter;
pub use groups::{Admission, GroupStats, TaskGroups};
pub use listener::PoolListener;
pub use pool::{PoolError, TaskPool};
pub use task::{GroupPermit, Task, TaskGroupSpec};
