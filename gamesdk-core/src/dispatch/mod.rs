//! Affinity dispatcher.
//!
//! This module moves work onto the owner thread: a bounded queue any thread
//! can submit closures to, and the loop on the owner thread that runs them
//! and drains native completions between tasks.

pub(crate) mod owner;
pub mod queue;

pub use owner::DrainStats;
pub use queue::{CallQueue, OwnerTask};
