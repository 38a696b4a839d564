//! Owner-thread construction and CPU placement
//!
//! This module is responsible for:
//! - Detecting the CPU cores available to the process
//! - Deciding which core, if any, the owner thread is pinned to
//! - Spawning the owner thread

pub mod cpu_info;
pub mod thread_builder;

pub use cpu_info::CpuInfo;
pub use thread_builder::{PinningResult, ThreadBuilder, WorkerThread};

/// Where the owner thread should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinPolicy {
    /// Let the OS scheduler place the thread
    #[default]
    Unpinned,
    /// Pin to this core index (wrapped to the number of logical cores)
    Core(usize),
    /// Pin to the last logical core on multi-core machines
    Auto,
}

/// Get information about the current system's CPU cores
pub fn detect_cpu_info() -> CpuInfo {
    CpuInfo::detect()
}

/// Create a thread builder for the owner thread
pub fn create_thread_builder(policy: PinPolicy, cpu_info: &CpuInfo) -> ThreadBuilder {
    ThreadBuilder::new(policy, cpu_info)
}
