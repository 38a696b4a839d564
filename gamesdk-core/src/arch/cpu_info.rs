//! CPU detection for owner-thread placement

use std::fmt;

use super::PinPolicy;

/// Core counts of the current machine
#[derive(Clone, PartialEq, Eq)]
pub struct CpuInfo {
    /// Total number of logical CPU cores
    logical_cores: usize,
    /// Total number of physical CPU cores (if available)
    physical_cores: Option<usize>,
}

impl fmt::Debug for CpuInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuInfo")
            .field("logical_cores", &self.logical_cores)
            .field("physical_cores", &self.physical_cores)
            .finish()
    }
}

impl CpuInfo {
    /// Detect the core counts of the current system
    pub fn detect() -> Self {
        let logical_cores = num_cpus::get().max(1);

        // Physical count may not be available on all platforms
        let physical_cores = match num_cpus::get_physical() {
            count if count > 0 => Some(count),
            _ => None,
        };

        Self {
            logical_cores,
            physical_cores,
        }
    }

    /// Get the total number of logical CPU cores
    pub fn logical_cores(&self) -> usize {
        self.logical_cores
    }

    /// Get the total number of physical CPU cores (if available)
    pub fn physical_cores(&self) -> Option<usize> {
        self.physical_cores
    }

    /// Resolve a pinning policy to a concrete core index.
    ///
    /// `Auto` picks the last logical core so core 0 stays free for the
    /// process's main thread, and does not pin at all on a single-core
    /// machine. An explicit core beyond the machine wraps around.
    pub fn core_for_owner(&self, policy: &PinPolicy) -> Option<usize> {
        match policy {
            PinPolicy::Unpinned => None,
            PinPolicy::Core(core) => Some(core % self.logical_cores),
            PinPolicy::Auto if self.logical_cores > 1 => Some(self.logical_cores - 1),
            PinPolicy::Auto => None,
        }
    }

    /// Create a fixed CpuInfo for testing
    #[cfg(test)]
    pub fn mock(logical_cores: usize) -> Self {
        Self {
            logical_cores,
            physical_cores: Some((logical_cores / 2).max(1)),
        }
    }
}
