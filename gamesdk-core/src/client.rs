//! Client facade.
//!
//! A [`Client`] is a [`Core`] that has been started and has seen its first
//! successful drain, which is what most applications want before making
//! feature calls.

use std::time::Duration;

use crate::config::CoreConfig;
use crate::error::{DispatchError, Result};
use crate::lifecycle::Core;
use crate::native::{CreateParams, NativeSdk, ResultCode};

/// A connected native runtime
pub struct Client<S: NativeSdk> {
    core: Core<S>,
}

impl<S: NativeSdk> Client<S> {
    /// Connect using the default native constructor
    pub fn connect(config: CoreConfig) -> Result<Self> {
        Self::connect_with(config, S::create)
    }

    /// Create the native instance with `factory`, start polling and wait up
    /// to `config.init_timeout` for the runtime to initialize.
    ///
    /// On timeout the instance is shut down again and
    /// [`DispatchError::Timeout`] is returned.
    pub fn connect_with<F>(config: CoreConfig, factory: F) -> Result<Self>
    where
        F: FnOnce(CreateParams) -> std::result::Result<S, ResultCode> + Send + 'static,
    {
        let init_timeout = config.init_timeout;
        let core = Core::create_with(config, factory)?;
        core.start()?;

        if !core.wait_until_initialized(init_timeout) {
            tracing::warn!(timeout = ?init_timeout, "native runtime did not initialize");
            core.shutdown();
            return Err(DispatchError::Timeout(init_timeout));
        }

        tracing::info!(client_id = core.config().client_id, "client connected");
        Ok(Self { core })
    }

    /// The underlying dispatcher
    pub fn core(&self) -> &Core<S> {
        &self.core
    }

    pub fn is_initialized(&self) -> bool {
        self.core.is_initialized()
    }

    /// Wait for a piece of native state to become available.
    ///
    /// `probe` runs on the owner thread every poll interval, e.g. to read the
    /// current user once the platform has delivered it.
    pub fn wait_for<T, P>(&self, timeout: Duration, probe: P) -> Result<T>
    where
        P: Fn(&mut S) -> Option<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        self.core.poll_until(timeout, probe)
    }

    /// Shut the runtime down; further calls are refused
    pub fn close(&self) {
        self.core.shutdown();
    }
}
