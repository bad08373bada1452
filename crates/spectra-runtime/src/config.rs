//! Shared, runtime-mutable configuration

use parking_lot::RwLock;
use spectra_core::{DspConfig, SpectraResult};
use std::sync::Arc;
use tracing::{info, warn};

/// Cloneable handle to the live [`DspConfig`]
///
/// Readers take a copy per tick, so a change becomes visible on the next
/// tick. A change that fails validation leaves the live configuration
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<DspConfig>>,
}

impl ConfigHandle {
    pub fn new(config: DspConfig) -> SpectraResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(config)),
        })
    }

    /// Copy of the current configuration
    pub fn current(&self) -> DspConfig {
        self.inner.read().clone()
    }

    /// Read a single value without copying the whole configuration
    pub fn read<R>(&self, f: impl FnOnce(&DspConfig) -> R) -> R {
        f(&self.inner.read())
    }

    /// Run a sequence of setters as one change; all or nothing
    pub fn update<F>(&self, change: F) -> SpectraResult<()>
    where
        F: FnOnce(&mut DspConfig) -> SpectraResult<()>,
    {
        let mut live = self.inner.write();
        let mut candidate = live.clone();
        if let Err(e) = change(&mut candidate).and_then(|_| candidate.validate()) {
            warn!(error = %e, "configuration change rejected");
            return Err(e);
        }
        *live = candidate;
        info!("configuration updated");
        Ok(())
    }

    /// Swap in a whole new configuration
    pub fn replace(&self, config: DspConfig) -> SpectraResult<()> {
        config.validate()?;
        *self.inner.write() = config;
        info!("configuration replaced");
        Ok(())
    }
}
