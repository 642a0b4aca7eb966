//! Process-wide configuration.
//!
//! The configuration is read once per monitored call that has at least one
//! attached spec, and once per registration to resolve the copy flag. Changing
//! it never affects a dispatch already in progress.

use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::handler::{ErrorHandler, RaiseErrorHandler};

/// Global defaults applied to every spec without a per-spec override.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Handler receiving the failures of specs without their own handler.
    pub error_handler: Arc<dyn ErrorHandler>,
    /// Whether specs registered without an explicit choice deep-copy call arguments.
    pub copy_arguments: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            error_handler: Arc::new(RaiseErrorHandler::default()),
            copy_arguments: true,
        }
    }
}

impl Configuration {
    #[must_use]
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    #[must_use]
    pub const fn with_copy_arguments(mut self, copy: bool) -> Self {
        self.copy_arguments = copy;
        self
    }
}

static CONFIGURATION: Lazy<RwLock<Configuration>> = Lazy::new(|| RwLock::new(Configuration::default()));

/// Replaces the global configuration and returns the previous one.
pub fn configure(configuration: Configuration) -> Configuration {
    debug!(
        copy_arguments = configuration.copy_arguments,
        error_handler = ?configuration.error_handler,
        "global configuration updated"
    );
    let mut current = CONFIGURATION.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *current, configuration)
}

/// The current global configuration.
#[must_use]
pub fn configuration() -> Configuration {
    CONFIGURATION
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Restores the defaults: raise at `Error` and copy arguments.
pub fn reset() -> Configuration {
    configure(Configuration::default())
}
