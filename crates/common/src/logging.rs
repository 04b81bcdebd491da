//! Logging setup and the verbose toggle

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Setup tracing subscriber for the application
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Logging already initialized: {}", e)))?;

    Ok(())
}

/// Process-wide switch for per-URB diagnostics
///
/// Clones share the same flag. Toggling it changes how much is logged, never
/// how the protocol behaves.
#[derive(Debug, Clone, Default)]
pub struct VerboseFlag(Arc<AtomicBool>);

impl VerboseFlag {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

/// Log at `info` only while the given [`VerboseFlag`] is enabled
///
/// ```
/// use common::{VerboseFlag, verbose};
///
/// let flag = VerboseFlag::new(false);
/// verbose!(flag, "CMD_SUBMIT seq {}", 1); // suppressed
/// ```
#[macro_export]
macro_rules! verbose {
    ($flag:expr, $($arg:tt)+) => {
        if $flag.is_enabled() {
            $crate::__tracing::info!($($arg)+);
        }
    };
}
