//! Structured logging infrastructure for retpl
//!
//! Log output goes to stderr so it never mixes with rendered template
//! output. The filter level is derived from an integer verbosity and can
//! be swapped at runtime through a [`LogHandle`].

use std::io;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use thiserror::Error;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::Registry, reload, util::SubscriberInitExt, EnvFilter,
};

/// Errors raised while reconfiguring the logging system
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The reloadable filter could not be swapped
    #[error("failed to swap the active log filter: {0}")]
    FilterSwap(#[from] reload::Error),
}

/// Handle to the process-wide logging filter
///
/// Cloning is cheap; all clones point at the same filter. The last
/// successfully applied verbosity is remembered so callers can restore it
/// after a failed swap.
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    verbosity: Arc<Mutex<i64>>,
}

impl LogHandle {
    /// Swap the active filter to the given verbosity
    pub fn set_verbosity(&self, verbosity: i64) -> Result<(), LoggingError> {
        self.filter.reload(verbosity_filter(verbosity))?;
        *self.verbosity.lock() = verbosity;
        Ok(())
    }

    /// The last successfully applied verbosity
    pub fn verbosity(&self) -> i64 {
        *self.verbosity.lock()
    }
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle")
            .field("verbosity", &self.verbosity())
            .finish_non_exhaustive()
    }
}

/// Map an integer verbosity to a filter
///
/// Higher numbers unlock more diagnostic output: `0` keeps the default
/// informational level, `1` adds debug output, anything above adds trace
/// output. Negative values clamp to the default.
pub fn verbosity_filter(verbosity: i64) -> EnvFilter {
    EnvFilter::new(verbosity_directive(verbosity))
}

fn verbosity_directive(verbosity: i64) -> &'static str {
    match verbosity {
        v if v <= 0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

static GLOBAL_HANDLE: OnceLock<LogHandle> = OnceLock::new();

/// Install the stderr subscriber and return a handle to its filter
///
/// The subscriber is installed at most once per process; later calls
/// return a handle to the already-installed filter and leave the active
/// verbosity untouched.
pub fn init(verbosity: i64) -> LogHandle {
    GLOBAL_HANDLE
        .get_or_init(|| {
            let (filter, handle) = reload::Layer::new(verbosity_filter(verbosity));
            let result = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr).with_target(true))
                .try_init();
            if let Err(err) = result {
                eprintln!("error installing tracing subscriber: {err}");
            }
            LogHandle {
                filter: handle,
                verbosity: Arc::new(Mutex::new(verbosity)),
            }
        })
        .clone()
}
