//! Fatal Error Path
//!
//! Programming contract violations (double release, forbidden re-entrant calls,
//! stopping a plug-in whose symbols are still in use, ...) are never returned to
//! the caller. They are reported here and the process is terminated.

use std::sync::Arc;

use log::error;
use parking_lot::RwLock;

/// Host supplied handler invoked before the process is aborted
pub type FatalErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

static HANDLER: RwLock<Option<FatalErrorHandler>> = parking_lot::const_rwlock(None);

/// Install (or clear) the fatal error handler.
///
/// The handler receives the diagnostic message. If it returns, the process is
/// aborted anyway; a handler may only avoid termination by unwinding.
pub fn set_fatal_error_handler(handler: Option<FatalErrorHandler>) {
    *HANDLER.write() = handler;
}

/// Report a contract violation and terminate
#[cold]
pub fn fatal_error(message: &str) -> ! {
    error!(target: "pluginrt", "FATAL: {}", message);

    let handler = HANDLER.read().clone();
    match handler {
        Some(handler) => handler(message),
        None => eprintln!("pluginrt: FATAL ERROR: {}", message),
    }

    std::process::abort()
}

/// Format a diagnostic and call [`fatal_error`]
macro_rules! fatal {
    ($($arg:tt)*) => {
        $crate::fatal::fatal_error(&format!($($arg)*))
    };
}

pub(crate) use fatal;
