//! Ctrl+C handling: stop scheduling detector runs, let running ones finish.

use std::sync::atomic::{AtomicBool, Ordering};

static CANCELLED: AtomicBool = AtomicBool::new(false);

/// Check if cancellation has been requested.
pub fn is_cancelled() -> bool {
    CANCELLED.load(Ordering::SeqCst)
}

/// Request cancellation, as the Ctrl+C handler does.
pub fn request() {
    CANCELLED.store(true, Ordering::SeqCst);
}

/// Register the Ctrl+C handler. A second registration is ignored.
pub fn register_handler() {
    if let Err(e) = ctrlc::set_handler(request) {
        log::debug!("Ctrl+C handler not installed: {}", e);
    }
}

/// Reset the cancellation flag (for testing or re-use).
pub fn reset() {
    CANCELLED.store(false, Ordering::SeqCst);
}
