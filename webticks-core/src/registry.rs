//! Process-wide tracker slot
//!
//! Application code that does not hold a [`Tracker`] reaches the injected
//! one through this module. There is one slot per process; injecting while
//! it is occupied leaves the existing tracker in place.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use crate::tracker::Tracker;

static GLOBAL: Lazy<Mutex<Option<Tracker>>> = Lazy::new(|| Mutex::new(None));

/// Start automatic tracking on `tracker` and publish it.
///
/// Returns the installed handle, or `None` when a tracker is already
/// installed. The rejected tracker is not started.
pub fn inject(tracker: Tracker) -> Option<Tracker> {
    {
        let mut slot = GLOBAL.lock();
        if slot.is_some() {
            warn!("A tracker is already installed, ignoring injection");
            return None;
        }
        *slot = Some(tracker.clone());
    }

    // Adapter setup may call back into this module.
    tracker.start_automatic_tracking();
    info!(session_id = %tracker.session_id(), "Tracker installed");
    Some(tracker)
}

/// The installed tracker, if any
pub fn global() -> Option<Tracker> {
    GLOBAL.lock().clone()
}

/// Destroy and remove the installed tracker. Returns false when the slot
/// was empty.
pub fn uninstall() -> bool {
    // Destroy outside the lock; teardown may run listener code.
    let Some(tracker) = GLOBAL.lock().take() else {
        return false;
    };
    tracker.destroy();
    info!("Tracker uninstalled");
    true
}

/// Record a custom event on the installed tracker.
///
/// Returns false, and records nothing, when no tracker is installed.
pub fn record_custom_event(name: &str, details: Value) -> bool {
    match global() {
        Some(tracker) => {
            tracker.record_custom_event(name, details);
            true
        }
        None => {
            warn!(event = %name, "No tracker installed, dropping custom event");
            false
        }
    }
}
