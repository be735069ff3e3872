//! Platform adapters
//!
//! The tracker never branches on its environment. Everything that differs
//! between a browser page and a server process sits behind
//! [`PlatformAdapter`]:
//!
//! | Capability | Browser | Server |
//! |------------|---------|--------|
//! | `user_id` | persisted under `webticks_uid` | generated per adapter instance |
//! | `send_batch` | POST, destination resolved against the page URL | POST to the destination as given |
//! | `current_path` | live `href` | `None` |
//! | `setup_auto_tracking` | navigation watcher + visibility/page-hide listeners | logs guidance only |
//! | `teardown_auto_tracking` | reverses setup exactly | no-op |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  setup(sink)   ┌──────────────────┐   listeners   ┌──────────────┐
//! │   Tracker   │ ─────────────► │  BrowserAdapter  │ ────────────► │ BrowserHost  │
//! │             │ ◄───────────── │  (+ Navigation-  │ ◄──────────── │ (history,    │
//! └─────────────┘  TrackingSink  │   Watcher)       │    events     │  storage)    │
//!                                └──────────────────┘               └──────────────┘
//! ```

mod browser;
pub mod host;
mod navigation;
mod server;

pub use browser::BrowserAdapter;
pub use navigation::{NavigationStrategy, NavigationWatcher};
pub use server::ServerAdapter;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::transport::Delivery;
use crate::types::BatchPayload;

/// Runtime family an adapter serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Browser,
    Server,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Browser => f.write_str("browser"),
            Platform::Server => f.write_str("server"),
        }
    }
}

/// Callbacks an adapter uses to report environment signals to its tracker.
///
/// Handed to [`PlatformAdapter::setup_auto_tracking`]. Implementations hold
/// only a weak reference to the tracker, so installed listeners never keep
/// a dropped tracker alive.
pub trait TrackingSink: Send + Sync {
    /// The location may have changed; record a page view if it did.
    fn location_changed(&self);

    /// The document became visible or hidden.
    fn visibility_changed(&self, visible: bool);

    /// The page is going away; attempt one best-effort flush.
    fn page_terminating(&self);
}

/// Environment-specific identity, transport and navigation wiring.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Durable (browser) or instance-scoped (server) user identifier
    fn user_id(&self) -> String;

    /// Transmit one batch to `destination`.
    ///
    /// Non-2xx responses come back as [`Delivery::Rejected`], not as errors.
    async fn send_batch(&self, destination: &str, batch: &BatchPayload) -> Result<Delivery>;

    /// The current location, when the runtime has one
    fn current_path(&self) -> Option<String>;

    /// Install environment listeners that report into `sink`.
    fn setup_auto_tracking(&self, sink: Arc<dyn TrackingSink>) -> Result<()>;

    /// Remove exactly what [`Self::setup_auto_tracking`] installed.
    fn teardown_auto_tracking(&self);
}
