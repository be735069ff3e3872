//! # webticks-core
//!
//! Core library for webticks - lightweight usage instrumentation.
//!
//! This library provides:
//! - An event [`Tracker`] with an in-memory queue and a periodic flush cycle
//! - Platform adapters for browser pages and server processes
//! - Navigation watching for client-side route changes
//! - HTTP batch delivery, a `tower` request middleware and a process-wide
//!   tracker registry
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Events flow through three stages:
//! - **Record:** page views, custom events and server requests are appended
//!   to the tracker's queue. Recording never fails and never blocks on I/O.
//! - **Flush:** the queue is swapped out and sent as one JSON batch.
//! - **Commit or requeue:** an acknowledged batch is dropped; anything else
//!   puts it back in front of the queue for the next flush.
//!
//! ## Example
//!
//! ```rust,no_run
//! use webticks_core::{ServerRequest, Tracker, TrackerConfig};
//!
//! # async fn run() -> webticks_core::Result<()> {
//! let config = TrackerConfig::with_destination("https://collect.example.com/api/track");
//! let tracker = Tracker::for_server(config)?;
//!
//! tracker.record_server_request(ServerRequest::new("GET", "/pricing"));
//! tracker.record_custom_event("signup", serde_json::json!({ "plan": "pro" }));
//!
//! let outcome = tracker.flush().await;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use adapter::{BrowserAdapter, Platform, PlatformAdapter, ServerAdapter};
pub use config::{Config, TrackerConfig};
pub use error::{Error, Result};
pub use tracker::{FlushOutcome, Tracker, TrackerStats};
pub use types::*;

// Public modules
pub mod adapter;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod middleware;
pub mod queue;
pub mod registry;
pub mod tracker;
pub mod transport;
pub mod types;
