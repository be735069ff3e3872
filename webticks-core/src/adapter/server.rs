//! Server process adapter
//!
//! A server has no page, no history and no visibility. Page views and
//! navigation do not apply; the host framework reports requests itself
//! through [`crate::Tracker::record_server_request`] or the
//! [`crate::middleware::TrackingLayer`].

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tracing::info;

use super::{Platform, PlatformAdapter, TrackingSink};
use crate::error::Result;
use crate::identity::{IdGenerator, UuidGenerator};
use crate::transport::{Delivery, Transport};
use crate::types::BatchPayload;

/// [`PlatformAdapter`] for server-side runtimes.
pub struct ServerAdapter {
    transport: Arc<dyn Transport>,
    ids: Arc<dyn IdGenerator>,
    /// Generated on first use, reused for the adapter's lifetime
    user_id: OnceCell<String>,
}

impl ServerAdapter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_id_generator(transport, Arc::new(UuidGenerator))
    }

    pub fn with_id_generator(transport: Arc<dyn Transport>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            transport,
            ids,
            user_id: OnceCell::new(),
        }
    }
}

#[async_trait]
impl PlatformAdapter for ServerAdapter {
    fn platform(&self) -> Platform {
        Platform::Server
    }

    fn user_id(&self) -> String {
        self.user_id.get_or_init(|| self.ids.generate()).clone()
    }

    async fn send_batch(&self, destination: &str, batch: &BatchPayload) -> Result<Delivery> {
        self.transport.send(destination, batch).await
    }

    fn current_path(&self) -> Option<String> {
        None
    }

    fn setup_auto_tracking(&self, _sink: Arc<dyn TrackingSink>) -> Result<()> {
        info!(
            "Server auto tracking only runs the flush timer; report requests with \
             tracker.record_server_request(ServerRequest::new(method, path)) or wrap \
             the service in middleware::TrackingLayer"
        );
        Ok(())
    }

    fn teardown_auto_tracking(&self) {}
}
