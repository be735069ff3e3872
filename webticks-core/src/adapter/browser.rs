//! Browser page adapter

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};
use url::Url;

use super::host::{BrowserHost, HostEvent, HostEventKind, ListenerId};
use super::navigation::NavigationWatcher;
use super::{Platform, PlatformAdapter, TrackingSink};
use crate::error::{Error, Result};
use crate::identity::{load_or_create_user_id, IdGenerator, UuidGenerator};
use crate::transport::{Delivery, Transport};
use crate::types::BatchPayload;

/// [`PlatformAdapter`] for a page running in a [`BrowserHost`].
pub struct BrowserAdapter {
    host: Arc<dyn BrowserHost>,
    transport: Arc<dyn Transport>,
    ids: Arc<dyn IdGenerator>,
    watcher: NavigationWatcher,
    /// visibilitychange / pagehide listeners added by setup
    lifecycle: Mutex<Vec<ListenerId>>,
}

impl BrowserAdapter {
    pub fn new(host: Arc<dyn BrowserHost>, transport: Arc<dyn Transport>) -> Self {
        Self::with_id_generator(host, transport, Arc::new(UuidGenerator))
    }

    pub fn with_id_generator(
        host: Arc<dyn BrowserHost>,
        transport: Arc<dyn Transport>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            watcher: NavigationWatcher::new(host.clone()),
            host,
            transport,
            ids,
            lifecycle: Mutex::new(Vec::new()),
        }
    }

    /// The watcher driving route change detection
    pub fn navigation(&self) -> &NavigationWatcher {
        &self.watcher
    }

    /// Resolve a possibly relative destination against the page URL.
    fn resolve_destination(&self, destination: &str) -> Result<Url> {
        let href = self.host.location_href();
        let base = Url::parse(&href).map_err(|e| Error::InvalidDestination {
            url: href.clone(),
            reason: format!("page location is not absolute: {}", e),
        })?;
        base.join(destination)
            .map_err(|e| Error::InvalidDestination {
                url: destination.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl PlatformAdapter for BrowserAdapter {
    fn platform(&self) -> Platform {
        Platform::Browser
    }

    fn user_id(&self) -> String {
        load_or_create_user_id(self.host.storage(), self.ids.as_ref())
    }

    async fn send_batch(&self, destination: &str, batch: &BatchPayload) -> Result<Delivery> {
        let url = self.resolve_destination(destination)?;
        self.transport.send(url.as_str(), batch).await
    }

    fn current_path(&self) -> Option<String> {
        Some(self.host.location_href())
    }

    fn setup_auto_tracking(&self, sink: Arc<dyn TrackingSink>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.is_empty() {
            debug!("Browser auto tracking already set up");
            return Ok(());
        }

        let strategy = self.watcher.install(sink.clone());

        let visibility_sink = sink.clone();
        lifecycle.push(self.host.add_listener(
            HostEventKind::VisibilityChange,
            Arc::new(move |event| {
                if let HostEvent::VisibilityChange { hidden } = event {
                    visibility_sink.visibility_changed(!hidden);
                }
            }),
        ));

        lifecycle.push(self.host.add_listener(
            HostEventKind::PageHide,
            Arc::new(move |_| sink.page_terminating()),
        ));

        info!(strategy = ?strategy, "Browser auto tracking installed");
        Ok(())
    }

    fn teardown_auto_tracking(&self) {
        self.watcher.uninstall();
        for id in self.lifecycle.lock().drain(..) {
            self.host.remove_listener(id);
        }
    }
}
