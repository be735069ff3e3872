//! Client-side route change detection
//!
//! Two strategies, picked when the watcher is installed:
//!
//! 1. **Navigation API**: the host fires `navigatesuccess` once per
//!    completed navigation, after the URL changed. One listener is enough.
//! 2. **History interception**: `pushState` and `replaceState` are wrapped.
//!    The wrapper calls the original first, reports the possible location
//!    change, calls the page's `onpushstate` / `onreplacestate` hook if one
//!    is set, and returns the original result. A `popstate` listener covers
//!    back/forward traversal.
//!
//! The watcher only reports "location may have changed". The tracker
//! compares against the last observed path, so repeated navigations to the
//! same URL collapse to one page view.
//!
//! Uninstalling restores the exact entry points that were replaced and
//! removes every listener the watcher added.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::host::{
    BrowserHost, HistoryCall, HistoryEntryPoint, HistoryMethod, HostEventKind, ListenerId,
};
use super::TrackingSink;

/// How route changes are detected on a given host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationStrategy {
    NavigationApi,
    HistoryInterception,
}

struct Installation {
    strategy: NavigationStrategy,
    listeners: Vec<ListenerId>,
    /// Entry points replaced by wrappers, restored on uninstall
    originals: Vec<(HistoryMethod, HistoryEntryPoint)>,
}

/// Installs and removes route change detection on a [`BrowserHost`].
pub struct NavigationWatcher {
    host: Arc<dyn BrowserHost>,
    installed: Mutex<Option<Installation>>,
}

impl NavigationWatcher {
    pub fn new(host: Arc<dyn BrowserHost>) -> Self {
        Self {
            host,
            installed: Mutex::new(None),
        }
    }

    /// Start reporting location changes into `sink`.
    ///
    /// Returns the strategy in use. Installing twice keeps the first
    /// installation.
    pub fn install(&self, sink: Arc<dyn TrackingSink>) -> NavigationStrategy {
        let mut installed = self.installed.lock();
        if let Some(existing) = installed.as_ref() {
            debug!(strategy = ?existing.strategy, "Navigation watcher already installed");
            return existing.strategy;
        }

        let installation = if self.host.has_navigation_api() {
            debug!("Using Navigation API for route changes");
            let sink = sink.clone();
            let id = self.host.add_listener(
                HostEventKind::NavigateSuccess,
                Arc::new(move |_| sink.location_changed()),
            );
            Installation {
                strategy: NavigationStrategy::NavigationApi,
                listeners: vec![id],
                originals: Vec::new(),
            }
        } else {
            debug!("Using history interception for route changes");
            let originals = [HistoryMethod::PushState, HistoryMethod::ReplaceState]
                .into_iter()
                .map(|method| {
                    let original = self.host.history_entry(method);
                    let wrapped = wrap_entry(method, original.clone(), sink.clone());
                    self.host.replace_history_entry(method, wrapped);
                    (method, original)
                })
                .collect();

            let pop_sink = sink.clone();
            let id = self.host.add_listener(
                HostEventKind::PopState,
                Arc::new(move |_| pop_sink.location_changed()),
            );
            Installation {
                strategy: NavigationStrategy::HistoryInterception,
                listeners: vec![id],
                originals,
            }
        };

        let strategy = installation.strategy;
        *installed = Some(installation);
        strategy
    }

    /// Restore the original entry points and remove all listeners.
    /// Does nothing when not installed.
    pub fn uninstall(&self) {
        let Some(installation) = self.installed.lock().take() else {
            return;
        };

        for (method, original) in installation.originals {
            self.host.replace_history_entry(method, original);
        }
        for id in installation.listeners {
            self.host.remove_listener(id);
        }
        debug!(strategy = ?installation.strategy, "Navigation watcher removed");
    }

    /// Strategy of the active installation
    pub fn strategy(&self) -> Option<NavigationStrategy> {
        self.installed.lock().as_ref().map(|i| i.strategy)
    }
}

/// Decorate a history entry point with change detection and the page hook.
fn wrap_entry(
    method: HistoryMethod,
    original: HistoryEntryPoint,
    sink: Arc<dyn TrackingSink>,
) -> HistoryEntryPoint {
    Arc::new(move |this: &dyn BrowserHost, call: &HistoryCall| {
        // The original runs first so the URL is already updated.
        let result = original(this, call);
        if result.is_err() {
            return result;
        }

        sink.location_changed();

        if let Some(hook) = this.history_hook(method) {
            hook(&call.state);
        }

        result
    })
}
