//! Browser host capabilities
//!
//! [`BrowserHost`] is the slice of a browser page the browser adapter needs:
//! the current location, client-side storage, the two URL-mutating history
//! entry points, and event listeners for `popstate`, `navigatesuccess`,
//! `visibilitychange` and `pagehide`.
//!
//! History entry points are replaceable values rather than fixed methods.
//! That is what lets the navigation watcher wrap them and later put the
//! originals back.
//!
//! [`HeadlessBrowser`] implements the trait in memory. It is used for
//! headless runs and by the test suite; a wasm binding implements the same
//! trait over `window`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use url::Url;

use crate::error::{Error, Result};
use crate::identity::{KeyValueStore, MemoryStorage};

/// The two URL-mutating history entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryMethod {
    PushState,
    ReplaceState,
}

impl HistoryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryMethod::PushState => "pushState",
            HistoryMethod::ReplaceState => "replaceState",
        }
    }
}

impl fmt::Display for HistoryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of a `pushState` / `replaceState` call
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryCall {
    pub state: serde_json::Value,
    pub url: Option<String>,
}

impl HistoryCall {
    pub fn new(state: serde_json::Value, url: Option<&str>) -> Self {
        Self {
            state,
            url: url.map(str::to_string),
        }
    }
}

/// A history entry point. The first argument plays the role of `this`.
pub type HistoryEntryPoint =
    Arc<dyn Fn(&dyn BrowserHost, &HistoryCall) -> Result<()> + Send + Sync>;

/// Optional page-supplied `onpushstate` / `onreplacestate` hook, called with
/// the state argument of the call.
pub type HistoryHook = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Host events the adapter can listen to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEventKind {
    PopState,
    NavigateSuccess,
    VisibilityChange,
    PageHide,
}

/// A dispatched host event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    PopState,
    NavigateSuccess,
    VisibilityChange { hidden: bool },
    PageHide,
}

impl HostEvent {
    pub fn kind(&self) -> HostEventKind {
        match self {
            HostEvent::PopState => HostEventKind::PopState,
            HostEvent::NavigateSuccess => HostEventKind::NavigateSuccess,
            HostEvent::VisibilityChange { .. } => HostEventKind::VisibilityChange,
            HostEvent::PageHide => HostEventKind::PageHide,
        }
    }
}

pub type Listener = Arc<dyn Fn(&HostEvent) + Send + Sync>;

/// Handle returned by [`BrowserHost::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Browser page capabilities used by [`super::BrowserAdapter`].
pub trait BrowserHost: Send + Sync {
    /// Absolute URL of the current document (`location.href`)
    fn location_href(&self) -> String;

    /// Client-side key/value storage (`localStorage`)
    fn storage(&self) -> &dyn KeyValueStore;

    /// Whether the host fires `navigatesuccess` after completed navigations
    fn has_navigation_api(&self) -> bool;

    fn is_hidden(&self) -> bool;

    /// Current implementation of a history entry point
    fn history_entry(&self, method: HistoryMethod) -> HistoryEntryPoint;

    /// Install a new implementation, returning the one it replaced
    fn replace_history_entry(
        &self,
        method: HistoryMethod,
        entry: HistoryEntryPoint,
    ) -> HistoryEntryPoint;

    /// Page-supplied hook for an entry point, if any
    fn history_hook(&self, method: HistoryMethod) -> Option<HistoryHook>;

    fn add_listener(&self, kind: HostEventKind, listener: Listener) -> ListenerId;

    /// Returns false if the listener was not registered
    fn remove_listener(&self, id: ListenerId) -> bool;
}

// ============================================
// HeadlessBrowser
// ============================================

struct Registered {
    id: ListenerId,
    kind: HostEventKind,
    listener: Listener,
}

/// Page state shared with the native entry points
struct Document {
    navigation_api: bool,
    entries: RwLock<Vec<Url>>,
    index: RwLock<usize>,
    hidden: RwLock<bool>,
    listeners: RwLock<Vec<Registered>>,
    next_listener: AtomicU64,
}

impl Document {
    fn location(&self) -> Url {
        let entries = self.entries.read();
        entries[*self.index.read()].clone()
    }

    fn resolve(&self, url: Option<&str>) -> Result<Url> {
        let current = self.location();
        let Some(url) = url else {
            return Ok(current);
        };
        let target = current
            .join(url)
            .map_err(|e| Error::Navigation(format!("invalid URL {:?}: {}", url, e)))?;
        if target.origin() != current.origin() {
            return Err(Error::Navigation(format!(
                "cannot move history to {} from origin {}",
                target,
                current.origin().ascii_serialization()
            )));
        }
        Ok(target)
    }

    fn push(&self, call: &HistoryCall) -> Result<()> {
        let target = self.resolve(call.url.as_deref())?;
        {
            let mut entries = self.entries.write();
            let mut index = self.index.write();
            entries.truncate(*index + 1);
            entries.push(target);
            *index = entries.len() - 1;
        }
        self.after_same_document_navigation();
        Ok(())
    }

    fn replace(&self, call: &HistoryCall) -> Result<()> {
        let target = self.resolve(call.url.as_deref())?;
        {
            let mut entries = self.entries.write();
            let index = *self.index.read();
            entries[index] = target;
        }
        self.after_same_document_navigation();
        Ok(())
    }

    fn after_same_document_navigation(&self) {
        if self.navigation_api {
            self.dispatch(HostEvent::NavigateSuccess);
        }
    }

    fn dispatch(&self, event: HostEvent) {
        // Listeners may add or remove listeners, so call them outside the lock.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|r| r.kind == event.kind())
            .map(|r| r.listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }
}

/// In-memory [`BrowserHost`] with a real history stack.
///
/// `push_state` / `replace_state` go through whatever entry point is
/// currently installed, exactly like calling `window.history.pushState`.
pub struct HeadlessBrowser {
    document: Arc<Document>,
    storage: Arc<dyn KeyValueStore>,
    entries: RwLock<HistoryEntries>,
    hooks: RwLock<HashMap<HistoryMethod, HistoryHook>>,
}

/// Installed `pushState` / `replaceState` implementations
struct HistoryEntries {
    push_state: HistoryEntryPoint,
    replace_state: HistoryEntryPoint,
}

impl HistoryEntries {
    fn slot(&mut self, method: HistoryMethod) -> &mut HistoryEntryPoint {
        match method {
            HistoryMethod::PushState => &mut self.push_state,
            HistoryMethod::ReplaceState => &mut self.replace_state,
        }
    }
}

/// Builder for [`HeadlessBrowser`]
pub struct HeadlessBrowserBuilder {
    url: String,
    navigation_api: bool,
    storage: Option<Arc<dyn KeyValueStore>>,
}

impl HeadlessBrowserBuilder {
    /// Fire `navigatesuccess` after every completed navigation
    pub fn navigation_api(mut self, enabled: bool) -> Self {
        self.navigation_api = enabled;
        self
    }

    /// Share storage with other page loads (same origin, new document)
    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn build(self) -> Result<HeadlessBrowser> {
        let url = Url::parse(&self.url).map_err(|e| Error::InvalidDestination {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        let document = Arc::new(Document {
            navigation_api: self.navigation_api,
            entries: RwLock::new(vec![url]),
            index: RwLock::new(0),
            hidden: RwLock::new(false),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        });

        let push_doc = document.clone();
        let replace_doc = document.clone();
        let entries = HistoryEntries {
            push_state: Arc::new(move |_this: &dyn BrowserHost, call: &HistoryCall| {
                push_doc.push(call)
            }),
            replace_state: Arc::new(move |_this: &dyn BrowserHost, call: &HistoryCall| {
                replace_doc.replace(call)
            }),
        };

        Ok(HeadlessBrowser {
            document,
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
            entries: RwLock::new(entries),
            hooks: RwLock::new(HashMap::new()),
        })
    }
}

impl HeadlessBrowser {
    /// Open a page at an absolute URL
    pub fn new(url: &str) -> Result<Self> {
        Self::builder(url).build()
    }

    pub fn builder(url: &str) -> HeadlessBrowserBuilder {
        HeadlessBrowserBuilder {
            url: url.to_string(),
            navigation_api: false,
            storage: None,
        }
    }

    /// `history.pushState(state, "", url)`
    pub fn push_state(&self, state: serde_json::Value, url: Option<&str>) -> Result<()> {
        let entry = self.history_entry(HistoryMethod::PushState);
        entry(self, &HistoryCall::new(state, url))
    }

    /// `history.replaceState(state, "", url)`
    pub fn replace_state(&self, state: serde_json::Value, url: Option<&str>) -> Result<()> {
        let entry = self.history_entry(HistoryMethod::ReplaceState);
        entry(self, &HistoryCall::new(state, url))
    }

    /// Traverse one entry back, firing `popstate`. Returns false at the start
    /// of history.
    pub fn back(&self) -> bool {
        self.traverse(-1)
    }

    /// Traverse one entry forward, firing `popstate`.
    pub fn forward(&self) -> bool {
        self.traverse(1)
    }

    fn traverse(&self, delta: isize) -> bool {
        {
            let len = self.document.entries.read().len();
            let mut index = self.document.index.write();
            let target = *index as isize + delta;
            if target < 0 || target as usize >= len {
                return false;
            }
            *index = target as usize;
        }
        self.document.dispatch(HostEvent::PopState);
        self.document.after_same_document_navigation();
        true
    }

    /// Change document visibility, firing `visibilitychange`
    pub fn set_hidden(&self, hidden: bool) {
        {
            let mut current = self.document.hidden.write();
            if *current == hidden {
                return;
            }
            *current = hidden;
        }
        self.document
            .dispatch(HostEvent::VisibilityChange { hidden });
    }

    /// Fire `pagehide` (tab closed or navigated away)
    pub fn hide_page(&self) {
        self.document.dispatch(HostEvent::PageHide);
    }

    /// Install or clear `history.onpushstate` / `history.onreplacestate`
    pub fn set_history_hook(&self, method: HistoryMethod, hook: Option<HistoryHook>) {
        let mut hooks = self.hooks.write();
        match hook {
            Some(hook) => {
                hooks.insert(method, hook);
            }
            None => {
                hooks.remove(&method);
            }
        }
    }

    /// Number of registered listeners of one kind
    pub fn listener_count(&self, kind: HostEventKind) -> usize {
        self.document
            .listeners
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    /// Length of the session history
    pub fn history_len(&self) -> usize {
        self.document.entries.read().len()
    }
}

impl BrowserHost for HeadlessBrowser {
    fn location_href(&self) -> String {
        self.document.location().to_string()
    }

    fn storage(&self) -> &dyn KeyValueStore {
        self.storage.as_ref()
    }

    fn has_navigation_api(&self) -> bool {
        self.document.navigation_api
    }

    fn is_hidden(&self) -> bool {
        *self.document.hidden.read()
    }

    fn history_entry(&self, method: HistoryMethod) -> HistoryEntryPoint {
        let entries = self.entries.read();
        match method {
            HistoryMethod::PushState => entries.push_state.clone(),
            HistoryMethod::ReplaceState => entries.replace_state.clone(),
        }
    }

    fn replace_history_entry(
        &self,
        method: HistoryMethod,
        entry: HistoryEntryPoint,
    ) -> HistoryEntryPoint {
        std::mem::replace(self.entries.write().slot(method), entry)
    }

    fn history_hook(&self, method: HistoryMethod) -> Option<HistoryHook> {
        self.hooks.read().get(&method).cloned()
    }

    fn add_listener(&self, kind: HostEventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.document.next_listener.fetch_add(1, Ordering::Relaxed));
        self.document
            .listeners
            .write()
            .push(Registered { id, kind, listener });
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.document.listeners.write();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_push_and_replace_update_location() {
        let page = HeadlessBrowser::new("https://example.com/").unwrap();

        page.push_state(json!(null), Some("/docs")).unwrap();
        assert_eq!(page.location_href(), "https://example.com/docs");
        assert_eq!(page.history_len(), 2);

        page.replace_state(json!({"tab": 2}), Some("/docs?tab=2"))
            .unwrap();
        assert_eq!(page.location_href(), "https://example.com/docs?tab=2");
        assert_eq!(page.history_len(), 2);
    }

    #[test]
    fn test_cross_origin_push_is_rejected() {
        let page = HeadlessBrowser::new("https://example.com/").unwrap();
        let err = page
            .push_state(json!(null), Some("https://evil.example.org/"))
            .unwrap_err();
        assert!(matches!(err, Error::Navigation(_)));
        assert_eq!(page.location_href(), "https://example.com/");
    }

    #[test]
    fn test_back_fires_popstate() {
        let page = HeadlessBrowser::new("https://example.com/a").unwrap();
        let pops = Arc::new(AtomicUsize::new(0));
        let counter = pops.clone();
        page.add_listener(
            HostEventKind::PopState,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        page.push_state(json!(null), Some("/b")).unwrap();
        assert!(page.back());
        assert_eq!(page.location_href(), "https://example.com/a");
        assert!(!page.back());
        assert!(page.forward());
        assert_eq!(page.location_href(), "https://example.com/b");
        assert_eq!(pops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_navigation_api_fires_after_url_change() {
        let page = Arc::new(
            HeadlessBrowser::builder("https://example.com/")
                .navigation_api(true)
                .build()
                .unwrap(),
        );
        let seen = Arc::new(RwLock::new(Vec::new()));
        let (weak, sink) = (Arc::downgrade(&page), seen.clone());
        page.add_listener(
            HostEventKind::NavigateSuccess,
            Arc::new(move |_| {
                if let Some(page) = weak.upgrade() {
                    sink.write().push(page.location_href());
                }
            }),
        );

        page.push_state(json!(null), Some("/next")).unwrap();
        assert_eq!(*seen.read(), vec!["https://example.com/next".to_string()]);
    }

    #[test]
    fn test_remove_listener() {
        let page = HeadlessBrowser::new("https://example.com/").unwrap();
        let id = page.add_listener(HostEventKind::PageHide, Arc::new(|_| {}));
        assert_eq!(page.listener_count(HostEventKind::PageHide), 1);
        assert!(page.remove_listener(id));
        assert!(!page.remove_listener(id));
        assert_eq!(page.listener_count(HostEventKind::PageHide), 0);
    }

    #[test]
    fn test_visibility_only_fires_on_change() {
        let page = HeadlessBrowser::new("https://example.com/").unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        page.add_listener(
            HostEventKind::VisibilityChange,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        page.set_hidden(true);
        page.set_hidden(true);
        page.set_hidden(false);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(!page.is_hidden());
    }

    #[test]
    fn test_relative_start_url_is_rejected() {
        assert!(HeadlessBrowser::new("/relative").is_err());
    }
}
