//! Request tracking middleware for `tower` based servers
//!
//! [`TrackingLayer`] records one `server_request` event per inbound request
//! before handing it to the inner service, and a `request_complete` custom
//! event with status code and duration once the inner service responds.
//!
//! ```rust,no_run
//! use tower::ServiceBuilder;
//! use webticks_core::{middleware::TrackingLayer, Tracker, TrackerConfig};
//!
//! # fn build<S>(svc: S) -> webticks_core::Result<()> {
//! let tracker = Tracker::for_server(TrackerConfig::with_destination(
//!     "https://collect.example.com/api/track",
//! ))?;
//! let service = ServiceBuilder::new()
//!     .layer(TrackingLayer::new(tracker))
//!     .service(svc);
//! # Ok(())
//! # }
//! ```
//!
//! Requests carrying the [`Tracked`] extension are passed through untouched,
//! so stacking the layer or recording a request by hand never counts it
//! twice.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use http::{header, Request, Response};
use serde_json::json;
use tower::{Layer, Service};

use crate::tracker::Tracker;
use crate::types::ServerRequest;

/// Static asset extensions skipped by [`default_should_track`]
const STATIC_EXTENSIONS: &[&str] = &[
    "js", "css", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2", "ttf", "eot",
];

/// Path prefixes of framework internals skipped by [`default_should_track`]
const SKIPPED_PREFIXES: &[&str] = &["/_next/", "/api/_"];

/// Decides from the request path whether a request is recorded
pub type RequestFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Request extension marking a request as already recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tracked;

/// Mark a request as recorded so [`TrackingLayer`] skips it.
pub fn mark_tracked<B>(request: &mut Request<B>) {
    request.extensions_mut().insert(Tracked);
}

/// Skip static assets and framework internals.
pub fn default_should_track(path: &str) -> bool {
    if SKIPPED_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        return false;
    }

    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((_, ext)) => !STATIC_EXTENSIONS
            .iter()
            .any(|skip| ext.eq_ignore_ascii_case(skip)),
        None => true,
    }
}

/// [`Layer`] wrapping services in [`TrackingService`]
#[derive(Clone)]
pub struct TrackingLayer {
    tracker: Tracker,
    should_track: RequestFilter,
}

impl TrackingLayer {
    pub fn new(tracker: Tracker) -> Self {
        Self {
            tracker,
            should_track: Arc::new(default_should_track),
        }
    }

    /// Replace the default path filter
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.should_track = Arc::new(filter);
        self
    }
}

impl<S> Layer<S> for TrackingLayer {
    type Service = TrackingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TrackingService {
            inner,
            tracker: self.tracker.clone(),
            should_track: self.should_track.clone(),
        }
    }
}

/// Service recording inbound requests on a [`Tracker`]
#[derive(Clone)]
pub struct TrackingService<S> {
    inner: S,
    tracker: Tracker,
    should_track: RequestFilter,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TrackingService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: 'static,
    ResBody: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let path = request.uri().path().to_string();
        if request.extensions().get::<Tracked>().is_some() || !(self.should_track)(&path) {
            return Box::pin(self.inner.call(request));
        }

        let method = request.method().to_string();
        self.tracker
            .record_server_request(describe_request(&request, &method, &path));
        mark_tracked(&mut request);

        let started = Instant::now();
        let tracker = self.tracker.clone();
        let response = self.inner.call(request);

        Box::pin(async move {
            let response = response.await?;
            tracker.record_custom_event(
                "request_complete",
                json!({
                    "path": path,
                    "method": method,
                    "statusCode": response.status().as_u16(),
                    "duration": started.elapsed().as_millis() as u64,
                }),
            );
            Ok(response)
        })
    }
}

fn describe_request<B>(request: &Request<B>, method: &str, path: &str) -> ServerRequest {
    let mut described = ServerRequest::new(method, path);

    if let Some(query) = request.uri().query().filter(|q| !q.is_empty()) {
        let params: BTreeMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        described = described.with_query(params);
    }

    let headers: BTreeMap<String, String> = [header::USER_AGENT, header::REFERER]
        .iter()
        .filter_map(|name| {
            let value = request.headers().get(name)?.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect();
    if !headers.is_empty() {
        described = described.with_headers(headers);
    }

    described
}
