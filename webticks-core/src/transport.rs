//! HTTP delivery of event batches
//!
//! One POST per flush with a JSON [`BatchPayload`] body. The HTTP status is
//! the whole response contract: 2xx acknowledges the batch, anything else
//! leaves it undelivered. Network failures surface as
//! [`Error::Transport`] and are treated the same way by the tracker.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::types::BatchPayload;

/// Header carrying the configured application identifier
pub const APP_ID_HEADER: &str = "webticks-app-id";

/// Outcome of a completed HTTP exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 2xx response, the batch can be discarded
    Acknowledged { status: u16 },
    /// Any other status, the batch must be kept
    Rejected { status: u16 },
}

impl Delivery {
    pub fn from_status(status: u16) -> Self {
        if (200..300).contains(&status) {
            Delivery::Acknowledged { status }
        } else {
            Delivery::Rejected { status }
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Delivery::Acknowledged { .. })
    }

    pub fn status(&self) -> u16 {
        match self {
            Delivery::Acknowledged { status } | Delivery::Rejected { status } => *status,
        }
    }
}

/// Outbound request capability used by the adapters.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `batch` as JSON to an absolute `url`.
    async fn send(&self, url: &str, batch: &BatchPayload) -> Result<Delivery>;
}

/// [`Transport`] backed by a shared `reqwest` client
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport from tracker configuration
    ///
    /// The application id, when configured, is installed as a default header.
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(app_id) = &config.app_id {
            headers.insert(
                APP_ID_HEADER,
                HeaderValue::from_str(app_id)
                    .map_err(|e| Error::Config(format!("invalid app_id: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, url: &str, batch: &BatchPayload) -> Result<Delivery> {
        let parsed = reqwest::Url::parse(url).map_err(|e| Error::InvalidDestination {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let body = serde_json::to_vec(batch)?;

        let response = self
            .http_client
            .post(parsed)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let delivery = Delivery::from_status(response.status().as_u16());
        if !delivery.is_acknowledged() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            tracing::debug!(
                status = delivery.status(),
                body = %error_text,
                "Collector did not acknowledge batch"
            );
        }

        Ok(delivery)
    }
}
