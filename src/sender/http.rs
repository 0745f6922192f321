use super::transport::{OutboundRequest, Reply, RequestKind, Transport, TransportError};
use crate::config::{SendMode, ShipperConfig};
use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use futures::future::BoxFuture;
use reqwest::header::{
    AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
};
use reqwest::{Client, ClientBuilder};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

/// Header carrying the client-chosen channel id.
pub const CHANNEL_HEADER: &str = "x-request-channel";

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: String,
    pub token: String,
    pub auth_scheme: String,
    pub channel: Option<String>,
    pub event_path: String,
    pub raw_path: String,
    pub ack_path: String,
    pub health_path: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub user_agent: String,
    pub send_mode: SendMode,
    pub enable_compression: bool,
    pub disable_certificate_validation: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::from(&ShipperConfig::default())
    }
}

impl From<&ShipperConfig> for TransportConfig {
    fn from(config: &ShipperConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            auth_scheme: config.auth_scheme.clone(),
            channel: config.channel.clone(),
            event_path: config.event_path.clone(),
            raw_path: config.raw_path.clone(),
            ack_path: config.ack.ack_path.clone(),
            health_path: config.health_path.clone(),
            timeout: config.request_timeout(),
            connection_timeout: config.connect_timeout(),
            max_connections: config.max_connections,
            user_agent: config.user_agent.clone(),
            send_mode: config.send_mode,
            enable_compression: config.enable_compression,
            disable_certificate_validation: config.disable_certificate_validation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub in_flight: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Duration,
}

#[derive(Debug, Default)]
struct ClientStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    in_flight: AtomicUsize,
    total_response_time: AtomicU64,
}

impl ClientStats {
    fn record_request(&self, success: bool, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Decrements the in-flight gauge however the request ends.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// reqwest-backed transport owning one connection pool.
///
/// Constructed explicitly and shared by handle between the senders and the
/// ack poller that use it. In sequential mode a single permit caps the
/// transport at one request in flight; waiters are served in FIFO order.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    config: Arc<TransportConfig>,
    base_url: Url,
    headers: HeaderMap,
    permits: Option<Arc<Semaphore>>,
    closed: Arc<AtomicBool>,
    stats: Arc<ClientStats>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let base_url: Url = config.endpoint.parse().map_err(|e| {
            TransportError::InvalidConfiguration(format!("Invalid endpoint URL: {e}"))
        })?;

        // Configure HTTP client with connection pooling
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(config.disable_certificate_validation)
            .build()
            .map_err(|e| {
                TransportError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        let headers = Self::build_headers(&config)?;

        let permits = match config.send_mode {
            SendMode::Sequential => Some(Arc::new(Semaphore::new(1))),
            SendMode::Parallel => None,
        };

        Ok(Self {
            client,
            config: Arc::new(config),
            base_url,
            headers,
            permits,
            closed: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ClientStats::default()),
        })
    }

    pub fn from_config(config: &ShipperConfig) -> Result<Self, TransportError> {
        Self::new(TransportConfig::from(config))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn send_mode(&self) -> SendMode {
        self.config.send_mode
    }

    fn build_headers(config: &TransportConfig) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();

        let authorization = format!("{} {}", config.auth_scheme, config.token);
        let mut authorization = HeaderValue::from_str(&authorization)
            .map_err(|e| TransportError::InvalidHeaderValue(format!("Invalid token: {e}")))?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);

        if let Some(channel) = &config.channel {
            headers.insert(
                HeaderName::from_static(CHANNEL_HEADER),
                HeaderValue::from_str(channel).map_err(|e| {
                    TransportError::InvalidHeaderValue(format!("Invalid channel: {e}"))
                })?,
            );
        }

        Ok(headers)
    }

    fn url_for(&self, kind: RequestKind) -> Result<Url, TransportError> {
        let path = match kind {
            RequestKind::Events => &self.config.event_path,
            RequestKind::Raw => &self.config.raw_path,
            RequestKind::AckPoll => &self.config.ack_path,
        };
        self.join(path)
    }

    fn join(&self, path: &str) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        let base = self.base_url.path().trim_end_matches('/');
        url.set_path(&format!("{base}{path}"));
        Ok(url)
    }

    fn encode_body(&self, body: Bytes) -> Result<(Bytes, bool), TransportError> {
        if !self.config.enable_compression || body.is_empty() {
            return Ok((body, false));
        }
        let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::fast());
        encoder.write_all(&body)?;
        Ok((Bytes::from(encoder.finish()?), true))
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionFailed(
                "Transport has been shut down".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, request: OutboundRequest) -> Result<Reply, TransportError> {
        self.ensure_open()?;

        // Held for the whole exchange; released on drop even if the future is cancelled
        let _permit = match &self.permits {
            Some(permits) => Some(permits.clone().acquire_owned().await.map_err(|_| {
                TransportError::ConnectionFailed("Transport has been shut down".to_string())
            })?),
            None => None,
        };

        self.stats.in_flight.fetch_add(1, Ordering::Relaxed);
        let _in_flight = InFlightGuard(&self.stats.in_flight);

        let url = self.url_for(request.kind)?;
        let body_len = request.body.len();
        let (body, compressed) = self.encode_body(request.body)?;

        let content_type = match request.kind {
            RequestKind::Raw => "text/plain",
            RequestKind::Events | RequestKind::AckPoll => "application/json",
        };

        let mut builder = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, content_type);
        if compressed {
            builder = builder.header(CONTENT_ENCODING, "gzip");
        }

        debug!(kind = ?request.kind, bytes = body_len, compressed, "Posting request");

        let start = Instant::now();
        let response = builder.body(body).send().await.map_err(|e| {
            self.stats.record_request(false, start.elapsed());
            classify(e)
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            self.stats.record_request(false, start.elapsed());
            classify(e)
        })?;
        let latency = start.elapsed();

        self.stats.record_request(status == 200, latency);

        if status == 200 {
            debug!(kind = ?request.kind, status, ?latency, "Request completed");
        } else {
            warn!(kind = ?request.kind, status, ?latency, "Collector returned non-200 status");
        }

        Ok(Reply { status, body })
    }

    pub async fn health_check(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        let url = self.join(&self.config.health_path)?;
        let start = Instant::now();

        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(classify)?;

        let success = response.status().is_success();
        self.stats.record_request(success, start.elapsed());

        if success {
            Ok(())
        } else {
            Err(TransportError::ConnectionFailed(format!(
                "Health check failed: {}",
                response.status()
            )))
        }
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let total_requests = self.stats.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.stats.total_response_time.load(Ordering::Relaxed);

        let average_response_time = if total_requests > 0 {
            Duration::from_millis(total_response_time / total_requests)
        } else {
            Duration::ZERO
        };

        ConnectionStats {
            in_flight: self.stats.in_flight.load(Ordering::Relaxed),
            total_requests,
            successful_requests: self.stats.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
            average_response_time,
        }
    }
}

impl Transport for HttpTransport {
    fn post<'a>(&'a self, request: OutboundRequest) -> BoxFuture<'a, Result<Reply, TransportError>> {
        Box::pin(self.execute(request))
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(permits) = &self.permits {
            permits.close();
        }
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::RequestTimeout(error.to_string())
    } else if error.is_connect() {
        TransportError::ConnectionFailed(error.to_string())
    } else {
        TransportError::NetworkError(error)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("send_mode", &self.config.send_mode)
            .field("stats", &self.connection_stats())
            .finish_non_exhaustive()
    }
}
