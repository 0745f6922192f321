use super::async_sender::AsyncSender;
use super::dispatch::{DeliveryCallback, SenderCore};
use super::http::HttpTransport;
use super::middleware::{BatchPoster, ChainResult, Middleware, MiddlewareChain};
use super::serialization::{
    EventSerializer, JsonEventSerializer, RawEventSerializer, SerializationError,
    body_serializer_by_name,
};
use super::stats::SenderStats;
use super::sync_sender::SyncSender;
use super::transport::{RequestKind, Transport, TransportError};
use crate::ack::{AckManager, AckMiddleware};
use crate::buffer::{BatchAccumulator, BatchLimits, EventBatch};
use crate::config::{ConfigError, ContentMode, SendMode, ShipperConfig};
use crate::metrics::ChannelMetrics;
use crate::reliability::ResendMiddleware;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::info;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Serializer error: {0}")]
    Serialization(#[from] SerializationError),
    #[error("No tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Assembles a sender from a [`ShipperConfig`].
///
/// The standard chain is, from outermost to innermost: any extra
/// middlewares, resend (when retries are configured), ack (when enabled),
/// then the POST itself.
pub struct SenderBuilder {
    config: ShipperConfig,
    transport: Option<Arc<dyn Transport>>,
    serializer: Option<Arc<dyn EventSerializer>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    metrics: Option<Arc<ChannelMetrics>>,
    on_delivery: Option<DeliveryCallback>,
}

impl SenderBuilder {
    pub fn new(config: ShipperConfig) -> Self {
        Self {
            config,
            transport: None,
            serializer: None,
            middlewares: Vec::new(),
            metrics: None,
            on_delivery: None,
        }
    }

    pub fn from_config(config: &ShipperConfig) -> Self {
        Self::new(config.clone())
    }

    /// Uses an existing transport instead of building an [`HttpTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn EventSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Adds a middleware outside the standard ones; later calls wrap
    /// earlier ones.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn metrics(mut self, metrics: Arc<ChannelMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Called by the async sender with each batch's delivery outcome.
    pub fn on_delivery<F>(mut self, callback: F) -> Self
    where
        F: Fn(&EventBatch, &ChainResult) + Send + Sync + 'static,
    {
        self.on_delivery = Some(Arc::new(callback));
        self
    }

    pub fn build_sync(self) -> Result<SyncSender, BuildError> {
        let (core, _) = self.assemble()?;
        Ok(SyncSender::from_core(core))
    }

    /// Must be called from within a tokio runtime.
    pub fn build_async(self) -> Result<AsyncSender, BuildError> {
        let runtime = Handle::try_current()?;
        let (core, on_delivery) = self.assemble()?;
        Ok(AsyncSender::from_core(core, runtime, on_delivery))
    }

    fn assemble(self) -> Result<(SenderCore, Option<DeliveryCallback>), BuildError> {
        let SenderBuilder {
            mut config,
            transport,
            serializer,
            middlewares,
            metrics,
            on_delivery,
        } = self;

        config.post_process();
        config.validate()?;

        let transport: Arc<dyn Transport> = match transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::from_config(&config)?),
        };

        let (serializer, kind): (Arc<dyn EventSerializer>, _) = match config.content_mode {
            ContentMode::Event => {
                let serializer: Arc<dyn EventSerializer> = match serializer {
                    Some(serializer) => serializer,
                    None => Arc::new(JsonEventSerializer::with_body(
                        config.event_metadata(),
                        body_serializer_by_name(&config.body_serializer)?,
                    )),
                };
                (serializer, RequestKind::Events)
            }
            ContentMode::Raw => (
                serializer.unwrap_or_else(|| Arc::new(RawEventSerializer)),
                RequestKind::Raw,
            ),
        };

        let metrics = metrics.unwrap_or_else(|| {
            Arc::new(ChannelMetrics::with_warn_threshold(
                config.ack.window_warn_threshold,
            ))
        });

        let poster = BatchPoster::new(Arc::clone(&transport), kind, metrics.clone());
        let mut chain = MiddlewareChain::new(poster);

        let ack = config.ack.enabled.then(|| {
            AckManager::new(
                Arc::clone(&transport),
                metrics.clone(),
                config.ack.poll_interval(),
            )
        });
        if let Some(manager) = &ack {
            chain.add(Arc::new(AckMiddleware::new(Arc::clone(manager))));
        }
        if config.retry.max_retries > 0 {
            chain.add(Arc::new(ResendMiddleware::from_config(&config.retry)));
        }
        for middleware in middlewares {
            chain.add(middleware);
        }

        let limits = BatchLimits::new(config.batch.max_count, config.batch.max_bytes);

        info!(
            endpoint = %config.endpoint,
            content_mode = ?config.content_mode,
            send_mode = %config.send_mode,
            max_count = limits.max_count(),
            max_bytes = limits.max_bytes(),
            middlewares = ?chain.layer_names(),
            "Sender assembled"
        );

        let core = SenderCore {
            accumulator: BatchAccumulator::new(limits, serializer),
            chain: Arc::new(chain),
            transport,
            ack,
            metrics,
            stats: SenderStats::new(),
            flush_interval: config.batch.flush_interval(),
            send_mode: config.send_mode,
            turn: (config.send_mode == SendMode::Sequential).then(|| Semaphore::new(1)),
        };

        Ok((core, on_delivery))
    }
}
