use super::transport::{OutboundRequest, Reply, RequestKind, Transport};
use crate::buffer::EventBatch;
use crate::domain::ShipperError;
use crate::metrics::{LifecycleEvent, LifecycleObserver};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub type ChainResult = Result<Reply, ShipperError>;

/// An interceptor around the batch POST.
///
/// A middleware may work before and after delegating to `next`, may call
/// `next` several times (resend), or not at all. It never mutates the batch.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle<'a>(&'a self, batch: Arc<EventBatch>, next: Next<'a>) -> BoxFuture<'a, ChainResult>;
}

/// Handle to the rest of the chain below the current middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    poster: &'a BatchPoster,
}

impl<'a> Next<'a> {
    pub fn run(self, batch: Arc<EventBatch>) -> BoxFuture<'a, ChainResult> {
        match self.remaining.split_first() {
            Some((head, rest)) => head.handle(
                batch,
                Next {
                    remaining: rest,
                    poster: self.poster,
                },
            ),
            None => self.poster.post(batch),
        }
    }
}

/// End of the chain: hands the batch payload to the transport.
///
/// Every HTTP status comes back as `Ok(Reply)`; classifying it is left to the
/// middlewares and the sender.
pub struct BatchPoster {
    transport: Arc<dyn Transport>,
    kind: RequestKind,
    observer: Arc<dyn LifecycleObserver>,
}

impl BatchPoster {
    pub fn new(
        transport: Arc<dyn Transport>,
        kind: RequestKind,
        observer: Arc<dyn LifecycleObserver>,
    ) -> Self {
        Self {
            transport,
            kind,
            observer,
        }
    }

    pub fn post(&self, batch: Arc<EventBatch>) -> BoxFuture<'_, ChainResult> {
        Box::pin(async move {
            self.observer
                .observe(&LifecycleEvent::PreEventPost { batch: &batch });

            let body = Bytes::copy_from_slice(batch.payload().as_bytes());
            match self.transport.post(OutboundRequest::new(self.kind, body)).await {
                Ok(reply) => {
                    let event = if reply.is_success() {
                        LifecycleEvent::EventPostOk {
                            batch: &batch,
                            reply: &reply,
                        }
                    } else {
                        LifecycleEvent::EventPostNotOk {
                            batch: &batch,
                            reply: &reply,
                        }
                    };
                    self.observer.observe(&event);
                    Ok(reply)
                }
                Err(error) => {
                    let error = ShipperError::from(error);
                    self.observer.observe(&LifecycleEvent::EventPostFailed {
                        batch: &batch,
                        error: &error,
                    });
                    Err(error)
                }
            }
        })
    }
}

/// Ordered interceptors wrapping the [`BatchPoster`].
///
/// Middlewares are prepended as they are added: the last one registered is
/// the outermost wrapper.
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
    poster: BatchPoster,
}

impl MiddlewareChain {
    pub fn new(poster: BatchPoster) -> Self {
        Self {
            layers: Vec::new(),
            poster,
        }
    }

    pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
        self.layers.insert(0, middleware);
    }

    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.add(middleware);
        self
    }

    /// Names from outermost to innermost.
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|m| m.name()).collect()
    }

    /// Direct-return flavor: resolves to the outcome of the whole chain.
    pub fn send(&self, batch: Arc<EventBatch>) -> BoxFuture<'_, ChainResult> {
        Next {
            remaining: &self.layers,
            poster: &self.poster,
        }
        .run(batch)
    }

    /// Callback flavor: runs the chain on the runtime and hands the outcome
    /// to `callback` when it completes.
    pub fn send_with_callback<F>(self: &Arc<Self>, batch: Arc<EventBatch>, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Arc<EventBatch>, ChainResult) + Send + 'static,
    {
        let chain = Arc::clone(self);
        tokio::spawn(async move {
            let result = chain.send(Arc::clone(&batch)).await;
            callback(batch, result);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BatchLimits;
    use crate::domain::EventRecord;
    use crate::metrics::NoopObserver;
    use crate::sender::TransportError;
    use parking_lot::Mutex;

    struct Recording {
        name: &'static str,
        trace: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn handle<'a>(&'a self, batch: Arc<EventBatch>, next: Next<'a>) -> BoxFuture<'a, ChainResult> {
            Box::pin(async move {
                self.trace.lock().push(format!("{}:before", self.name));
                let result = next.run(batch).await;
                self.trace.lock().push(format!("{}:after", self.name));
                result
            })
        }
    }

    struct FixedTransport {
        trace: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for FixedTransport {
        fn post<'a>(&'a self, request: OutboundRequest) -> BoxFuture<'a, Result<Reply, TransportError>> {
            Box::pin(async move {
                self.trace
                    .lock()
                    .push(format!("transport:{}", String::from_utf8_lossy(&request.body)));
                Ok(Reply::new(200, r#"{"text":"Success","code":0}"#))
            })
        }
    }

    fn sealed_batch() -> Arc<EventBatch> {
        let mut batch = EventBatch::new(BatchLimits::default());
        batch.add(EventRecord::info("payload"), "payload").unwrap();
        batch.seal();
        Arc::new(batch)
    }

    fn chain(trace: &Arc<Mutex<Vec<String>>>) -> MiddlewareChain {
        let poster = BatchPoster::new(
            Arc::new(FixedTransport {
                trace: Arc::clone(trace),
            }),
            RequestKind::Events,
            Arc::new(NoopObserver),
        );
        MiddlewareChain::new(poster)
            .with(Arc::new(Recording {
                name: "first",
                trace: Arc::clone(trace),
            }))
            .with(Arc::new(Recording {
                name: "second",
                trace: Arc::clone(trace),
            }))
    }

    #[tokio::test]
    async fn test_last_registered_middleware_is_outermost() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&trace);

        assert_eq!(chain.layer_names(), vec!["second", "first"]);

        let reply = chain.send(sealed_batch()).await.unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(
            *trace.lock(),
            vec![
                "second:before",
                "first:before",
                "transport:payload",
                "first:after",
                "second:after"
            ]
        );
    }

    #[tokio::test]
    async fn test_callback_flavor_delivers_result() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let chain = Arc::new(chain(&trace));
        let (tx, rx) = tokio::sync::oneshot::channel();

        chain
            .send_with_callback(sealed_batch(), move |batch, result| {
                let _ = tx.send((batch.len(), result.map(|r| r.status)));
            })
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap(), (1, Ok(200)));
    }
}
