use super::manager::AckManager;
use crate::buffer::EventBatch;
use crate::domain::ShipperError;
use crate::sender::{ChainResult, Middleware, Next};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Feeds every POST outcome into the [`AckManager`].
///
/// Registered before the resend middleware so each resend attempt passes
/// through it.
pub struct AckMiddleware {
    manager: Arc<AckManager>,
}

impl AckMiddleware {
    pub fn new(manager: Arc<AckManager>) -> Self {
        Self { manager }
    }
}

impl Middleware for AckMiddleware {
    fn name(&self) -> &'static str {
        "ack"
    }

    fn handle<'a>(&'a self, batch: Arc<EventBatch>, next: Next<'a>) -> BoxFuture<'a, ChainResult> {
        Box::pin(async move {
            // Nothing is posted once ack tracking has halted
            self.manager.check_poisoned().map_err(ShipperError::from)?;

            let window = self.manager.window();
            window.pre_post(&batch);

            let result = next.run(Arc::clone(&batch)).await;

            match &result {
                Ok(reply) if reply.check().is_ok() => {
                    if let Err(e) = self.manager.consume_event_post_response(&batch, reply) {
                        window.post_failed(batch.id());
                        return Err(ShipperError::from(e));
                    }
                }
                _ => {
                    window.post_failed(batch.id());
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BatchLimits;
    use crate::domain::EventRecord;
    use crate::metrics::NoopObserver;
    use crate::sender::{
        BatchPoster, MiddlewareChain, OutboundRequest, Reply, RequestKind, Transport,
        TransportError,
    };
    use serial_test::serial;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct StatusTransport(u16, &'static str);

    impl Transport for StatusTransport {
        fn post<'a>(&'a self, _request: OutboundRequest) -> BoxFuture<'a, Result<Reply, TransportError>> {
            Box::pin(async move { Ok(Reply::new(self.0, self.1)) })
        }
    }

    fn chain(status: u16, body: &'static str) -> (MiddlewareChain, Arc<AckManager>) {
        let transport: Arc<dyn Transport> = Arc::new(StatusTransport(status, body));
        let manager = AckManager::new(
            Arc::clone(&transport),
            Arc::new(NoopObserver),
            Duration::from_secs(3600),
        );
        let poster = BatchPoster::new(transport, RequestKind::Events, Arc::new(NoopObserver));
        let chain = MiddlewareChain::new(poster)
            .with(Arc::new(AckMiddleware::new(Arc::clone(&manager))));
        (chain, manager)
    }

    fn batch() -> Arc<EventBatch> {
        let mut batch = EventBatch::new(BatchLimits::default());
        batch.add(EventRecord::info("x"), "x").unwrap();
        batch.seal();
        Arc::new(batch)
    }

    #[tokio::test]
    async fn test_successful_post_registers_ack_id() {
        let (chain, manager) = chain(200, r#"{"text":"Success","code":0,"ackId":42}"#);
        let batch = batch();

        chain.send(Arc::clone(&batch)).await.unwrap();

        assert_eq!(batch.ack_id(), Some(42));
        assert_eq!(manager.window().pending_ack_ids(), vec![42]);
        assert_eq!(manager.window().unconfirmed_len(), 0);
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_rejected_post_is_not_tracked() {
        let (chain, manager) = chain(404, r#"{"text":"error","code":4}"#);
        let batch = batch();

        let reply = chain.send(Arc::clone(&batch)).await.unwrap();

        assert_eq!(reply.status, 404);
        assert!(!manager.window().contains_batch(batch.id()));
        assert!(batch.ack_id().is_none());
    }

    /// Hands out increasing ack ids and answers every poll with garbage.
    #[derive(Default)]
    struct BrokenPollTransport {
        event_posts: AtomicU64,
    }

    impl Transport for BrokenPollTransport {
        fn post<'a>(&'a self, request: OutboundRequest) -> BoxFuture<'a, Result<Reply, TransportError>> {
            Box::pin(async move {
                match request.kind {
                    RequestKind::AckPoll => Ok(Reply::new(200, r#"{"acks":"nope"}"#)),
                    _ => {
                        let id = self.event_posts.fetch_add(1, Ordering::SeqCst);
                        Ok(Reply::new(200, format!(r#"{{"ackId":{id}}}"#)))
                    }
                }
            })
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_halted_manager_stops_posting_and_tracking() {
        crate::reliability::error_callback::clear();
        let transport = Arc::new(BrokenPollTransport::default());
        let manager = AckManager::new(
            transport.clone(),
            Arc::new(NoopObserver),
            Duration::from_secs(3600),
        );
        let poster = BatchPoster::new(transport.clone(), RequestKind::Events, Arc::new(NoopObserver));
        let chain = MiddlewareChain::new(poster)
            .with(Arc::new(AckMiddleware::new(Arc::clone(&manager))));

        chain.send(batch()).await.unwrap();
        assert!(manager.poll_acks().await.is_err());
        assert!(manager.is_poisoned());

        for _ in 0..100 {
            assert!(matches!(
                chain.send(batch()).await,
                Err(ShipperError::ProtocolViolation(_))
            ));
        }

        assert_eq!(transport.event_posts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.window().unconfirmed_len(), 0);
        assert_eq!(manager.window().pending_len(), 0);
    }
}
