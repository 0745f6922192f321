use super::protocol::{AckError, AckPollReply, AckPollRequest, PostReply};
use super::scheduler::AckPollScheduler;
use super::window::AckWindow;
use crate::buffer::EventBatch;
use crate::domain::ShipperError;
use crate::metrics::{LifecycleEvent, LifecycleObserver};
use crate::reliability::error_callback;
use crate::sender::{OutboundRequest, Reply, RequestKind, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Clears the in-flight flag however the poll ends.
struct PollGuard<'a>(&'a AtomicBool);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Learns ack ids from POST replies and confirms them by polling.
///
/// The poll scheduler is started lazily when the first ack id arrives. A
/// protocol violation halts the manager for good: the scheduler stops, all
/// tracked batches are reported as failed, and later calls return
/// [`AckError::Poisoned`].
pub struct AckManager {
    window: AckWindow,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn LifecycleObserver>,
    scheduler: AckPollScheduler,
    poll_in_flight: AtomicBool,
    poisoned: Mutex<Option<String>>,
}

impl AckManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        observer: Arc<dyn LifecycleObserver>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            window: AckWindow::new(Arc::clone(&observer)),
            transport,
            observer,
            scheduler: AckPollScheduler::new(poll_interval),
            poll_in_flight: AtomicBool::new(false),
            poisoned: Mutex::new(None),
        })
    }

    pub fn window(&self) -> &AckWindow {
        &self.window
    }

    pub fn scheduler(&self) -> &AckPollScheduler {
        &self.scheduler
    }

    pub fn is_poll_in_flight(&self) -> bool {
        self.poll_in_flight.load(Ordering::Acquire)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.lock().is_some()
    }

    pub fn check_poisoned(&self) -> Result<(), AckError> {
        match self.poisoned.lock().as_ref() {
            Some(reason) => Err(AckError::Poisoned(reason.clone())),
            None => Ok(()),
        }
    }

    /// Reads the ack id from a successful POST reply and moves the batch to
    /// the pending map. Returns `None` when the reply carries no ack id; the
    /// batch is then no longer tracked.
    pub fn consume_event_post_response(
        self: &Arc<Self>,
        batch: &Arc<EventBatch>,
        reply: &Reply,
    ) -> Result<Option<u64>, AckError> {
        self.check_poisoned()?;

        let ack_id = match PostReply::parse(&reply.body) {
            Ok(PostReply { ack_id: Some(id) }) => id,
            Ok(PostReply { ack_id: None }) => {
                warn!(batch_id = %batch.id(), "Event reply carried no ackId; batch is not tracked");
                self.window.post_failed(batch.id());
                return Ok(None);
            }
            Err(e) => {
                warn!(batch_id = %batch.id(), error = %e, "Unparseable event reply; batch is not tracked");
                self.window.post_failed(batch.id());
                return Ok(None);
            }
        };

        if let Err(violation) = self.window.register_ack(batch, ack_id) {
            // This batch's failure is returned to its caller, not abandoned
            self.window.post_failed(batch.id());
            self.poison(&violation);
            return Err(violation);
        }
        debug!(batch_id = %batch.id(), ack_id, "Tracking ackId");

        if !self.scheduler.is_started() {
            match self.scheduler.start(Arc::downgrade(self)) {
                Ok(()) | Err(AckError::SchedulerAlreadyStarted) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(Some(ack_id))
    }

    /// Asks the collector which pending ack ids are indexed and retires the
    /// confirmed batches. Returns how many were retired.
    ///
    /// A poll that fails or is rejected abandons every polled batch and
    /// reports it through the error callback.
    pub async fn poll_acks(&self) -> Result<usize, AckError> {
        self.check_poisoned()?;

        if self.poll_in_flight.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }
        let _guard = PollGuard(&self.poll_in_flight);

        let ack_ids = self.window.pending_ack_ids();
        if ack_ids.is_empty() {
            return Ok(0);
        }

        self.observer
            .observe(&LifecycleEvent::PreAckPoll { ack_ids: &ack_ids });

        let body = AckPollRequest::new(ack_ids.clone())
            .to_body()
            .map_err(|e| AckError::PollFailed(ShipperError::Serialization(e.to_string())))?;

        let reply = match self
            .transport
            .post(OutboundRequest::new(RequestKind::AckPoll, body))
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                let failure = ShipperError::from(e);
                self.observer
                    .observe(&LifecycleEvent::AckPollFailed { error: &failure });
                self.fail_poll(&ack_ids, &failure);
                return Err(AckError::PollFailed(failure));
            }
        };

        if let Err(rejection) = reply.check() {
            self.observer
                .observe(&LifecycleEvent::AckPollNotOk { reply: &reply });
            self.fail_poll(&ack_ids, &rejection);
            return Err(AckError::PollFailed(rejection));
        }

        let parsed = match AckPollReply::parse(&reply.body) {
            Ok(parsed) => parsed,
            Err(violation) => {
                let failure = ShipperError::from(violation.clone());
                self.observer
                    .observe(&LifecycleEvent::AckPollFailed { error: &failure });
                self.poison(&violation);
                return Err(violation);
            }
        };
        self.observer
            .observe(&LifecycleEvent::AckPollOk { reply: &reply });

        match self.window.handle_ack_poll_response(&parsed) {
            Ok(retired) => {
                debug!(
                    polled = ack_ids.len(),
                    retired = retired.len(),
                    "Ack poll completed"
                );
                Ok(retired.len())
            }
            Err(violation) => {
                self.poison(&violation);
                Err(violation)
            }
        }
    }

    fn fail_poll(&self, ack_ids: &[u64], failure: &ShipperError) {
        warn!(count = ack_ids.len(), error = %failure, "Ack poll failed, abandoning polled batches");
        for batch in self.window.abandon(ack_ids, failure) {
            error_callback::report(&batch, failure);
        }
    }

    fn poison(&self, violation: &AckError) {
        {
            let mut poisoned = self.poisoned.lock();
            if poisoned.is_some() {
                return;
            }
            *poisoned = Some(violation.to_string());
        }

        error!(error = %violation, "Ack protocol violation, halting ack tracking");
        self.scheduler.stop();

        let failure = ShipperError::ProtocolViolation(violation.to_string());
        for batch in self.window.abandon_all(&failure) {
            error_callback::report(&batch, &failure);
        }
    }

    /// Stops future polls. Batches still awaiting confirmation stay in the
    /// window.
    pub fn shutdown(&self) {
        self.scheduler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BatchLimits;
    use crate::domain::EventRecord;
    use crate::metrics::{ChannelMetrics, NoopObserver};
    use crate::sender::TransportError;
    use futures::future::BoxFuture;
    use serial_test::serial;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<Reply, TransportError>>>,
        bodies: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<Reply, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                bodies: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for ScriptedTransport {
        fn post<'a>(&'a self, request: OutboundRequest) -> BoxFuture<'a, Result<Reply, TransportError>> {
            Box::pin(async move {
                self.bodies
                    .lock()
                    .push(String::from_utf8_lossy(&request.body).into_owned());
                self.replies
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| Ok(Reply::new(200, r#"{"acks":{}}"#)))
            })
        }
    }

    fn batch() -> Arc<EventBatch> {
        let mut batch = EventBatch::new(BatchLimits::default());
        batch.add(EventRecord::info("acked"), "acked").unwrap();
        batch.seal();
        Arc::new(batch)
    }

    #[tokio::test]
    async fn test_post_then_poll_retires_batch() {
        let transport = ScriptedTransport::new(vec![Ok(Reply::new(
            200,
            r#"{"acks":{"42":true}}"#,
        ))]);
        let metrics = Arc::new(ChannelMetrics::new());
        let manager = AckManager::new(transport.clone(), metrics.clone(), Duration::from_secs(3600));
        let batch = batch();

        manager.window().pre_post(&batch);
        let ack_id = manager
            .consume_event_post_response(&batch, &Reply::new(200, r#"{"ackId":42}"#))
            .unwrap();
        assert_eq!(ack_id, Some(42));
        assert_eq!(metrics.unacknowledged_count(), 1);
        assert!(manager.scheduler().is_started());

        assert_eq!(manager.poll_acks().await.unwrap(), 1);
        assert_eq!(metrics.unacknowledged_count(), 0);
        assert!(!manager.window().contains_batch(batch.id()));
        assert_eq!(transport.bodies.lock()[0], r#"{"acks":[42]}"#);
        assert_eq!(metrics.poll_ok(), 1);

        manager.shutdown();
    }

    #[tokio::test]
    async fn test_reply_without_ack_id_untracks_batch() {
        let manager = AckManager::new(
            ScriptedTransport::new(Vec::new()),
            Arc::new(NoopObserver),
            Duration::from_secs(3600),
        );
        let batch = batch();
        manager.window().pre_post(&batch);

        let ack_id = manager
            .consume_event_post_response(&batch, &Reply::new(200, r#"{"text":"Success","code":0}"#))
            .unwrap();

        assert_eq!(ack_id, None);
        assert!(!manager.window().contains_batch(batch.id()));
        assert!(!manager.scheduler().is_started());
    }

    #[tokio::test]
    async fn test_empty_window_skips_poll() {
        let transport = ScriptedTransport::new(Vec::new());
        let manager = AckManager::new(transport.clone(), Arc::new(NoopObserver), Duration::from_secs(1));

        assert_eq!(manager.poll_acks().await.unwrap(), 0);
        assert!(transport.bodies.lock().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_poll_failure_abandons_polled_batches() {
        error_callback::clear();
        let transport = ScriptedTransport::new(vec![Err(TransportError::ConnectionFailed(
            "refused".to_string(),
        ))]);
        let metrics = Arc::new(ChannelMetrics::new());
        let manager = AckManager::new(transport, metrics.clone(), Duration::from_secs(3600));
        let batch = batch();
        manager
            .consume_event_post_response(&batch, &Reply::new(200, r#"{"ackId":1}"#))
            .unwrap();

        let error = manager.poll_acks().await.unwrap_err();
        assert!(matches!(error, AckError::PollFailed(ShipperError::TransportFailure(_))));
        assert!(manager.window().is_empty());
        assert_eq!(metrics.poll_failed(), 1);
        assert_eq!(metrics.snapshot().abandoned, 1);
        assert!(!manager.is_poisoned());

        manager.shutdown();
    }

    #[tokio::test]
    #[serial]
    async fn test_malformed_poll_reply_poisons_manager() {
        error_callback::clear();
        let transport = ScriptedTransport::new(vec![Ok(Reply::new(200, r#"{"acks":"nope"}"#))]);
        let manager = AckManager::new(transport, Arc::new(NoopObserver), Duration::from_secs(3600));
        let batch = batch();
        manager
            .consume_event_post_response(&batch, &Reply::new(200, r#"{"ackId":3}"#))
            .unwrap();

        let error = manager.poll_acks().await.unwrap_err();
        assert!(error.is_fatal());
        assert!(manager.is_poisoned());
        assert!(!manager.scheduler().is_running());
        assert!(matches!(manager.poll_acks().await, Err(AckError::Poisoned(_))));
        assert!(matches!(
            manager.consume_event_post_response(&batch, &Reply::new(200, r#"{"ackId":4}"#)),
            Err(AckError::Poisoned(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_polls_on_interval() {
        let transport = ScriptedTransport::new(vec![Ok(Reply::new(
            200,
            r#"{"acks":{"8":true}}"#,
        ))]);
        let manager = AckManager::new(transport.clone(), Arc::new(NoopObserver), Duration::from_secs(1));
        let batch = batch();
        manager
            .consume_event_post_response(&batch, &Reply::new(200, r#"{"ackId":8}"#))
            .unwrap();

        assert!(matches!(
            manager.scheduler().start(Arc::downgrade(&manager)),
            Err(AckError::SchedulerAlreadyStarted)
        ));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(manager.window().is_empty());
        assert_eq!(transport.bodies.lock().len(), 1);
        manager.shutdown();
    }

    /// Holds every poll open for half a minute.
    #[derive(Default)]
    struct StalledPollTransport {
        polls: AtomicUsize,
    }

    impl Transport for StalledPollTransport {
        fn post<'a>(&'a self, _request: OutboundRequest) -> BoxFuture<'a, Result<Reply, TransportError>> {
            Box::pin(async move {
                self.polls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Reply::new(200, r#"{"acks":{}}"#))
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_poll_is_not_overlapped() {
        let transport = Arc::new(StalledPollTransport::default());
        let manager = AckManager::new(transport.clone(), Arc::new(NoopObserver), Duration::from_secs(1));
        manager
            .consume_event_post_response(&batch(), &Reply::new(200, r#"{"ackId":5}"#))
            .unwrap();

        // Ticks at 2s..5s all find the first poll outstanding
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert!(manager.is_poll_in_flight());
        assert_eq!(transport.polls.load(Ordering::SeqCst), 1);

        assert_eq!(manager.poll_acks().await.unwrap(), 0);
        assert_eq!(transport.polls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.window().pending_ack_ids(), vec![5]);

        manager.shutdown();
    }
}
