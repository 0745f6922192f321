use super::protocol::{AckError, AckPollReply};
use crate::buffer::EventBatch;
use crate::domain::ShipperError;
use crate::metrics::{LifecycleEvent, LifecycleObserver};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct WindowState {
    /// Posted, no ack id learned yet; keyed by batch id.
    unconfirmed: HashMap<Uuid, Arc<EventBatch>>,
    /// Ack id learned, awaiting poll confirmation.
    pending: BTreeMap<u64, Arc<EventBatch>>,
}

/// In-flight batches of one channel.
///
/// A batch sits in at most one of the two maps at a time; both maps live
/// under one lock so a move between them is atomic.
pub struct AckWindow {
    state: Mutex<WindowState>,
    observer: Arc<dyn LifecycleObserver>,
}

impl AckWindow {
    pub fn new(observer: Arc<dyn LifecycleObserver>) -> Self {
        Self {
            state: Mutex::new(WindowState::default()),
            observer,
        }
    }

    /// Starts tracking a batch about to be posted.
    pub fn pre_post(&self, batch: &Arc<EventBatch>) {
        self.state
            .lock()
            .unconfirmed
            .insert(batch.id(), Arc::clone(batch));
    }

    /// Stops tracking a batch whose POST did not yield an ack id.
    pub fn post_failed(&self, batch_id: Uuid) -> Option<Arc<EventBatch>> {
        self.state.lock().unconfirmed.remove(&batch_id)
    }

    /// Moves a posted batch to the pending map under the id the collector
    /// issued for it.
    pub fn register_ack(&self, batch: &Arc<EventBatch>, ack_id: u64) -> Result<(), AckError> {
        {
            let mut state = self.state.lock();

            if let Some(existing) = state.pending.get(&ack_id) {
                return Err(AckError::IntegrityViolation {
                    reported: ack_id,
                    recorded: existing.ack_id(),
                    batch_id: existing.id(),
                });
            }

            batch
                .assign_ack_id(ack_id)
                .map_err(|recorded| AckError::IntegrityViolation {
                    reported: ack_id,
                    recorded: Some(recorded),
                    batch_id: batch.id(),
                })?;

            state.unconfirmed.remove(&batch.id());
            state.pending.insert(ack_id, Arc::clone(batch));
        }

        self.observer
            .observe(&LifecycleEvent::AckIdAssigned { batch, ack_id });
        Ok(())
    }

    /// Retires every batch the reply confirms.
    ///
    /// Ids that are no longer tracked are ignored, so a repeated
    /// confirmation is a no-op. A tracked batch whose recorded ack id differs
    /// from the key it is filed under is an integrity violation.
    pub fn handle_ack_poll_response(
        &self,
        reply: &AckPollReply,
    ) -> Result<Vec<Arc<EventBatch>>, AckError> {
        let mut retired = Vec::new();

        for ack_id in reply.acknowledged() {
            let batch = {
                let mut state = self.state.lock();
                let Some(batch) = state.pending.get(&ack_id) else {
                    continue;
                };
                if batch.ack_id() != Some(ack_id) {
                    return Err(AckError::IntegrityViolation {
                        reported: ack_id,
                        recorded: batch.ack_id(),
                        batch_id: batch.id(),
                    });
                }
                state.pending.remove(&ack_id)
            };

            if let Some(batch) = batch {
                self.observer.observe(&LifecycleEvent::Acknowledged {
                    batch: &batch,
                    ack_id,
                });
                retired.push(batch);
            }
        }

        Ok(retired)
    }

    /// Drops the given ack ids from tracking, reporting each as abandoned.
    pub fn abandon(&self, ack_ids: &[u64], error: &ShipperError) -> Vec<Arc<EventBatch>> {
        let removed: Vec<_> = {
            let mut state = self.state.lock();
            ack_ids
                .iter()
                .filter_map(|id| state.pending.remove(id).map(|batch| (*id, batch)))
                .collect()
        };

        self.notify_abandoned(removed, error)
    }

    /// Drops everything still tracked in either map and returns the batches
    /// that were awaiting confirmation.
    ///
    /// Unconfirmed batches are still inside their POST; their failure travels
    /// back up that chain, so they are dropped without being returned.
    pub fn abandon_all(&self, error: &ShipperError) -> Vec<Arc<EventBatch>> {
        let pending = {
            let mut state = self.state.lock();
            state.unconfirmed.clear();
            std::mem::take(&mut state.pending)
        };

        self.notify_abandoned(pending.into_iter().collect(), error)
    }

    fn notify_abandoned(
        &self,
        removed: Vec<(u64, Arc<EventBatch>)>,
        error: &ShipperError,
    ) -> Vec<Arc<EventBatch>> {
        removed
            .into_iter()
            .map(|(ack_id, batch)| {
                self.observer.observe(&LifecycleEvent::AckAbandoned {
                    batch: &batch,
                    ack_id,
                    error,
                });
                batch
            })
            .collect()
    }

    pub fn pending_ack_ids(&self) -> Vec<u64> {
        self.state.lock().pending.keys().copied().collect()
    }

    pub fn pending_batch(&self, ack_id: u64) -> Option<Arc<EventBatch>> {
        self.state.lock().pending.get(&ack_id).cloned()
    }

    pub fn unconfirmed_batch(&self, batch_id: Uuid) -> Option<Arc<EventBatch>> {
        self.state.lock().unconfirmed.get(&batch_id).cloned()
    }

    pub fn contains_batch(&self, batch_id: Uuid) -> bool {
        let state = self.state.lock();
        state.unconfirmed.contains_key(&batch_id)
            || state.pending.values().any(|batch| batch.id() == batch_id)
    }

    pub fn unconfirmed_len(&self) -> usize {
        self.state.lock().unconfirmed.len()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// No ack ids left to poll for.
    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BatchLimits;
    use crate::domain::EventRecord;
    use crate::metrics::{ChannelMetrics, NoopObserver};

    fn batch() -> Arc<EventBatch> {
        let mut batch = EventBatch::new(BatchLimits::default());
        batch.add(EventRecord::info("tracked"), "tracked").unwrap();
        batch.seal();
        Arc::new(batch)
    }

    #[test]
    fn test_batch_moves_between_maps() {
        let window = AckWindow::new(Arc::new(NoopObserver));
        let batch = batch();

        window.pre_post(&batch);
        assert_eq!(window.unconfirmed_len(), 1);
        assert!(window.is_empty());

        window.register_ack(&batch, 42).unwrap();
        assert_eq!(window.unconfirmed_len(), 0);
        assert_eq!(window.pending_ack_ids(), vec![42]);
        assert_eq!(batch.ack_id(), Some(42));
    }

    #[test]
    fn test_confirmation_retires_exactly_once() {
        let metrics = Arc::new(ChannelMetrics::new());
        let window = AckWindow::new(metrics.clone());
        let batch = batch();

        window.pre_post(&batch);
        window.register_ack(&batch, 42).unwrap();
        assert_eq!(metrics.unacknowledged_count(), 1);

        let reply = AckPollReply::from_pairs([(42, true)]);
        let retired = window.handle_ack_poll_response(&reply).unwrap();
        assert_eq!(retired.len(), 1);
        assert_eq!(metrics.unacknowledged_count(), 0);
        assert!(!window.contains_batch(batch.id()));

        let retired = window.handle_ack_poll_response(&reply).unwrap();
        assert!(retired.is_empty());
    }

    #[test]
    fn test_unconfirmed_ids_stay_pending() {
        let window = AckWindow::new(Arc::new(NoopObserver));
        let batch = batch();
        window.pre_post(&batch);
        window.register_ack(&batch, 5).unwrap();

        let retired = window
            .handle_ack_poll_response(&AckPollReply::from_pairs([(5, false)]))
            .unwrap();
        assert!(retired.is_empty());
        assert_eq!(window.pending_ack_ids(), vec![5]);
    }

    #[test]
    fn test_mismatched_ack_id_is_integrity_violation() {
        let window = AckWindow::new(Arc::new(NoopObserver));
        let batch = batch();
        batch.assign_ack_id(43).unwrap();
        window.state.lock().pending.insert(42, Arc::clone(&batch));

        let error = window
            .handle_ack_poll_response(&AckPollReply::from_pairs([(42, true)]))
            .unwrap_err();

        assert_eq!(
            error,
            AckError::IntegrityViolation {
                reported: 42,
                recorded: Some(43),
                batch_id: batch.id(),
            }
        );
        assert!(error.is_fatal());
        assert!(window.pending_batch(42).is_some());
    }

    #[test]
    fn test_duplicate_ack_id_is_rejected() {
        let window = AckWindow::new(Arc::new(NoopObserver));
        let first = batch();
        let second = batch();
        window.register_ack(&first, 9).unwrap();

        assert!(matches!(
            window.register_ack(&second, 9),
            Err(AckError::IntegrityViolation { reported: 9, .. })
        ));
    }

    #[test]
    fn test_abandon_all_returns_only_confirmed_posts() {
        let window = AckWindow::new(Arc::new(NoopObserver));
        let awaiting = batch();
        let posting = batch();
        window.register_ack(&awaiting, 1).unwrap();
        window.pre_post(&posting);

        let dropped = window.abandon_all(&ShipperError::ProtocolViolation("halt".to_string()));

        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id(), awaiting.id());
        assert!(!window.contains_batch(posting.id()));
        assert_eq!(window.unconfirmed_len(), 0);
    }

    #[test]
    fn test_abandon_reports_to_observer() {
        let metrics = Arc::new(ChannelMetrics::new());
        let window = AckWindow::new(metrics.clone());
        let batch = batch();
        window.register_ack(&batch, 1).unwrap();

        let dropped = window.abandon(&[1, 2], &ShipperError::Closed);
        assert_eq!(dropped.len(), 1);
        assert_eq!(metrics.snapshot().abandoned, 1);
        assert!(window.is_empty());
    }
}
