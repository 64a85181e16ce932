use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::dlq::DeadLetterQueue;
use crate::types::{DeadLetterEntry, QueueStats, ReprocessReport, WebhookEvent};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(120);
pub const DEFAULT_DLQ_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    /// Idle window after the last event for a key before dispatch fires.
    pub debounce: Duration,
    pub dlq_capacity: usize,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            dlq_capacity: DEFAULT_DLQ_CAPACITY,
        }
    }
}

/// Events for one coalesce key, alive until the debounce timer fires.
/// Only the last event survives; earlier ones are superseded.
struct PendingBucket {
    events: Vec<WebhookEvent>,
    timer: JoinHandle<()>,
}

struct Inner {
    pending: HashMap<String, PendingBucket>,
    dlq: DeadLetterQueue,
    processed_total: u64,
    failed_total: u64,
    last_webhook: Option<DateTime<Utc>>,
}

/// Buffers webhook events per object and dispatches one coalesced event per
/// debounce window. Cloneable handle; clones share the same store, dead-letter
/// queue, and counters.
#[derive(Clone)]
pub struct EventCoalescer {
    inner: Arc<Mutex<Inner>>,
    dispatcher: Arc<Dispatcher>,
    debounce: Duration,
}

impl EventCoalescer {
    pub fn new(dispatcher: Arc<Dispatcher>, config: CoalescerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                pending: HashMap::new(),
                dlq: DeadLetterQueue::new(config.dlq_capacity),
                processed_total: 0,
                failed_total: 0,
                last_webhook: None,
            })),
            dispatcher,
            debounce: config.debounce,
        }
    }

    /// Buffer a webhook batch. Each event restarts its key's debounce timer;
    /// callers return immediately, dispatch happens after the window elapses.
    pub async fn enqueue(&self, events: Vec<WebhookEvent>, received_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner.last_webhook = Some(received_at);
        for event in events {
            let key = event.coalesce_key();
            match inner.pending.get_mut(&key) {
                Some(bucket) => {
                    bucket.timer.abort();
                    bucket.events.push(event);
                    bucket.timer = self.spawn_timer(key);
                }
                None => {
                    let timer = self.spawn_timer(key.clone());
                    inner.pending.insert(
                        key,
                        PendingBucket {
                            events: vec![event],
                            timer,
                        },
                    );
                }
            }
        }
    }

    fn spawn_timer(&self, key: String) -> JoinHandle<()> {
        let coalescer = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(coalescer.debounce).await;
            coalescer.flush(&key).await;
        })
    }

    /// Timer-fire path: the bucket leaves the store before dispatch, so the
    /// store is clean regardless of the dispatch outcome.
    async fn flush(&self, key: &str) {
        let event = {
            let mut inner = self.inner.lock().await;
            match inner.pending.remove(key) {
                Some(bucket) => bucket.events.into_iter().last(),
                None => return,
            }
        };
        let Some(event) = event else { return };
        debug!(key, "debounce window elapsed, dispatching");
        self.dispatch_now(event).await;
    }

    /// Dispatches one event and settles the counters. The sink call is awaited
    /// with the store lock released.
    async fn dispatch_now(&self, event: WebhookEvent) -> DispatchResult {
        match self.dispatcher.dispatch(&event).await {
            Ok(DispatchOutcome::Completed) => {
                let mut inner = self.inner.lock().await;
                inner.processed_total += 1;
                DispatchResult::Completed
            }
            Ok(DispatchOutcome::Skipped) => DispatchResult::Skipped,
            Err(err) => {
                error!(
                    object_type = %event.object_type,
                    object_id = event.object_id,
                    error = %err,
                    "dispatch failed, dead-lettering event"
                );
                let mut inner = self.inner.lock().await;
                inner.failed_total += 1;
                inner.dlq.push(DeadLetterEntry::new(event, err.to_string()));
                DispatchResult::Failed
            }
        }
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        let now = Utc::now();
        QueueStats {
            last_webhook: inner.last_webhook,
            last_webhook_age_ms: inner
                .last_webhook
                .map(|t| (now - t).num_milliseconds()),
            queue_depth: inner.pending.values().map(|b| b.events.len()).sum(),
            dlq_depth: inner.dlq.len(),
            processed_total: inner.processed_total,
            failed_total: inner.failed_total,
        }
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.inner.lock().await.dlq.entries()
    }

    pub async fn clear_dead_letters(&self) -> usize {
        self.inner.lock().await.dlq.clear()
    }

    /// Single best-effort retry pass over the dead-letter queue. Entries that
    /// fail again re-enter the queue with a fresh timestamp and updated error.
    pub async fn reprocess_dead_letters(&self) -> ReprocessReport {
        let entries = self.inner.lock().await.dlq.drain();
        let attempted = entries.len();
        let mut requeued = 0;
        for entry in entries {
            if self.dispatch_now(entry.event).await == DispatchResult::Failed {
                requeued += 1;
            }
        }
        if attempted > 0 {
            info!(attempted, requeued, "dead-letter reprocess pass finished");
        }
        ReprocessReport {
            attempted,
            requeued,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchResult {
    Completed,
    Skipped,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ContributionSink;
    use crate::error::SinkError;
    use crate::types::NewContribution;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    const WINDOW: Duration = Duration::from_millis(200);

    struct TestSink {
        created: StdMutex<Vec<NewContribution>>,
        fail: AtomicBool,
    }

    impl TestSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                created: StdMutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        fn created(&self) -> Vec<NewContribution> {
            self.created.lock().unwrap().clone()
        }

        fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ContributionSink for TestSink {
        async fn create(&self, contribution: NewContribution) -> Result<(), SinkError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SinkError::Rejected(503));
            }
            self.created.lock().unwrap().push(contribution);
            Ok(())
        }
    }

    fn coalescer_with(sink: Arc<TestSink>, window: Duration) -> EventCoalescer {
        EventCoalescer::new(
            Arc::new(Dispatcher::new(sink)),
            CoalescerConfig {
                debounce: window,
                dlq_capacity: DEFAULT_DLQ_CAPACITY,
            },
        )
    }

    fn contact_event(object_id: i64, email: &str) -> WebhookEvent {
        WebhookEvent {
            object_id,
            object_type: "contact".into(),
            event_type: "contact.propertyChange".into(),
            properties: Some(serde_json::json!({ "email": email })),
            occurred_at: None,
            property_name: None,
            property_value: None,
        }
    }

    async fn wait_past_window() {
        tokio::time::sleep(WINDOW + Duration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn burst_collapses_to_one_dispatch_with_last_payload() {
        let sink = TestSink::new();
        let coalescer = coalescer_with(sink.clone(), WINDOW);

        coalescer
            .enqueue(vec![contact_event(123, "old@example.com")], Utc::now())
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        coalescer
            .enqueue(vec![contact_event(123, "new@example.com")], Utc::now())
            .await;

        wait_past_window().await;

        let created = sink.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].title, "Contact activity: new@example.com");

        let stats = coalescer.stats().await;
        assert_eq!(stats.processed_total, 1);
        assert_eq!(stats.queue_depth, 0);
        assert_eq!(stats.failed_total, 0);
    }

    #[tokio::test]
    async fn distinct_keys_dispatch_independently() {
        let sink = TestSink::new();
        let coalescer = coalescer_with(sink.clone(), WINDOW);

        coalescer
            .enqueue(
                vec![
                    contact_event(1, "a@example.com"),
                    contact_event(2, "b@example.com"),
                ],
                Utc::now(),
            )
            .await;

        wait_past_window().await;

        assert_eq!(sink.created().len(), 2);
        assert_eq!(coalescer.stats().await.processed_total, 2);
    }

    #[tokio::test]
    async fn new_event_restarts_the_window() {
        let sink = TestSink::new();
        let coalescer = coalescer_with(sink.clone(), Duration::from_millis(600));

        coalescer
            .enqueue(vec![contact_event(7, "a@example.com")], Utc::now())
            .await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        coalescer
            .enqueue(vec![contact_event(7, "b@example.com")], Utc::now())
            .await;

        // 700ms in: past the first event's window, inside the restarted one.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(sink.created().is_empty());
        assert_eq!(coalescer.stats().await.queue_depth, 2);

        tokio::time::sleep(Duration::from_millis(400)).await;
        let created = sink.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].title, "Contact activity: b@example.com");
    }

    #[tokio::test]
    async fn queue_depth_tracks_pending_buckets() {
        let sink = TestSink::new();
        let coalescer = coalescer_with(sink.clone(), WINDOW);

        coalescer
            .enqueue(
                vec![
                    contact_event(1, "a@example.com"),
                    contact_event(1, "b@example.com"),
                    contact_event(2, "c@example.com"),
                ],
                Utc::now(),
            )
            .await;

        assert_eq!(coalescer.stats().await.queue_depth, 3);

        wait_past_window().await;
        assert_eq!(coalescer.stats().await.queue_depth, 0);
    }

    #[tokio::test]
    async fn failures_are_counted_and_dead_lettered() {
        let sink = TestSink::new();
        sink.set_failing(true);
        let coalescer = coalescer_with(sink.clone(), WINDOW);

        coalescer
            .enqueue(
                vec![
                    contact_event(1, "a@example.com"),
                    contact_event(2, "b@example.com"),
                ],
                Utc::now(),
            )
            .await;

        wait_past_window().await;

        let stats = coalescer.stats().await;
        assert_eq!(stats.processed_total, 0);
        assert_eq!(stats.failed_total, 2);
        assert_eq!(stats.dlq_depth, 2);

        let entries = coalescer.dead_letters().await;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].error.contains("503"));
    }

    #[tokio::test]
    async fn unknown_object_type_is_dropped_silently() {
        let sink = TestSink::new();
        let coalescer = coalescer_with(sink.clone(), WINDOW);

        let event = WebhookEvent {
            object_id: 9,
            object_type: "widget".into(),
            event_type: "widget.creation".into(),
            properties: None,
            occurred_at: None,
            property_name: None,
            property_value: None,
        };
        coalescer.enqueue(vec![event], Utc::now()).await;

        wait_past_window().await;

        let stats = coalescer.stats().await;
        assert!(sink.created().is_empty());
        assert_eq!(stats.processed_total, 0);
        assert_eq!(stats.failed_total, 0);
        assert_eq!(stats.dlq_depth, 0);
    }

    #[tokio::test]
    async fn reprocess_retries_and_requeues_repeat_failures() {
        let sink = TestSink::new();
        sink.set_failing(true);
        let coalescer = coalescer_with(sink.clone(), WINDOW);

        coalescer
            .enqueue(vec![contact_event(1, "a@example.com")], Utc::now())
            .await;
        wait_past_window().await;
        assert_eq!(coalescer.stats().await.dlq_depth, 1);

        // Still failing: the entry goes right back with a second failure counted.
        let report = coalescer.reprocess_dead_letters().await;
        assert_eq!(report.attempted, 1);
        assert_eq!(report.requeued, 1);
        assert_eq!(coalescer.stats().await.failed_total, 2);

        // Downstream recovers: the pass drains the queue for good.
        sink.set_failing(false);
        let report = coalescer.reprocess_dead_letters().await;
        assert_eq!(report.attempted, 1);
        assert_eq!(report.requeued, 0);

        let stats = coalescer.stats().await;
        assert_eq!(stats.dlq_depth, 0);
        assert_eq!(stats.processed_total, 1);
        assert_eq!(sink.created().len(), 1);
    }

    #[tokio::test]
    async fn last_webhook_age_starts_null_and_then_tracks() {
        let sink = TestSink::new();
        let coalescer = coalescer_with(sink.clone(), WINDOW);

        let stats = coalescer.stats().await;
        assert!(stats.last_webhook.is_none());
        assert!(stats.last_webhook_age_ms.is_none());

        coalescer
            .enqueue(vec![contact_event(1, "a@example.com")], Utc::now())
            .await;

        let stats = coalescer.stats().await;
        assert!(stats.last_webhook.is_some());
        assert!(stats.last_webhook_age_ms.unwrap() >= 0);
    }
}
