//! Event Bus - priority dispatch for cogd events
//!
//! Producers emit events from any task; a single consumer loop pops them in
//! priority order and fans each one out to its subscribed handlers. Within a
//! priority class dispatch is FIFO; across classes, strict priority order.
//! Handlers for the same event run concurrently and are awaited before the
//! next event is popped, which is what serializes FSM transitions per task.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::{Event, EventType};

/// How long the consumer sleeps when the queue is empty before re-checking
/// the running flag; bounds shutdown latency when idle
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Default bound on the dispatched-event history
pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

/// A subscribed event handler
///
/// Errors are logged and swallowed by the bus; they never reach peer handlers
/// or the consumer loop.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in log lines when this handler fails
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, event: Event) -> eyre::Result<()>;
}

/// Opaque handle returned by subscribe, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Heap entry ordered by (effective priority, insertion sequence)
struct QueuedEvent {
    priority: u16,
    seq: u64,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority.cmp(&other.priority).then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Handlers {
    by_type: HashMap<EventType, Vec<(u64, Arc<dyn EventHandler>)>>,
    wildcard: Vec<(u64, Arc<dyn EventHandler>)>,
}

struct BusInner {
    queue: std::sync::Mutex<BinaryHeap<Reverse<QueuedEvent>>>,
    notify: Notify,
    accepting: AtomicBool,
    seq: AtomicU64,
    next_sub_id: AtomicU64,
    handlers: std::sync::RwLock<Handlers>,
    history: std::sync::Mutex<VecDeque<Event>>,
    history_capacity: usize,
}

impl BusInner {
    fn push(&self, event: Event) {
        let entry = QueuedEvent {
            priority: event.effective_priority(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            event,
        };
        self.queue.lock().expect("bus queue poisoned").push(Reverse(entry));
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Event> {
        self.queue
            .lock()
            .expect("bus queue poisoned")
            .pop()
            .map(|Reverse(entry)| entry.event)
    }

    fn record(&self, event: &Event) {
        let mut history = self.history.lock().expect("bus history poisoned");
        if history.len() == self.history_capacity {
            history.pop_front();
        }
        history.push_back(event.clone());
    }

    fn handlers_for(&self, event_type: EventType) -> Vec<Arc<dyn EventHandler>> {
        let handlers = self.handlers.read().expect("bus handlers poisoned");
        let mut out: Vec<Arc<dyn EventHandler>> = Vec::new();
        if let Some(specific) = handlers.by_type.get(&event_type) {
            out.extend(specific.iter().map(|(_, h)| Arc::clone(h)));
        }
        out.extend(handlers.wildcard.iter().map(|(_, h)| Arc::clone(h)));
        out
    }
}

/// Central event bus with a single consumption loop
pub struct EventBus {
    inner: Arc<BusInner>,
    consumer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a bus with the default history capacity
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a bus retaining at most `capacity` dispatched events
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                queue: std::sync::Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                accepting: AtomicBool::new(true),
                seq: AtomicU64::new(0),
                next_sub_id: AtomicU64::new(1),
                handlers: std::sync::RwLock::new(Handlers {
                    by_type: HashMap::new(),
                    wildcard: Vec::new(),
                }),
                history: std::sync::Mutex::new(VecDeque::new()),
                history_capacity: capacity,
            }),
            consumer: tokio::sync::Mutex::new(None),
        }
    }

    /// Subscribe a handler to one event type
    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let mut handlers = self.inner.handlers.write().expect("bus handlers poisoned");
        handlers.by_type.entry(event_type).or_default().push((id, handler));
        debug!(%event_type, sub_id = id, "EventBus::subscribe");
        SubscriptionId(id)
    }

    /// Subscribe a handler to every event type
    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let mut handlers = self.inner.handlers.write().expect("bus handlers poisoned");
        handlers.wildcard.push((id, handler));
        debug!(sub_id = id, "EventBus::subscribe_all");
        SubscriptionId(id)
    }

    /// Remove a subscription
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut handlers = self.inner.handlers.write().expect("bus handlers poisoned");
        for subs in handlers.by_type.values_mut() {
            subs.retain(|(sub_id, _)| *sub_id != id.0);
        }
        handlers.wildcard.retain(|(sub_id, _)| *sub_id != id.0);
    }

    /// Enqueue an event; returns immediately, no backpressure
    ///
    /// After `stop()` this is a silent drop.
    pub fn emit(&self, event: Event) {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            debug!(event_type = %event.event_type, "EventBus::emit: bus stopped, dropping event");
            return;
        }
        debug!(
            event_type = %event.event_type,
            event_id = %event.id,
            task_id = event.task_id.as_deref().unwrap_or("-"),
            "EventBus::emit"
        );
        self.inner.push(event);
    }

    /// Launch the consumption loop
    pub async fn start(&self) {
        let mut consumer = self.consumer.lock().await;
        if consumer.is_some() {
            warn!("EventBus::start: already running");
            return;
        }
        let inner = Arc::clone(&self.inner);
        *consumer = Some(tokio::spawn(consume_loop(inner)));
        debug!("EventBus::start: consumer launched");
    }

    /// Stop accepting events, enqueue the shutdown sentinel, and await loop exit
    ///
    /// The sentinel carries the lowest possible priority so already-queued
    /// events drain first.
    pub async fn stop(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.push(Event::new(EventType::Shutdown, "bus").with_priority(u16::MAX));
        let handle = self.consumer.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "EventBus::stop: consumer task failed");
        }
        debug!("EventBus::stop: consumer stopped");
    }

    /// Snapshot of dispatched events, oldest first
    pub fn history(&self) -> Vec<Event> {
        self.inner
            .history
            .lock()
            .expect("bus history poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Number of events waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().expect("bus queue poisoned").len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn consume_loop(inner: Arc<BusInner>) {
    debug!("EventBus consumer started");
    loop {
        match inner.pop() {
            Some(event) => {
                if event.event_type == EventType::Shutdown {
                    debug!("EventBus consumer: shutdown sentinel");
                    break;
                }
                dispatch(&inner, event).await;
            }
            None => {
                if !inner.accepting.load(Ordering::SeqCst) {
                    break;
                }
                let _ = tokio::time::timeout(POLL_TIMEOUT, inner.notify.notified()).await;
            }
        }
    }
    debug!("EventBus consumer stopped");
}

/// Fan one event out to its handlers, concurrently, isolating failures
async fn dispatch(inner: &Arc<BusInner>, event: Event) {
    inner.record(&event);

    let handlers = inner.handlers_for(event.event_type);
    if handlers.is_empty() {
        return;
    }

    let joins: Vec<_> = handlers
        .into_iter()
        .map(|handler| {
            let event = event.clone();
            tokio::spawn(async move {
                let name = handler.name().to_string();
                if let Err(e) = handler.handle(event).await {
                    warn!(handler = %name, error = %e, "event handler failed");
                }
            })
        })
        .collect();
    for outcome in futures::future::join_all(joins).await {
        if let Err(e) = outcome {
            warn!(error = %e, "event handler panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every event it sees, in arrival order
    pub(super) struct Recorder {
        seen: Mutex<Vec<Event>>,
    }

    impl Recorder {
        pub(super) fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }

        pub(super) fn ids(&self) -> Vec<String> {
            self.seen.lock().unwrap().iter().map(|e| e.id.clone()).collect()
        }

        pub(super) fn len(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn handle(&self, event: Event) -> eyre::Result<()> {
            self.seen.lock().unwrap().push(event);
            Ok(())
        }
    }

    /// Always fails, to prove errors are isolated
    struct Exploder;

    #[async_trait]
    impl EventHandler for Exploder {
        async fn handle(&self, _event: Event) -> eyre::Result<()> {
            eyre::bail!("boom")
        }
    }

    async fn drain(bus: &EventBus) {
        // The consumer pops serially; wait until the queue is empty and give
        // in-flight handlers a beat to finish.
        for _ in 0..100 {
            if bus.queue_len() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new();
        let recorder = Recorder::new();
        bus.subscribe(EventType::TaskCreated, recorder.clone());
        bus.start().await;

        bus.emit(Event::new(EventType::TaskCreated, "test"));
        drain(&bus).await;

        assert_eq!(recorder.len(), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_priority_ordering_fifo_within_class() {
        let bus = EventBus::new();
        let recorder = Recorder::new();
        bus.subscribe_all(recorder.clone());

        // Queue everything before starting so ordering is fully determined
        // by the heap, not by arrival timing.
        let low1 = Event::new(EventType::ToolCallCompleted, "test"); // 401
        let low2 = Event::new(EventType::ToolCallCompleted, "test"); // 401, after low1
        let high = Event::new(EventType::MessageReceived, "test"); // 100
        let ids = (high.id.clone(), low1.id.clone(), low2.id.clone());

        bus.emit(low1);
        bus.emit(low2);
        bus.emit(high);
        bus.start().await;
        drain(&bus).await;

        assert_eq!(recorder.ids(), vec![ids.0, ids.1, ids.2]);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_explicit_priority_beats_type_code() {
        let bus = EventBus::new();
        let recorder = Recorder::new();
        bus.subscribe_all(recorder.clone());

        let normal = Event::new(EventType::MessageReceived, "test"); // 100
        let urgent = Event::new(EventType::ToolCallCompleted, "test").with_priority(1);
        let ids = (urgent.id.clone(), normal.id.clone());

        bus.emit(normal);
        bus.emit(urgent);
        bus.start().await;
        drain(&bus).await;

        assert_eq!(recorder.ids(), vec![ids.0, ids.1]);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_handler_error_is_isolated() {
        let bus = EventBus::new();
        let recorder = Recorder::new();
        bus.subscribe(EventType::TaskCreated, Arc::new(Exploder));
        bus.subscribe(EventType::TaskCreated, recorder.clone());
        bus.start().await;

        bus.emit(Event::new(EventType::TaskCreated, "test"));
        bus.emit(Event::new(EventType::TaskCreated, "test"));
        drain(&bus).await;

        // The failing handler never prevented the peer or the loop
        assert_eq!(recorder.len(), 2);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_wildcard_and_specific_both_invoked() {
        let bus = EventBus::new();
        let wildcard = Recorder::new();
        let specific = Recorder::new();
        bus.subscribe_all(wildcard.clone());
        bus.subscribe(EventType::ReasonDone, specific.clone());
        bus.start().await;

        bus.emit(Event::new(EventType::ReasonDone, "test"));
        bus.emit(Event::new(EventType::TaskCreated, "test"));
        drain(&bus).await;

        assert_eq!(wildcard.len(), 2);
        assert_eq!(specific.len(), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let recorder = Recorder::new();
        let sub = bus.subscribe(EventType::TaskCreated, recorder.clone());
        bus.start().await;

        bus.emit(Event::new(EventType::TaskCreated, "test"));
        drain(&bus).await;
        bus.unsubscribe(sub);
        bus.emit(Event::new(EventType::TaskCreated, "test"));
        drain(&bus).await;

        assert_eq!(recorder.len(), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_emit_after_stop_is_dropped() {
        let bus = EventBus::new();
        let recorder = Recorder::new();
        bus.subscribe_all(recorder.clone());
        bus.start().await;
        bus.stop().await;

        bus.emit(Event::new(EventType::TaskCreated, "test"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(recorder.len(), 0);
        assert_eq!(bus.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_stop_drains_queued_events_first() {
        let bus = EventBus::new();
        let recorder = Recorder::new();
        bus.subscribe_all(recorder.clone());

        bus.emit(Event::new(EventType::TaskCreated, "test"));
        bus.emit(Event::new(EventType::ReasonDone, "test"));
        bus.start().await;
        bus.stop().await;

        // The sentinel has the lowest priority, so both queued events were
        // dispatched before the loop exited.
        assert_eq!(recorder.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_prompt() {
        let bus = EventBus::new();
        bus.start().await;
        let started = std::time::Instant::now();
        bus.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_history_records_dispatched_events() {
        let bus = EventBus::with_history_capacity(2);
        bus.start().await;

        bus.emit(Event::new(EventType::TaskCreated, "a").with_payload(json!({"n": 1})));
        bus.emit(Event::new(EventType::TaskCreated, "b"));
        bus.emit(Event::new(EventType::TaskCreated, "c"));
        drain(&bus).await;

        let history = bus.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].source, "b");
        assert_eq!(history[1].source, "c");
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_handlers_run_concurrently_per_event() {
        // Two handlers each sleeping 50ms must complete in well under 100ms
        // if they run concurrently.
        struct Sleeper;

        #[async_trait]
        impl EventHandler for Sleeper {
            async fn handle(&self, _event: Event) -> eyre::Result<()> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }
        }

        let bus = EventBus::new();
        bus.subscribe(EventType::TaskCreated, Arc::new(Sleeper));
        bus.subscribe(EventType::TaskCreated, Arc::new(Sleeper));
        bus.start().await;

        let started = std::time::Instant::now();
        bus.emit(Event::new(EventType::TaskCreated, "test"));
        drain(&bus).await;
        bus.stop().await;

        assert!(started.elapsed() < Duration::from_millis(200));
    }
}
