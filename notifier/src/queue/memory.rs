//! In-process broker used by the tests.
//!
//! Mirrors the parts of RabbitMQ the pipeline relies on: durable named queues,
//! per-consumer prefetch, ack, nack with requeue, reject, and connections that
//! can be killed to exercise reconnects.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Notify;

use super::{Acker, BrokerError, BrokerResult, Channel, Connector, Deliveries, Delivery};

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(Vec<u8>, bool)>,
    unacked: HashMap<u64, Vec<u8>>,
    rejected: Vec<Vec<u8>>,
    acked: usize,
}

#[derive(Default)]
struct Shared {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
    next_tag: AtomicU64,
    generation: AtomicU64,
    connects: AtomicUsize,
    failing_connects: AtomicUsize,
}

/// Handle on the in-process broker; clones share the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of successfully opened connections.
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.shared.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Drop every open connection, as if the broker went away.
    pub fn kill_connections(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    pub fn is_declared(&self, queue: &str) -> bool {
        self.shared.queues.lock().unwrap().contains_key(queue)
    }

    /// Enqueue a raw body, bypassing serialization.
    pub fn push_raw(&self, queue: &str, body: impl Into<Vec<u8>>) {
        self.shared
            .queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back((body.into(), false));
        self.shared.notify.notify_waiters();
    }

    /// Bodies waiting for delivery, oldest first.
    pub fn ready(&self, queue: &str) -> Vec<Vec<u8>> {
        self.with_queue(queue, |q| q.ready.iter().map(|(body, _)| body.clone()).collect())
    }

    /// Ready plus delivered-but-unacknowledged messages.
    pub fn message_count(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.ready.len() + q.unacked.len())
    }

    pub fn unacked(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.unacked.len())
    }

    pub fn acked(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.acked)
    }

    pub fn rejected(&self, queue: &str) -> Vec<Vec<u8>> {
        self.with_queue(queue, |q| q.rejected.clone())
    }

    fn with_queue<T: Default>(&self, queue: &str, f: impl FnOnce(&QueueState) -> T) -> T {
        self.shared
            .queues
            .lock()
            .unwrap()
            .get(queue)
            .map(f)
            .unwrap_or_default()
    }
}

pub struct MemoryConnector {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> BrokerResult<Arc<dyn Channel>> {
        // Widen the window for concurrent callers
        tokio::time::sleep(Duration::from_millis(5)).await;

        let failing = self.shared.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.shared.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(BrokerError::Connect("connection refused".to_string()));
        }

        self.shared.connects.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MemoryChannel {
            shared: Arc::clone(&self.shared),
            generation: self.shared.generation.load(Ordering::SeqCst),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct MemoryChannel {
    shared: Arc<Shared>,
    generation: u64,
    closed: Arc<AtomicBool>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> BrokerResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::Closed)
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.generation == self.shared.generation.load(Ordering::SeqCst)
    }

    async fn declare_queue(&self, queue: &str) -> BrokerResult<()> {
        self.ensure_open()?;
        self.shared
            .queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> BrokerResult<()> {
        self.ensure_open()?;
        self.shared
            .queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back((body.to_vec(), false));
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
        prefetch: u16,
    ) -> BrokerResult<Deliveries> {
        self.ensure_open()?;

        let consumer = MemoryConsumer {
            shared: Arc::clone(&self.shared),
            queue: queue.to_string(),
            generation: self.generation,
            closed: Arc::clone(&self.closed),
            prefetch: usize::from(prefetch.max(1)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        };

        let deliveries = futures::stream::unfold(consumer, |consumer| async move {
            loop {
                let shared = Arc::clone(&consumer.shared);
                let notified = shared.notify.notified();
                match consumer.take_next() {
                    Next::Delivery(delivery) => {
                        return Some((Ok::<_, BrokerError>(delivery), consumer))
                    }
                    Next::Closed => return None,
                    Next::Wait => notified.await,
                }
            }
        });

        Ok(deliveries.boxed())
    }

    async fn close(&self) -> BrokerResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

enum Next {
    Delivery(Delivery),
    Closed,
    Wait,
}

struct MemoryConsumer {
    shared: Arc<Shared>,
    queue: String,
    generation: u64,
    closed: Arc<AtomicBool>,
    prefetch: usize,
    in_flight: Arc<AtomicUsize>,
}

impl MemoryConsumer {
    fn take_next(&self) -> Next {
        if self.closed.load(Ordering::SeqCst)
            || self.generation != self.shared.generation.load(Ordering::SeqCst)
        {
            return Next::Closed;
        }

        if self.in_flight.load(Ordering::SeqCst) >= self.prefetch {
            return Next::Wait;
        }

        let mut queues = self.shared.queues.lock().unwrap();
        let state = queues.entry(self.queue.clone()).or_default();

        let Some((body, redelivered)) = state.ready.pop_front() else {
            return Next::Wait;
        };

        let tag = self.shared.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        state.unacked.insert(tag, body.clone());
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        Next::Delivery(Delivery::new(
            tag,
            redelivered,
            body,
            Box::new(MemoryAcker {
                shared: Arc::clone(&self.shared),
                queue: self.queue.clone(),
                tag,
                in_flight: Arc::clone(&self.in_flight),
            }),
        ))
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    tag: u64,
    in_flight: Arc<AtomicUsize>,
}

impl MemoryAcker {
    fn settle(&self, outcome: impl FnOnce(&mut QueueState, Vec<u8>)) -> BrokerResult<()> {
        {
            let mut queues = self.shared.queues.lock().unwrap();
            let state = queues.entry(self.queue.clone()).or_default();
            let body = state.unacked.remove(&self.tag).ok_or(BrokerError::Settle {
                delivery_tag: self.tag,
                reason: "unknown delivery tag".to_string(),
            })?;
            outcome(state, body);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> BrokerResult<()> {
        self.settle(|state, _| state.acked += 1)
    }

    async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        self.settle(|state, body| {
            if requeue {
                state.ready.push_back((body, true));
            } else {
                state.rejected.push(body);
            }
        })
    }
}
