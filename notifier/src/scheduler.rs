//! Periodic overdue-rental check.
//!
//! Each tick finds active rentals past their due date, publishes one
//! `overdue` notification per rental and then marks them all overdue in a
//! single batch. A failed tick is retried after a short delay instead of the
//! normal interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::queue::{BrokerError, OverdueNotice, Queue, RentalNotification};
use crate::rental::{BookDirectory, PersonDirectory, RentalId, RentalStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Sleep after a successful tick
    pub tick_interval: Duration,
    /// Sleep after a failed tick
    pub retry_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(3600),
            retry_interval: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: Duration::from_secs(config.scheduler_interval_secs),
            retry_interval: Duration::from_secs(config.scheduler_retry_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug, Error)]
pub enum TickError {
    #[error("rental store error: {0}")]
    Store(#[from] StoreError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Outcome of one successful tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub published: usize,
    pub marked: u64,
}

pub struct NotificationScheduler {
    rentals: Arc<dyn RentalStore>,
    books: Arc<dyn BookDirectory>,
    people: Arc<dyn PersonDirectory>,
    queue: Arc<Queue>,
    config: SchedulerConfig,
    running: AtomicBool,
}

impl NotificationScheduler {
    pub fn new(
        rentals: Arc<dyn RentalStore>,
        books: Arc<dyn BookDirectory>,
        people: Arc<dyn PersonDirectory>,
        queue: Arc<Queue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            rentals,
            books,
            people,
            queue,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Run ticks until [`stop`](Self::stop) is called.
    ///
    /// The flag is checked before each tick, so a stop request takes effect
    /// once the current tick and its sleep have finished. Drop or abort the
    /// future to stop sooner.
    pub async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            tick_interval_secs = self.config.tick_interval.as_secs(),
            retry_interval_secs = self.config.retry_interval.as_secs(),
            "notification_scheduler_started"
        );

        while self.running.load(Ordering::SeqCst) {
            match self.tick().await {
                Ok(report) => {
                    info!(
                        published = report.published,
                        marked = report.marked,
                        checked_at = %Local::now().naive_local(),
                        "notification_check_completed"
                    );
                    tokio::time::sleep(self.config.tick_interval).await;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in_secs = self.config.retry_interval.as_secs(),
                        "notification_check_failed"
                    );
                    tokio::time::sleep(self.config.retry_interval).await;
                }
            }
        }

        info!("notification_scheduler_exited");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("notification_scheduler_stopped");
    }

    /// One check against the local wall clock.
    pub async fn tick(&self) -> Result<TickReport, TickError> {
        self.tick_at(Local::now().naive_local()).await
    }

    /// One check as of `now`.
    ///
    /// Rentals are marked overdue only after every notification was
    /// published; a publish failure leaves them active for the next tick.
    pub async fn tick_at(&self, now: NaiveDateTime) -> Result<TickReport, TickError> {
        let overdue = self.rentals.find_overdue_active_rentals(now).await?;
        if overdue.is_empty() {
            return Ok(TickReport::default());
        }

        let mut ids: Vec<RentalId> = Vec::with_capacity(overdue.len());
        for rental in &overdue {
            let book = self.books.get_book(&rental.book_id).await?;
            let person = self.people.get_person(&rental.person_id).await?;

            let notification = RentalNotification::Overdue(OverdueNotice {
                rental_id: rental.id.clone(),
                book_title: book.map(|b| b.title),
                person_name: person.as_ref().map(|p| p.name.clone()),
                person_email: person.map(|p| p.email),
                due_date: rental.due_date,
                rental_date: rental.rental_date,
                timestamp: now,
            });

            self.queue.publish(&notification).await?;
            ids.push(rental.id.clone());
        }

        let marked = self.rentals.mark_overdue(&ids).await?;

        Ok(TickReport {
            published: ids.len(),
            marked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::MemoryBroker;
    use crate::queue::BrokerConnection;
    use crate::rental::{Book, InMemoryStore, Person, Rental, RentalStatus};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    const QUEUE: &str = "test_notifications";

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn rental(id: &str, book_id: &str, person_id: &str) -> Rental {
        Rental {
            id: id.to_string(),
            book_id: book_id.to_string(),
            person_id: person_id.to_string(),
            rental_date: NaiveDate::from_ymd_opt(2023, 12, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            due_date: day(1),
            return_date: None,
            status: RentalStatus::Active,
        }
    }

    async fn queue(broker: &MemoryBroker) -> Arc<Queue> {
        let connection = Arc::new(BrokerConnection::new(broker.connector()));
        Arc::new(Queue::declare(connection, QUEUE).await.unwrap())
    }

    fn scheduler(store: Arc<InMemoryStore>, queue: Arc<Queue>) -> NotificationScheduler {
        NotificationScheduler::new(
            store.clone(),
            store.clone(),
            store,
            queue,
            SchedulerConfig::default(),
        )
    }

    fn published(broker: &MemoryBroker) -> Vec<Value> {
        broker
            .ready(QUEUE)
            .iter()
            .map(|body| serde_json::from_slice(body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_tick_publishes_and_marks_overdue_rental() {
        let broker = MemoryBroker::new();
        let store = Arc::new(InMemoryStore::new());
        store.insert_rental(rental("r-1", "b-1", "p-1")).await;
        store
            .insert_book(Book {
                id: "b-1".to_string(),
                title: "X".to_string(),
                author: "Y".to_string(),
                description: None,
                isbn: None,
                genre: None,
            })
            .await;
        store
            .insert_person(Person {
                id: "p-1".to_string(),
                name: "Ada".to_string(),
                email: "a@example.com".to_string(),
                age: None,
                phone: None,
                address: None,
            })
            .await;

        let scheduler = scheduler(store.clone(), queue(&broker).await);
        let report = scheduler.tick_at(day(10)).await.unwrap();

        assert_eq!(report, TickReport { published: 1, marked: 1 });
        assert_eq!(
            published(&broker),
            vec![json!({
                "type": "overdue",
                "rental_id": "r-1",
                "book_title": "X",
                "person_name": "Ada",
                "person_email": "a@example.com",
                "due_date": "2024-01-01T00:00:00",
                "rental_date": "2023-12-01T00:00:00",
                "timestamp": "2024-01-10T00:00:00",
            })]
        );
        assert_eq!(store.rental("r-1").await.unwrap().status, RentalStatus::Overdue);
    }

    #[tokio::test]
    async fn test_one_message_per_rental_then_nothing_left() {
        let broker = MemoryBroker::new();
        let store = Arc::new(InMemoryStore::new());
        for id in ["r-1", "r-2", "r-3"] {
            store.insert_rental(rental(id, "b", "p")).await;
        }

        let scheduler = scheduler(store.clone(), queue(&broker).await);

        let first = scheduler.tick_at(day(10)).await.unwrap();
        let second = scheduler.tick_at(day(11)).await.unwrap();

        assert_eq!(first, TickReport { published: 3, marked: 3 });
        assert_eq!(second, TickReport::default());
        assert_eq!(broker.message_count(QUEUE), 3);
    }

    /// Delegates to an [`InMemoryStore`] and records every `mark_overdue` batch.
    struct RecordingStore {
        inner: Arc<InMemoryStore>,
        marks: std::sync::Mutex<Vec<Vec<RentalId>>>,
    }

    impl RecordingStore {
        fn marks(&self) -> Vec<Vec<RentalId>> {
            self.marks.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RentalStore for RecordingStore {
        async fn find_overdue_active_rentals(
            &self,
            now: NaiveDateTime,
        ) -> Result<Vec<Rental>, StoreError> {
            self.inner.find_overdue_active_rentals(now).await
        }

        async fn mark_overdue(&self, ids: &[RentalId]) -> Result<u64, StoreError> {
            self.marks.lock().unwrap().push(ids.to_vec());
            self.inner.mark_overdue(ids).await
        }
    }

    async fn recording_scheduler(
        broker: &MemoryBroker,
        store: Arc<InMemoryStore>,
    ) -> (NotificationScheduler, Arc<RecordingStore>) {
        let recording = Arc::new(RecordingStore {
            inner: store.clone(),
            marks: std::sync::Mutex::new(Vec::new()),
        });
        let scheduler = NotificationScheduler::new(
            recording.clone(),
            store.clone(),
            store,
            queue(broker).await,
            SchedulerConfig::default(),
        );
        (scheduler, recording)
    }

    #[tokio::test]
    async fn test_empty_tick_publishes_and_updates_nothing() {
        let broker = MemoryBroker::new();
        let store = Arc::new(InMemoryStore::new());
        let mut not_due = rental("r-1", "b", "p");
        not_due.due_date = day(20);
        store.insert_rental(not_due).await;

        let (scheduler, recording) = recording_scheduler(&broker, store.clone()).await;
        let report = scheduler.tick_at(day(10)).await.unwrap();

        assert_eq!(report, TickReport::default());
        assert_eq!(broker.message_count(QUEUE), 0);
        assert!(recording.marks().is_empty());
        assert_eq!(store.rental("r-1").await.unwrap().status, RentalStatus::Active);
    }

    #[tokio::test]
    async fn test_overdue_rentals_are_marked_in_one_batch() {
        let broker = MemoryBroker::new();
        let store = Arc::new(InMemoryStore::new());
        for id in ["r-1", "r-2", "r-3"] {
            store.insert_rental(rental(id, "b", "p")).await;
        }

        let (scheduler, recording) = recording_scheduler(&broker, store).await;
        scheduler.tick_at(day(10)).await.unwrap();

        let mut marks = recording.marks();
        assert_eq!(marks.len(), 1);
        marks[0].sort();
        assert_eq!(marks[0], ["r-1", "r-2", "r-3"]);
    }

    #[tokio::test]
    async fn test_missing_book_and_person_leave_fields_absent() {
        let broker = MemoryBroker::new();
        let store = Arc::new(InMemoryStore::new());
        store.insert_rental(rental("r-1", "gone", "gone")).await;

        let scheduler = scheduler(store.clone(), queue(&broker).await);
        scheduler.tick_at(day(10)).await.unwrap();

        let message = &published(&broker)[0];
        assert_eq!(message["rental_id"], "r-1");
        assert!(message.get("book_title").is_none());
        assert!(message.get("person_name").is_none());
        assert!(message.get("person_email").is_none());
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_rentals_active() {
        let broker = MemoryBroker::new();
        let store = Arc::new(InMemoryStore::new());
        store.insert_rental(rental("r-1", "b", "p")).await;

        let scheduler = scheduler(store.clone(), queue(&broker).await);
        broker.kill_connections();
        broker.fail_next_connects(1);

        let result = scheduler.tick_at(day(10)).await;

        assert!(matches!(result, Err(TickError::Broker(_))));
        assert_eq!(store.rental("r-1").await.unwrap().status, RentalStatus::Active);

        // Next tick reconnects and catches up
        let report = scheduler.tick_at(day(10)).await.unwrap();
        assert_eq!(report.marked, 1);
    }

    /// Store that fails the first `failures` lookups and reports each call.
    struct FlakyStore {
        calls: AtomicUsize,
        failures: usize,
        ticks: mpsc::UnboundedSender<Instant>,
    }

    #[async_trait]
    impl RentalStore for FlakyStore {
        async fn find_overdue_active_rentals(
            &self,
            _now: NaiveDateTime,
        ) -> Result<Vec<Rental>, StoreError> {
            let _ = self.ticks.send(Instant::now());
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(StoreError::Unavailable("database down".to_string()));
            }
            Ok(Vec::new())
        }

        async fn mark_overdue(&self, _ids: &[RentalId]) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    async fn flaky_scheduler(
        failures: usize,
    ) -> (Arc<NotificationScheduler>, mpsc::UnboundedReceiver<Instant>) {
        let broker = MemoryBroker::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let directory = Arc::new(InMemoryStore::new());
        let scheduler = NotificationScheduler::new(
            Arc::new(FlakyStore {
                calls: AtomicUsize::new(0),
                failures,
                ticks: tx,
            }),
            directory.clone(),
            directory,
            queue(&broker).await,
            SchedulerConfig::default(),
        );
        (Arc::new(scheduler), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_retries_sooner() {
        let (scheduler, mut ticks) = flaky_scheduler(1).await;

        let runner = Arc::clone(&scheduler);
        let task = tokio::spawn(async move { runner.start().await });

        let failed = ticks.recv().await.unwrap();
        let recovered = ticks.recv().await.unwrap();
        let steady = ticks.recv().await.unwrap();

        let retry = recovered - failed;
        let interval = steady - recovered;
        assert!(retry >= Duration::from_secs(60) && retry < Duration::from_secs(61));
        assert!(interval >= Duration::from_secs(3600) && interval < Duration::from_secs(3601));

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_loop_after_current_sleep() {
        let (scheduler, mut ticks) = flaky_scheduler(0).await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        let runner = Arc::clone(&scheduler);
        let task = tokio::spawn(async move { runner.start().await });

        ticks.recv().await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);

        scheduler.stop();
        task.await.unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(ticks.try_recv().is_err());
    }
}
