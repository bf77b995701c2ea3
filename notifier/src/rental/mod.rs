//! Rental data read by the notification pipeline.
//!
//! The pipeline only needs three collaborators: the rental store (overdue
//! lookup and batch status update) and the book and person lookups used to
//! enrich notifications. Persistence lives behind these traits.

pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryStore;

pub type RentalId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RentalStatus {
    Active,
    Returned,
    Overdue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rental {
    pub id: RentalId,
    pub book_id: String,
    pub person_id: String,
    pub rental_date: NaiveDateTime,
    pub due_date: NaiveDateTime,
    #[serde(default)]
    pub return_date: Option<NaiveDateTime>,
    pub status: RentalStatus,
}

impl Rental {
    /// Past its due date and still out.
    pub fn is_overdue_at(&self, now: NaiveDateTime) -> bool {
        self.status == RentalStatus::Active && self.due_date < now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store query failed: {0}")]
    Query(String),
}

#[async_trait]
pub trait RentalStore: Send + Sync {
    /// Rentals with `due_date < now` whose status is still `active`.
    async fn find_overdue_active_rentals(&self, now: NaiveDateTime)
        -> Result<Vec<Rental>, StoreError>;

    /// Set status `overdue` on every listed rental in one batch.
    /// Returns how many rentals actually changed.
    async fn mark_overdue(&self, ids: &[RentalId]) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait BookDirectory: Send + Sync {
    async fn get_book(&self, id: &str) -> Result<Option<Book>, StoreError>;
}

#[async_trait]
pub trait PersonDirectory: Send + Sync {
    async fn get_person(&self, id: &str) -> Result<Option<Person>, StoreError>;
}
