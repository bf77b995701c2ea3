//! In-memory implementation of the rental collaborators.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::RwLock;

use super::{
    Book, BookDirectory, Person, PersonDirectory, Rental, RentalId, RentalStatus, RentalStore,
    StoreError,
};

/// Rentals, books and people held in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    rentals: RwLock<Vec<Rental>>,
    books: RwLock<HashMap<String, Book>>,
    people: RwLock<HashMap<String, Person>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rental.
    pub async fn insert_rental(&self, rental: Rental) {
        let mut rentals = self.rentals.write().await;
        match rentals.iter_mut().find(|existing| existing.id == rental.id) {
            Some(existing) => *existing = rental,
            None => rentals.push(rental),
        }
    }

    pub async fn insert_book(&self, book: Book) {
        self.books.write().await.insert(book.id.clone(), book);
    }

    pub async fn insert_person(&self, person: Person) {
        self.people.write().await.insert(person.id.clone(), person);
    }

    pub async fn rental(&self, id: &str) -> Option<Rental> {
        self.rentals
            .read()
            .await
            .iter()
            .find(|rental| rental.id == id)
            .cloned()
    }
}

#[async_trait]
impl RentalStore for InMemoryStore {
    async fn find_overdue_active_rentals(
        &self,
        now: NaiveDateTime,
    ) -> Result<Vec<Rental>, StoreError> {
        Ok(self
            .rentals
            .read()
            .await
            .iter()
            .filter(|rental| rental.is_overdue_at(now))
            .cloned()
            .collect())
    }

    async fn mark_overdue(&self, ids: &[RentalId]) -> Result<u64, StoreError> {
        let mut modified = 0;
        for rental in self.rentals.write().await.iter_mut() {
            if ids.contains(&rental.id) && rental.status != RentalStatus::Overdue {
                rental.status = RentalStatus::Overdue;
                modified += 1;
            }
        }
        Ok(modified)
    }
}

#[async_trait]
impl BookDirectory for InMemoryStore {
    async fn get_book(&self, id: &str) -> Result<Option<Book>, StoreError> {
        Ok(self.books.read().await.get(id).cloned())
    }
}

#[async_trait]
impl PersonDirectory for InMemoryStore {
    async fn get_person(&self, id: &str) -> Result<Option<Person>, StoreError> {
        Ok(self.people.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn rental(id: &str, due: u32, status: RentalStatus) -> Rental {
        Rental {
            id: id.to_string(),
            book_id: "b".to_string(),
            person_id: "p".to_string(),
            rental_date: day(1),
            due_date: day(due),
            return_date: None,
            status,
        }
    }

    #[tokio::test]
    async fn test_find_overdue_filters_by_due_date_and_status() {
        let store = InMemoryStore::new();
        store.insert_rental(rental("late", 5, RentalStatus::Active)).await;
        store.insert_rental(rental("due-now", 10, RentalStatus::Active)).await;
        store.insert_rental(rental("future", 20, RentalStatus::Active)).await;
        store.insert_rental(rental("returned", 5, RentalStatus::Returned)).await;
        store.insert_rental(rental("flagged", 5, RentalStatus::Overdue)).await;

        let overdue = store.find_overdue_active_rentals(day(10)).await.unwrap();

        let ids: Vec<_> = overdue.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["late"]);
    }

    #[tokio::test]
    async fn test_mark_overdue_counts_changed_rentals() {
        let store = InMemoryStore::new();
        store.insert_rental(rental("a", 5, RentalStatus::Active)).await;
        store.insert_rental(rental("b", 5, RentalStatus::Overdue)).await;
        store.insert_rental(rental("c", 5, RentalStatus::Active)).await;

        let modified = store
            .mark_overdue(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(modified, 1);
        assert_eq!(store.rental("a").await.unwrap().status, RentalStatus::Overdue);
        assert_eq!(store.rental("c").await.unwrap().status, RentalStatus::Active);
    }

    #[tokio::test]
    async fn test_lookups_return_none_when_missing() {
        let store = InMemoryStore::new();
        assert!(store.get_book("nope").await.unwrap().is_none());
        assert!(store.get_person("nope").await.unwrap().is_none());
    }
}
