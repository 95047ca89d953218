use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::RideStore;
use crate::api::Page;
use crate::entities::{Driver, Rating, Ride, RideRequest, RideStatus};
use crate::error::{conflict_error, Error};

#[derive(Default)]
struct Tables {
    rides: HashMap<Uuid, Ride>,
    requests: HashMap<Uuid, RideRequest>,
    drivers: HashMap<Uuid, Driver>,
    ratings: HashMap<(Uuid, Uuid), Rating>,
}

impl Tables {
    fn active_for(&self, actor_id: Uuid) -> impl Iterator<Item = &Ride> {
        self.rides
            .values()
            .filter(move |ride| !ride.status.is_terminal() && ride.is_participant(actor_id))
    }
}

/// In-process store. A single lock around all tables makes every trait
/// operation atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RideStore for MemoryStore {
    async fn insert_ride(&self, ride: &Ride, request: &RideRequest) -> Result<bool, Error> {
        let mut tables = self.tables.lock().await;

        let rider_busy = tables
            .active_for(ride.rider_id)
            .any(|active| active.rider_id == ride.rider_id);

        if rider_busy {
            return Ok(false);
        }

        tables.rides.insert(ride.id, ride.clone());
        tables.requests.insert(request.id, request.clone());

        Ok(true)
    }

    async fn find_ride(&self, id: Uuid) -> Result<Option<Ride>, Error> {
        Ok(self.tables.lock().await.rides.get(&id).cloned())
    }

    async fn find_ride_by_request(&self, request_id: Uuid) -> Result<Option<Ride>, Error> {
        let tables = self.tables.lock().await;

        Ok(tables
            .rides
            .values()
            .find(|ride| ride.request_id == request_id)
            .cloned())
    }

    async fn find_active_ride(&self, actor_id: Uuid) -> Result<Option<Ride>, Error> {
        let tables = self.tables.lock().await;

        Ok(tables
            .active_for(actor_id)
            .max_by_key(|ride| ride.created_at)
            .cloned())
    }

    async fn list_history(&self, actor_id: Uuid, page: Page) -> Result<Vec<Ride>, Error> {
        let (offset, limit) = page.window();
        let tables = self.tables.lock().await;

        let mut rides: Vec<Ride> = tables
            .rides
            .values()
            .filter(|ride| ride.status.is_terminal() && ride.is_participant(actor_id))
            .cloned()
            .collect();

        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(rides
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn list_completed_rides(&self, driver_id: Uuid) -> Result<Vec<Ride>, Error> {
        let tables = self.tables.lock().await;

        let mut rides: Vec<Ride> = tables
            .rides
            .values()
            .filter(|ride| ride.status == RideStatus::Completed && ride.is_driver(driver_id))
            .cloned()
            .collect();

        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(rides)
    }

    async fn compare_and_swap(&self, expected: RideStatus, ride: &Ride) -> Result<bool, Error> {
        let mut tables = self.tables.lock().await;

        match tables.rides.get(&ride.id) {
            Some(stored) if stored.status == expected => (),
            _ => return Ok(false),
        };

        if let Some(driver_id) = ride.driver_id {
            let driver_busy = !ride.status.is_terminal()
                && tables
                    .active_for(driver_id)
                    .any(|active| active.id != ride.id && active.is_driver(driver_id));

            if driver_busy {
                return Err(conflict_error("Driver already has an active ride"));
            }
        }

        if ride.status != RideStatus::Requested {
            tables.requests.remove(&ride.request_id);
        }

        tables.rides.insert(ride.id, ride.clone());

        Ok(true)
    }

    async fn find_request(&self, request_id: Uuid) -> Result<Option<RideRequest>, Error> {
        Ok(self.tables.lock().await.requests.get(&request_id).cloned())
    }

    async fn list_open_requests(
        &self,
        driver_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RideRequest>, Error> {
        let tables = self.tables.lock().await;

        let mut requests: Vec<RideRequest> = tables
            .requests
            .values()
            .filter(|request| request.is_open_for(driver_id, now))
            .cloned()
            .collect();

        requests.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));

        Ok(requests)
    }

    async fn list_expired_requests(&self, now: DateTime<Utc>) -> Result<Vec<RideRequest>, Error> {
        let tables = self.tables.lock().await;

        Ok(tables
            .requests
            .values()
            .filter(|request| request.is_expired(now))
            .cloned()
            .collect())
    }

    async fn add_decline(&self, request_id: Uuid, driver_id: Uuid) -> Result<bool, Error> {
        let mut tables = self.tables.lock().await;

        match tables.requests.get_mut(&request_id) {
            Some(request) => {
                request.decline(driver_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_seen(&self, request_ids: &[Uuid], driver_id: Uuid) -> Result<(), Error> {
        let mut tables = self.tables.lock().await;

        for id in request_ids {
            if let Some(request) = tables.requests.get_mut(id) {
                request.mark_seen(driver_id);
            }
        }

        Ok(())
    }

    async fn find_driver(&self, id: Uuid) -> Result<Option<Driver>, Error> {
        Ok(self.tables.lock().await.drivers.get(&id).cloned())
    }

    async fn save_driver(&self, driver: &Driver) -> Result<(), Error> {
        self.tables
            .lock()
            .await
            .drivers
            .insert(driver.id, driver.clone());

        Ok(())
    }

    async fn insert_rating(&self, rating: &Rating) -> Result<bool, Error> {
        let mut tables = self.tables.lock().await;
        let key = (rating.ride_id, rating.rater_id);

        if tables.ratings.contains_key(&key) {
            return Ok(false);
        }

        tables.ratings.insert(key, rating.clone());

        Ok(true)
    }

    async fn has_rated(&self, ride_id: Uuid, rater_id: Uuid) -> Result<bool, Error> {
        let tables = self.tables.lock().await;

        Ok(tables.ratings.contains_key(&(ride_id, rater_id)))
    }
}

#[cfg(test)]
fn requested_ride() -> (Ride, RideRequest) {
    let ride = crate::entities::ride::sample_ride();
    let request = RideRequest::new(&ride, chrono::Duration::minutes(5));

    (ride, request)
}

#[test]
fn compare_and_swap_only_from_expected_status() {
    tokio_test::block_on(async {
        let store = MemoryStore::new();
        let (ride, request) = requested_ride();
        assert!(store.insert_ride(&ride, &request).await.unwrap());

        let mut accepted = ride.clone();
        accepted.accept(Uuid::new_v4(), "1234".into()).unwrap();

        assert!(store
            .compare_and_swap(RideStatus::Requested, &accepted)
            .await
            .unwrap());
        assert!(store.find_request(request.id).await.unwrap().is_none());

        let mut rival = ride.clone();
        rival.accept(Uuid::new_v4(), "9999".into()).unwrap();

        assert!(!store
            .compare_and_swap(RideStatus::Requested, &rival)
            .await
            .unwrap());

        let stored = store.find_ride(ride.id).await.unwrap().unwrap();
        assert_eq!(stored.driver_id, accepted.driver_id);
        assert_eq!(stored.otp.as_deref(), Some("1234"));
    });
}

#[test]
fn one_open_ride_per_rider() {
    tokio_test::block_on(async {
        let store = MemoryStore::new();
        let (ride, request) = requested_ride();
        assert!(store.insert_ride(&ride, &request).await.unwrap());

        let mut second = ride.clone();
        second.id = Uuid::new_v4();
        second.request_id = Uuid::new_v4();
        let second_request = RideRequest::new(&second, chrono::Duration::minutes(5));

        assert!(!store.insert_ride(&second, &second_request).await.unwrap());
        assert!(store.find_ride(second.id).await.unwrap().is_none());
    });
}

#[test]
fn driver_cannot_hold_two_rides() {
    tokio_test::block_on(async {
        let store = MemoryStore::new();
        let driver_id = Uuid::new_v4();

        let (first, first_request) = requested_ride();
        let (second, second_request) = requested_ride();
        store.insert_ride(&first, &first_request).await.unwrap();
        store.insert_ride(&second, &second_request).await.unwrap();

        let mut accepted = first.clone();
        accepted.accept(driver_id, "1111".into()).unwrap();
        assert!(store
            .compare_and_swap(RideStatus::Requested, &accepted)
            .await
            .unwrap());

        let mut greedy = second.clone();
        greedy.accept(driver_id, "2222".into()).unwrap();
        let err = store
            .compare_and_swap(RideStatus::Requested, &greedy)
            .await
            .unwrap_err();

        assert!(err.is_conflict_error());
        assert_eq!(
            store.find_ride(second.id).await.unwrap().unwrap().status,
            RideStatus::Requested
        );
    });
}

#[test]
fn history_is_terminal_and_newest_first() {
    tokio_test::block_on(async {
        let store = MemoryStore::new();
        let rider_id = Uuid::new_v4();
        let mut ids = vec![];

        for offset in 0..3 {
            let (mut ride, _) = requested_ride();
            ride.rider_id = rider_id;
            ride.created_at = ride.created_at + chrono::Duration::seconds(offset);
            let request = RideRequest::new(&ride, chrono::Duration::minutes(5));
            store.insert_ride(&ride, &request).await.unwrap();

            let mut cancelled = ride.clone();
            cancelled.cancel(None, None).unwrap();
            store
                .compare_and_swap(RideStatus::Requested, &cancelled)
                .await
                .unwrap();

            ids.push(ride.id);
        }

        let history = store
            .list_history(rider_id, Page { page: 1, limit: 2 })
            .await
            .unwrap();
        assert_eq!(
            history.iter().map(|ride| ride.id).collect::<Vec<_>>(),
            vec![ids[2], ids[1]]
        );

        let rest = store
            .list_history(rider_id, Page { page: 2, limit: 2 })
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert!(store.find_active_ride(rider_id).await.unwrap().is_none());
    });
}

#[test]
fn declines_hide_requests_from_that_driver_only() {
    tokio_test::block_on(async {
        let store = MemoryStore::new();
        let (ride, request) = requested_ride();
        store.insert_ride(&ride, &request).await.unwrap();

        let now = Utc::now();
        let declining = Uuid::new_v4();
        let other = Uuid::new_v4();

        assert!(store.add_decline(request.id, declining).await.unwrap());
        assert!(store.add_decline(request.id, declining).await.unwrap());
        assert!(!store.add_decline(Uuid::new_v4(), declining).await.unwrap());

        assert!(store
            .list_open_requests(declining, now)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.list_open_requests(other, now).await.unwrap().len(), 1);

        store.mark_seen(&[request.id], other).await.unwrap();
        let stored = store.find_request(request.id).await.unwrap().unwrap();
        assert!(stored.seen_by.contains(&other));
        assert_eq!(stored.declined_by.len(), 1);
    });
}
