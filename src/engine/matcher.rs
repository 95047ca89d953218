use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::db::RideStore;
use crate::entities::{Ride, RideStatus};
use crate::error::{conflict_error, not_found_error, Error};

pub const ALREADY_ACCEPTED: &str = "Already accepted by another driver.";
pub const REQUEST_CANCELLED: &str = "Ride request was cancelled";
pub const REQUEST_EXPIRED: &str = "Ride request expired";

/// Resolves drivers racing over the same ride request.
///
/// The winner is whoever's compare-and-swap on `requested` lands first; every
/// other caller gets a conflict and the stored ride is left as the winner
/// wrote it.
pub struct RequestMatcher {
    store: Arc<dyn RideStore>,
}

pub fn generate_otp() -> String {
    rand::thread_rng().gen_range(1000..10000).to_string()
}

fn conflict_for(ride: &Ride, driver_id: Uuid) -> Error {
    match ride.status {
        RideStatus::Requested => conflict_error("ride request changed, try again"),
        RideStatus::Cancelled if ride.is_expired_request() => conflict_error(REQUEST_EXPIRED),
        RideStatus::Cancelled => conflict_error(REQUEST_CANCELLED),
        _ if ride.is_driver(driver_id) => conflict_error("You already accepted this ride"),
        _ => conflict_error(ALREADY_ACCEPTED),
    }
}

impl RequestMatcher {
    pub fn new(store: Arc<dyn RideStore>) -> Self {
        Self { store }
    }

    /// Assigns `driver_id` to the ride behind `ride`'s request.
    ///
    /// `ride` is the caller's snapshot; the swap only lands if the stored
    /// ride is still `requested`.
    #[tracing::instrument(skip(self, ride), fields(ride_id = %ride.id, request_id = %ride.request_id))]
    pub async fn accept(&self, ride: Ride, driver_id: Uuid) -> Result<Ride, Error> {
        if ride.status != RideStatus::Requested {
            return Err(conflict_for(&ride, driver_id));
        }

        let request = match self.store.find_request(ride.request_id).await? {
            Some(request) => request,
            None => return Err(self.conflict_from_store(&ride, driver_id).await?),
        };

        if request.is_expired(Utc::now()) {
            self.expire(&ride).await?;
            return Err(conflict_error(REQUEST_EXPIRED));
        }

        if request.has_declined(driver_id) {
            return Err(conflict_error("You declined this ride request"));
        }

        if let Some(driver) = self.store.find_driver(driver_id).await? {
            if !driver.is_available() {
                return Err(conflict_error("Go online to accept ride requests"));
            }
        }

        if self.store.find_active_ride(driver_id).await?.is_some() {
            return Err(conflict_error("Driver already has an active ride"));
        }

        let mut accepted = ride.clone();
        accepted.accept(driver_id, generate_otp())?;

        if self
            .store
            .compare_and_swap(RideStatus::Requested, &accepted)
            .await?
        {
            tracing::info!(%driver_id, "ride request accepted");
            return Ok(accepted);
        }

        tracing::info!(%driver_id, "lost the race for ride request");
        Err(self.conflict_from_store(&ride, driver_id).await?)
    }

    /// Records that `driver_id` passed on a request. Never touches the ride.
    #[tracing::instrument(skip(self))]
    pub async fn decline(&self, request_id: Uuid, driver_id: Uuid) -> Result<(), Error> {
        if self.store.add_decline(request_id, driver_id).await? {
            return Ok(());
        }

        // already resolved requests are still known through their ride
        match self.store.find_ride_by_request(request_id).await? {
            Some(_) => Ok(()),
            None => Err(not_found_error("ride request not found")),
        }
    }

    /// Cancels `ride` as expired if it is still unassigned. Returns the
    /// stored ride afterwards.
    #[tracing::instrument(skip(self, ride), fields(ride_id = %ride.id))]
    pub async fn expire(&self, ride: &Ride) -> Result<Ride, Error> {
        let mut expired = ride.clone();
        expired.expire()?;

        if self
            .store
            .compare_and_swap(RideStatus::Requested, &expired)
            .await?
        {
            tracing::info!("ride request expired");
            return Ok(expired);
        }

        self.store
            .find_ride(ride.id)
            .await?
            .ok_or_else(|| not_found_error("ride not found"))
    }

    /// Expires `ride` if it is an unassigned ride whose request has lapsed.
    pub async fn settle(&self, ride: Ride, now: DateTime<Utc>) -> Result<Ride, Error> {
        if ride.status != RideStatus::Requested {
            return Ok(ride);
        }

        match self.store.find_request(ride.request_id).await? {
            Some(request) if request.is_expired(now) => self.expire(&ride).await,
            _ => Ok(ride),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<Ride>, Error> {
        let mut expired = vec![];

        for request in self.store.list_expired_requests(now).await? {
            let ride = match self.store.find_ride(request.ride_id).await? {
                Some(ride) if ride.status == RideStatus::Requested => ride,
                _ => continue,
            };

            let ride = self.expire(&ride).await?;
            if ride.is_expired_request() {
                expired.push(ride);
            }
        }

        Ok(expired)
    }

    async fn conflict_from_store(&self, ride: &Ride, driver_id: Uuid) -> Result<Error, Error> {
        let current = self
            .store
            .find_ride(ride.id)
            .await?
            .ok_or_else(|| not_found_error("ride not found"))?;

        Ok(conflict_for(&current, driver_id))
    }
}

#[cfg(test)]
async fn open_ride(store: &Arc<dyn RideStore>, ttl: chrono::Duration) -> Ride {
    let ride = crate::entities::ride::sample_ride();
    let request = crate::entities::RideRequest::new(&ride, ttl);
    assert!(store.insert_ride(&ride, &request).await.unwrap());

    ride
}

#[cfg(test)]
fn memory_store() -> Arc<dyn RideStore> {
    Arc::new(crate::db::MemoryStore::new())
}

#[test]
fn otp_is_four_digits() {
    for _ in 0..100 {
        let otp = generate_otp();
        assert_eq!(otp.len(), 4);
        assert!(otp.chars().all(|c| c.is_ascii_digit()));
    }
}

#[test]
fn second_accept_conflicts_and_keeps_winner() {
    tokio_test::block_on(async {
        let store = memory_store();
        let matcher = RequestMatcher::new(store.clone());
        let ride = open_ride(&store, chrono::Duration::minutes(5)).await;

        let d1 = Uuid::new_v4();
        let d2 = Uuid::new_v4();

        let won = matcher.accept(ride.clone(), d1).await.unwrap();
        assert_eq!(won.status, RideStatus::Accepted);
        assert_eq!(won.driver_id, Some(d1));

        // d2 still holds the stale `requested` snapshot
        let err = matcher.accept(ride.clone(), d2).await.unwrap_err();
        assert!(err.is_conflict_error());
        assert_eq!(err.message, ALREADY_ACCEPTED);

        let stored = store.find_ride(ride.id).await.unwrap().unwrap();
        assert_eq!(stored.driver_id, Some(d1));
        assert_eq!(stored.otp, won.otp);
    });
}

#[test]
fn accept_after_cancel_conflicts() {
    tokio_test::block_on(async {
        let store = memory_store();
        let matcher = RequestMatcher::new(store.clone());
        let ride = open_ride(&store, chrono::Duration::minutes(5)).await;

        let mut cancelled = ride.clone();
        cancelled
            .cancel(Some(crate::entities::CancelledBy::Rider), None)
            .unwrap();
        assert!(store
            .compare_and_swap(RideStatus::Requested, &cancelled)
            .await
            .unwrap());

        let err = matcher.accept(ride, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.message, REQUEST_CANCELLED);
    });
}

#[test]
fn accept_of_lapsed_request_expires_it() {
    tokio_test::block_on(async {
        let store = memory_store();
        let matcher = RequestMatcher::new(store.clone());
        let ride = open_ride(&store, chrono::Duration::seconds(0)).await;

        let err = matcher.accept(ride.clone(), Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_conflict_error());
        assert_eq!(err.message, REQUEST_EXPIRED);

        let stored = store.find_ride(ride.id).await.unwrap().unwrap();
        assert!(stored.is_expired_request());
        assert!(stored.driver_id.is_none());
    });
}

#[test]
fn declines_are_idempotent_and_block_accept() {
    tokio_test::block_on(async {
        let store = memory_store();
        let matcher = RequestMatcher::new(store.clone());
        let ride = open_ride(&store, chrono::Duration::minutes(5)).await;
        let driver_id = Uuid::new_v4();

        matcher.decline(ride.request_id, driver_id).await.unwrap();
        matcher.decline(ride.request_id, driver_id).await.unwrap();

        let stored = store.find_ride(ride.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RideStatus::Requested);

        let err = matcher.accept(ride.clone(), driver_id).await.unwrap_err();
        assert!(err.is_conflict_error());

        let err = matcher
            .decline(Uuid::new_v4(), driver_id)
            .await
            .unwrap_err();
        assert!(err.is_not_found_error());
    });
}

#[test]
fn offline_driver_cannot_accept() {
    tokio_test::block_on(async {
        let store = memory_store();
        let matcher = RequestMatcher::new(store.clone());
        let ride = open_ride(&store, chrono::Duration::minutes(5)).await;

        let mut driver = crate::entities::Driver::new(Uuid::new_v4());
        driver.stop();
        store.save_driver(&driver).await.unwrap();

        let err = matcher.accept(ride, driver.id).await.unwrap_err();
        assert!(err.is_conflict_error());
    });
}

#[test]
fn stale_requests_are_swept() {
    tokio_test::block_on(async {
        let store = memory_store();
        let matcher = RequestMatcher::new(store.clone());
        let lapsed = open_ride(&store, chrono::Duration::seconds(0)).await;
        let fresh = open_ride(&store, chrono::Duration::minutes(5)).await;

        let expired = matcher.expire_stale(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, lapsed.id);

        let fresh = store.find_ride(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, RideStatus::Requested);
        assert!(store.find_request(lapsed.request_id).await.unwrap().is_none());
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_have_exactly_one_winner() {
    let store = memory_store();
    let matcher = Arc::new(RequestMatcher::new(store.clone()));
    let ride = open_ride(&store, chrono::Duration::minutes(5)).await;

    let drivers: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();

    let handles = drivers.iter().map(|&driver_id| {
        let matcher = matcher.clone();
        let ride = ride.clone();

        tokio::spawn(async move { (driver_id, matcher.accept(ride, driver_id).await) })
    });

    let results = futures::future::join_all(handles).await;

    let mut winners = vec![];
    for result in results {
        let (driver_id, outcome) = result.unwrap();
        match outcome {
            Ok(_) => winners.push(driver_id),
            Err(err) => assert!(err.is_conflict_error(), "{}", err),
        }
    }

    assert_eq!(winners.len(), 1);

    let stored = store.find_ride(ride.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RideStatus::Accepted);
    assert_eq!(stored.driver_id, Some(winners[0]));
}
