use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::Engine;
use crate::{
    api::RideRequestAPI,
    auth::{Dispatch, User},
    entities::{Ride, RideRequest},
    error::{not_found_error, Error},
};

#[async_trait]
impl RideRequestAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn list_pending_requests(&self, user: User) -> Result<Vec<RideRequest>, Error> {
        self.authorize(user.clone(), "list_requests", Dispatch::RequestBoard)?;

        if let Some(driver) = self.store.find_driver(user.id).await? {
            if !driver.is_available() {
                return Ok(vec![]);
            }
        }

        let now = Utc::now();
        self.matcher.expire_stale(now).await?;

        let mut requests = self.store.list_open_requests(user.id, now).await?;

        let ids: Vec<Uuid> = requests.iter().map(|request| request.id).collect();
        self.store.mark_seen(&ids, user.id).await?;

        for request in requests.iter_mut() {
            request.mark_seen(user.id);
        }

        Ok(requests)
    }

    #[tracing::instrument(skip(self))]
    async fn accept_request(&self, user: User, request_id: Uuid) -> Result<Ride, Error> {
        let ride = self
            .store
            .find_ride_by_request(request_id)
            .await?
            .ok_or_else(|| not_found_error("ride request not found"))?;

        self.authorize(user.clone(), "accept", ride.clone())?;

        self.matcher.accept(ride, user.id).await
    }

    #[tracing::instrument(skip(self))]
    async fn decline_request(&self, user: User, request_id: Uuid) -> Result<(), Error> {
        self.authorize(user.clone(), "decline", Dispatch::RequestBoard)?;

        self.matcher.decline(request_id, user.id).await
    }

    #[tracing::instrument(skip(self))]
    async fn expire_requests(&self, user: User) -> Result<Vec<Ride>, Error> {
        self.authorize(user, "expire_requests", Dispatch::RequestBoard)?;

        self.matcher.expire_stale(Utc::now()).await
    }
}

#[cfg(test)]
use crate::api::{DriverAPI, RideAPI, SubmitRequestParams};
#[cfg(test)]
use crate::entities::{Place, RideStatus};

#[cfg(test)]
async fn submit(engine: &Engine) -> (User, Ride) {
    let rider = User::new_rider(Uuid::new_v4());

    let ride = engine
        .submit_request(
            rider.clone(),
            SubmitRequestParams {
                pickup: Place::new("Bandra West", 19.0596, 72.8295),
                destination: Place::new("Powai", 19.1176, 72.9060),
                ride_type: "auto".into(),
                estimated_fare: None,
            },
        )
        .await
        .unwrap();

    (rider, ride)
}

#[test]
fn pending_requests_are_marked_seen() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (_, ride) = submit(&engine).await;
        let driver = User::new_driver(Uuid::new_v4());

        let requests = engine.list_pending_requests(driver.clone()).await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].ride_id, ride.id);
        assert!(requests[0].seen_by.contains(&driver.id));

        let stored = engine.store.find_request(ride.request_id).await.unwrap().unwrap();
        assert!(stored.seen_by.contains(&driver.id));
    });
}

#[test]
fn winner_and_loser_views_converge() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (rider, ride) = submit(&engine).await;
        let d1 = User::new_driver(Uuid::new_v4());
        let d2 = User::new_driver(Uuid::new_v4());

        assert_eq!(engine.list_pending_requests(d2.clone()).await.unwrap().len(), 1);

        let accepted = engine
            .accept_request(d1.clone(), ride.request_id)
            .await
            .unwrap();
        assert_eq!(accepted.driver_id, Some(d1.id));
        assert_eq!(accepted.otp.as_ref().map(String::len), Some(4));

        let err = engine
            .accept_request(d2.clone(), ride.request_id)
            .await
            .unwrap_err();
        assert!(err.is_conflict_error());
        assert_eq!(err.message, "Already accepted by another driver.");

        assert!(engine.list_pending_requests(d2.clone()).await.unwrap().is_empty());

        let current = engine.current_ride(d1.clone()).await.unwrap().unwrap();
        assert_eq!(current.status, RideStatus::Accepted);
        assert_eq!(current.driver_id, Some(d1.id));

        let seen_by_rider = engine.current_ride(rider).await.unwrap().unwrap();
        assert_eq!(seen_by_rider.driver_id, Some(d1.id));

        assert!(engine.current_ride(d2).await.unwrap().is_none());
    });
}

#[test]
fn declined_requests_leave_the_list() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (_, ride) = submit(&engine).await;
        let driver = User::new_driver(Uuid::new_v4());

        engine
            .decline_request(driver.clone(), ride.request_id)
            .await
            .unwrap();
        engine
            .decline_request(driver.clone(), ride.request_id)
            .await
            .unwrap();

        assert!(engine.list_pending_requests(driver.clone()).await.unwrap().is_empty());
        assert_eq!(
            engine
                .list_pending_requests(User::new_driver(Uuid::new_v4()))
                .await
                .unwrap()
                .len(),
            1
        );

        let stored = engine.store.find_ride(ride.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RideStatus::Requested);

        let err = engine
            .accept_request(driver, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.is_not_found_error());
    });
}

#[test]
fn riders_cannot_take_requests() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (rider, ride) = submit(&engine).await;

        let err = engine
            .accept_request(rider.clone(), ride.request_id)
            .await
            .unwrap_err();
        assert!(err.is_auth_error());

        let err = engine.list_pending_requests(rider).await.unwrap_err();
        assert!(err.is_auth_error());
    });
}

#[test]
fn offline_drivers_see_nothing() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        submit(&engine).await;
        let driver = User::new_driver(Uuid::new_v4());

        engine
            .set_availability(
                driver.clone(),
                crate::api::AvailabilityParams { available: false },
            )
            .await
            .unwrap();

        assert!(engine.list_pending_requests(driver).await.unwrap().is_empty());
    });
}

#[test]
fn lapsed_requests_expire() {
    tokio_test::block_on(async {
        let store: std::sync::Arc<dyn crate::db::RideStore> =
            std::sync::Arc::new(crate::db::MemoryStore::new());
        let engine = Engine::new(
            store,
            crate::fare::FareSchedule::default(),
            chrono::Duration::seconds(0),
        )
        .unwrap();

        let (rider, ride) = submit(&engine).await;
        let driver = User::new_driver(Uuid::new_v4());

        assert!(engine.list_pending_requests(driver.clone()).await.unwrap().is_empty());

        let err = engine
            .accept_request(driver, ride.request_id)
            .await
            .unwrap_err();
        assert_eq!(err.message, "Ride request expired");

        assert!(engine.current_ride(rider.clone()).await.unwrap().is_none());

        let history = engine
            .ride_history(rider, crate::api::Page::default())
            .await
            .unwrap();
        assert!(history[0].is_expired_request());

        let swept = engine
            .expire_requests(User::new_system_user())
            .await
            .unwrap();
        assert!(swept.is_empty());
    });
}
