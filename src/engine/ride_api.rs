use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::Engine;
use crate::{
    api::{
        parse_ride_type, CancelRideParams, CompleteRideParams, Page, RateRideParams, RideAPI,
        SubmitRequestParams, UpdateStatusParams,
    },
    auth::{Dispatch, User},
    entities::{validate_route, CancelledBy, Rating, Ride, RideRequest, RideStatus},
    error::{conflict_error, forbidden_error, validation_error, Error},
};

fn parse_cancelled_by(claim: Option<String>) -> Result<Option<CancelledBy>, Error> {
    match claim.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some("rider") => Ok(Some(CancelledBy::Rider)),
        Some("driver") => Ok(Some(CancelledBy::Driver)),
        Some(other) => Err(validation_error(format!("unknown cancelling party: {}", other))),
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

#[async_trait]
impl RideAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn submit_request(&self, user: User, params: SubmitRequestParams) -> Result<Ride, Error> {
        self.authorize(user.clone(), "submit_request", Dispatch::Booking)?;

        let ride_type = parse_ride_type(&params.ride_type)?;
        validate_route(&params.pickup, &params.destination)?;

        let estimate = self.fares.estimate(
            params.pickup.coordinates(),
            params.destination.coordinates(),
            ride_type,
        );

        if let Some(claimed) = params.estimated_fare {
            if claimed != estimate.estimated_fare {
                tracing::info!(
                    claimed,
                    computed = estimate.estimated_fare,
                    "client fare estimate differs, using computed fare"
                );
            }
        }

        // a lapsed request must not block a new one
        if let Some(active) = self.store.find_active_ride(user.id).await? {
            self.matcher.settle(active, Utc::now()).await?;
        }

        let ride = Ride::new(
            user.id,
            params.pickup,
            params.destination,
            ride_type,
            estimate.estimated_fare,
        );
        let request = RideRequest::new(&ride, self.request_ttl);

        if !self.store.insert_ride(&ride, &request).await? {
            return Err(conflict_error("You already have an active ride"));
        }

        tracing::info!(ride_id = %ride.id, request_id = %request.id, "ride requested");

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn find_ride(&self, user: User, id: Uuid) -> Result<Ride, Error> {
        let ride = self.load_ride(id).await?;

        self.authorize(user, "read", ride.clone())?;

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn current_ride(&self, user: User) -> Result<Option<Ride>, Error> {
        self.authorize(user.clone(), "read_own", Dispatch::OwnRides)?;

        let ride = match self.store.find_active_ride(user.id).await? {
            Some(ride) => self.matcher.settle(ride, Utc::now()).await?,
            None => return Ok(None),
        };

        if ride.status.is_terminal() {
            return Ok(None);
        }

        Ok(Some(ride))
    }

    #[tracing::instrument(skip(self))]
    async fn ride_history(&self, user: User, page: Page) -> Result<Vec<Ride>, Error> {
        self.authorize(user.clone(), "read_own", Dispatch::OwnRides)?;

        self.store.list_history(user.id, page).await
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(
        &self,
        user: User,
        id: Uuid,
        params: UpdateStatusParams,
    ) -> Result<Ride, Error> {
        let to: RideStatus = params.status.parse()?;

        match to {
            RideStatus::Completed => {
                return self
                    .complete_ride(user, id, CompleteRideParams::default())
                    .await
            }
            RideStatus::Cancelled => {
                return Err(validation_error("use the cancel operation to cancel a ride"))
            }
            _ => (),
        };

        let otp = params.otp;

        self.transition_ride(&user, id, "update_status", |ride| {
            if to == RideStatus::RiderPickedUp && ride.status.can_transition(to) {
                match otp.as_deref().map(str::trim) {
                    Some(otp) if ride.verify_otp(otp) => (),
                    Some(_) => return Err(validation_error("Invalid OTP")),
                    None => return Err(validation_error("OTP is required to confirm pickup")),
                };
            }

            ride.advance(to)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn complete_ride(
        &self,
        user: User,
        id: Uuid,
        params: CompleteRideParams,
    ) -> Result<Ride, Error> {
        self.transition_ride(&user, id, "complete", |ride| ride.complete(params.final_fare))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_ride(
        &self,
        user: User,
        id: Uuid,
        params: CancelRideParams,
    ) -> Result<Ride, Error> {
        let claim = parse_cancelled_by(params.cancelled_by)?;
        let reason = non_empty(params.reason);
        let caller = user.id;

        self.transition_ride(&user, id, "cancel", |ride| {
            let by = match (ride.party(caller), claim) {
                (Some(party), Some(claimed)) if party != claimed => return Err(forbidden_error()),
                (Some(party), _) => Some(party),
                (None, claimed) => claimed,
            };

            ride.cancel(by, reason.clone())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn rate_ride(&self, user: User, id: Uuid, params: RateRideParams) -> Result<(), Error> {
        let ride = self.load_ride(id).await?;

        self.authorize(user.clone(), "rate", ride.clone())?;

        let already_rated = self.store.has_rated(ride.id, user.id).await?;
        if !ride.status.can_rate(already_rated) {
            if already_rated {
                return Err(conflict_error("You have already rated this ride"));
            }
            return Err(validation_error("ride can only be rated after completion"));
        }

        let rating = Rating::new(ride.id, user.id, params.rating, params.comment)?;

        if !self.store.insert_rating(&rating).await? {
            return Err(conflict_error("You have already rated this ride"));
        }

        tracing::info!(ride_id = %ride.id, rating = rating.rating, "ride rated");

        Ok(())
    }
}

#[cfg(test)]
use crate::api::RideRequestAPI;
#[cfg(test)]
use crate::entities::Place;

#[cfg(test)]
fn mumbai_request() -> SubmitRequestParams {
    SubmitRequestParams {
        pickup: Place::new("Mumbai CST", 19.0760, 72.8777),
        destination: Place::new("Andheri East", 19.1136, 72.8697),
        ride_type: "car".into(),
        estimated_fare: None,
    }
}

/// Requested, accepted and advanced to `status` by a fresh driver.
#[cfg(test)]
pub(super) async fn ride_in(engine: &Engine, status: RideStatus) -> (User, User, Ride) {
    let rider = User::new_rider(Uuid::new_v4());
    let driver = User::new_driver(Uuid::new_v4());

    let mut ride = engine
        .submit_request(rider.clone(), mumbai_request())
        .await
        .unwrap();

    if status == RideStatus::Requested {
        return (rider, driver, ride);
    }

    ride = engine
        .accept_request(driver.clone(), ride.request_id)
        .await
        .unwrap();

    for step in [RideStatus::DriverOnWay, RideStatus::RiderPickedUp] {
        if ride.status == status {
            break;
        }

        ride = engine
            .update_status(
                driver.clone(),
                ride.id,
                UpdateStatusParams {
                    status: step.name().into(),
                    otp: ride.otp.clone(),
                },
            )
            .await
            .unwrap();
    }

    (rider, driver, ride)
}

#[test]
fn submit_computes_the_fare() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let rider = User::new_rider(Uuid::new_v4());

        let mut params = mumbai_request();
        params.estimated_fare = Some(1);

        let ride = engine.submit_request(rider.clone(), params).await.unwrap();

        assert_eq!(ride.status, RideStatus::Requested);
        assert_eq!(ride.estimated_fare, 114);
        assert!(ride.driver_id.is_none());

        let current = engine.current_ride(rider).await.unwrap().unwrap();
        assert_eq!(current.id, ride.id);
    });
}

#[test]
fn submit_validates_input() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let rider = User::new_rider(Uuid::new_v4());

        let mut params = mumbai_request();
        params.ride_type = "helicopter".into();
        let err = engine
            .submit_request(rider.clone(), params)
            .await
            .unwrap_err();
        assert!(err.is_validation_error());

        let mut params = mumbai_request();
        params.destination = params.pickup.clone();
        let err = engine
            .submit_request(rider.clone(), params)
            .await
            .unwrap_err();
        assert!(err.is_validation_error());

        let driver = User::new_driver(Uuid::new_v4());
        let err = engine
            .submit_request(driver, mumbai_request())
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
    });
}

#[test]
fn one_active_ride_per_rider() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (rider, _, _) = ride_in(&engine, RideStatus::Accepted).await;

        let err = engine
            .submit_request(rider, mumbai_request())
            .await
            .unwrap_err();
        assert!(err.is_conflict_error());
    });
}

#[test]
fn complete_before_pickup_is_rejected() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (rider, driver, ride) = ride_in(&engine, RideStatus::DriverOnWay).await;

        let err = engine
            .complete_ride(driver.clone(), ride.id, CompleteRideParams::default())
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition_error());

        let stored = engine.find_ride(rider.clone(), ride.id).await.unwrap();
        assert_eq!(stored.status, RideStatus::DriverOnWay);
        assert!(stored.final_fare.is_none());

        let history = engine.ride_history(rider, Page::default()).await.unwrap();
        assert!(history.is_empty());
    });
}

#[test]
fn pickup_requires_the_otp() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (_, driver, ride) = ride_in(&engine, RideStatus::DriverOnWay).await;

        let wrong = if ride.otp.as_deref() == Some("0000") { "1111" } else { "0000" };

        let err = engine
            .update_status(
                driver.clone(),
                ride.id,
                UpdateStatusParams {
                    status: "rider_picked_up".into(),
                    otp: Some(wrong.into()),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_validation_error());

        let err = engine
            .update_status(
                driver.clone(),
                ride.id,
                UpdateStatusParams {
                    status: "rider_picked_up".into(),
                    otp: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
    });
}

#[test]
fn status_updates_skip_nothing() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (rider, driver, ride) = ride_in(&engine, RideStatus::Accepted).await;

        let err = engine
            .update_status(
                driver.clone(),
                ride.id,
                UpdateStatusParams {
                    status: "rider_picked_up".into(),
                    otp: ride.otp.clone(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition_error());

        let err = engine
            .update_status(
                rider,
                ride.id,
                UpdateStatusParams {
                    status: "driver_on_way".into(),
                    otp: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_auth_error());

        let err = engine
            .update_status(
                driver,
                ride.id,
                UpdateStatusParams {
                    status: "cancelled".into(),
                    otp: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
    });
}

#[test]
fn rider_cancels_while_driver_on_way() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (rider, _, ride) = ride_in(&engine, RideStatus::DriverOnWay).await;

        let cancelled = engine
            .cancel_ride(
                rider.clone(),
                ride.id,
                CancelRideParams {
                    reason: Some("driver too far".into()),
                    cancelled_by: Some("rider".into()),
                },
            )
            .await
            .unwrap();

        assert_eq!(cancelled.status, RideStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Rider));

        let history = engine
            .ride_history(rider.clone(), Page::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, ride.id);
        assert!(engine.current_ride(rider.clone()).await.unwrap().is_none());

        let err = engine
            .cancel_ride(rider, ride.id, CancelRideParams::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found_error());
    });
}

#[test]
fn cancel_after_pickup_is_rejected() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (rider, _, ride) = ride_in(&engine, RideStatus::RiderPickedUp).await;

        let err = engine
            .cancel_ride(rider, ride.id, CancelRideParams::default())
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition_error());
    });
}

#[test]
fn cancelling_party_comes_from_the_caller() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (_, driver, ride) = ride_in(&engine, RideStatus::Accepted).await;

        let err = engine
            .cancel_ride(
                driver.clone(),
                ride.id,
                CancelRideParams {
                    reason: None,
                    cancelled_by: Some("rider".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_auth_error());

        let cancelled = engine
            .cancel_ride(driver, ride.id, CancelRideParams::default())
            .await
            .unwrap();
        assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Driver));
    });
}

#[test]
fn completion_and_rating() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (rider, driver, ride) = ride_in(&engine, RideStatus::RiderPickedUp).await;

        let params = RateRideParams {
            rating: 5,
            comment: None,
        };

        let err = engine
            .rate_ride(rider.clone(), ride.id, params.clone())
            .await
            .unwrap_err();
        assert!(err.is_validation_error());

        let completed = engine
            .update_status(
                driver.clone(),
                ride.id,
                UpdateStatusParams {
                    status: "completed".into(),
                    otp: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(completed.status, RideStatus::Completed);
        assert_eq!(completed.final_fare, Some(ride.estimated_fare));

        engine
            .rate_ride(rider.clone(), ride.id, params.clone())
            .await
            .unwrap();
        engine
            .rate_ride(driver.clone(), ride.id, params.clone())
            .await
            .unwrap();

        let err = engine
            .rate_ride(rider.clone(), ride.id, params)
            .await
            .unwrap_err();
        assert!(err.is_conflict_error());

        let err = engine
            .rate_ride(
                User::new_rider(Uuid::new_v4()),
                ride.id,
                RateRideParams {
                    rating: 3,
                    comment: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_auth_error());

        let history = engine.ride_history(driver, Page::default()).await.unwrap();
        assert_eq!(history[0].status, RideStatus::Completed);
    });
}

#[test]
fn strangers_cannot_read_rides() {
    tokio_test::block_on(async {
        let engine = super::test_engine();
        let (_, _, ride) = ride_in(&engine, RideStatus::Requested).await;

        let err = engine
            .find_ride(User::new_driver(Uuid::new_v4()), ride.id)
            .await
            .unwrap_err();
        assert!(err.is_auth_error());

        let err = engine
            .find_ride(User::new_rider(Uuid::new_v4()), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.is_not_found_error());
    });
}
