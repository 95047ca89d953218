use async_trait::async_trait;

use super::Engine;
use crate::{
    api::{AvailabilityParams, DriverAPI, Earnings, EarningsParams},
    auth::{Dispatch, User},
    entities::Driver,
    error::Error,
};

#[async_trait]
impl DriverAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn set_availability(&self, user: User, params: AvailabilityParams) -> Result<bool, Error> {
        let mut driver = self
            .store
            .find_driver(user.id)
            .await?
            .unwrap_or_else(|| Driver::new(user.id));

        self.authorize(user.clone(), "set_availability", driver.clone())?;

        driver.set_available(params.available);
        self.store.save_driver(&driver).await?;

        tracing::info!(driver_id = %driver.id, status = driver.status.name(), "driver availability set");

        Ok(driver.is_available())
    }

    #[tracing::instrument(skip(self))]
    async fn earnings(&self, user: User, params: EarningsParams) -> Result<Earnings, Error> {
        self.authorize(user.clone(), "read_earnings", Dispatch::OwnRides)?;

        let fares: Vec<i64> = self
            .store
            .list_completed_rides(user.id)
            .await?
            .iter()
            .filter_map(|ride| ride.earned_since(params.since))
            .collect();

        Ok(Earnings {
            total: fares.iter().sum(),
            completed_rides: fares.len() as u32,
            since: params.since,
        })
    }
}

#[test]
fn availability_round_trip() {
    use uuid::Uuid;

    tokio_test::block_on(async {
        let engine = super::test_engine();
        let driver = User::new_driver(Uuid::new_v4());

        let available = engine
            .set_availability(driver.clone(), AvailabilityParams { available: false })
            .await
            .unwrap();
        assert!(!available);

        let available = engine
            .set_availability(driver.clone(), AvailabilityParams { available: true })
            .await
            .unwrap();
        assert!(available);

        let err = engine
            .set_availability(
                User::new_rider(Uuid::new_v4()),
                AvailabilityParams { available: true },
            )
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
    });
}

#[test]
fn earnings_sum_completed_fares() {
    use crate::api::{CompleteRideParams, RideAPI};
    use crate::entities::RideStatus;
    use uuid::Uuid;

    tokio_test::block_on(async {
        let engine = super::test_engine();

        let (rider, driver, ride) =
            super::ride_api::ride_in(&engine, RideStatus::RiderPickedUp).await;

        let in_progress = engine
            .earnings(driver.clone(), EarningsParams::default())
            .await
            .unwrap();
        assert_eq!(in_progress.total, 0);
        assert_eq!(in_progress.completed_rides, 0);

        engine
            .complete_ride(
                driver.clone(),
                ride.id,
                CompleteRideParams {
                    final_fare: Some(140),
                },
            )
            .await
            .unwrap();

        let earnings = engine
            .earnings(driver.clone(), EarningsParams::default())
            .await
            .unwrap();
        assert_eq!(earnings.total, 140);
        assert_eq!(earnings.completed_rides, 1);

        let later = EarningsParams {
            since: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
        };
        let windowed = engine.earnings(driver.clone(), later).await.unwrap();
        assert_eq!(windowed.total, 0);
        assert_eq!(windowed.since, later.since);

        let stranger = engine
            .earnings(User::new_driver(Uuid::new_v4()), EarningsParams::default())
            .await
            .unwrap();
        assert_eq!(stranger.completed_rides, 0);

        let err = engine
            .earnings(rider, EarningsParams::default())
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
    });
}
