use async_trait::async_trait;

use super::Engine;
use crate::{
    api::{parse_ride_type, EstimateFareParams, FareAPI},
    auth::{Dispatch, User},
    entities::validate_route,
    error::Error,
    fare::FareEstimate,
};

#[async_trait]
impl FareAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn estimate_fare(
        &self,
        user: User,
        params: EstimateFareParams,
    ) -> Result<FareEstimate, Error> {
        self.authorize(user, "estimate_fare", Dispatch::Fares)?;

        let ride_type = parse_ride_type(&params.ride_type)?;
        validate_route(&params.pickup, &params.destination)?;

        Ok(self.fares.estimate(
            params.pickup.coordinates(),
            params.destination.coordinates(),
            ride_type,
        ))
    }
}

#[test]
fn estimate_matches_schedule() {
    use crate::entities::{Place, RideType};
    use uuid::Uuid;

    tokio_test::block_on(async {
        let engine = super::test_engine();
        let rider = User::new_rider(Uuid::new_v4());

        let params = EstimateFareParams {
            pickup: Place::new("Mumbai CST", 19.0760, 72.8777),
            destination: Place::new("Andheri East", 19.1136, 72.8697),
            ride_type: "bike".into(),
        };

        let estimate = engine.estimate_fare(rider.clone(), params.clone()).await.unwrap();
        assert_eq!(estimate.ride_type, RideType::Bike);
        assert_eq!(
            estimate,
            engine.estimate_fare(rider.clone(), params.clone()).await.unwrap()
        );

        let mut unknown = params;
        unknown.ride_type = "boat".into();
        assert!(engine
            .estimate_fare(rider, unknown)
            .await
            .unwrap_err()
            .is_validation_error());
    });
}
