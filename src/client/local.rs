use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{RideClient, SessionStore};
use crate::api::{
    AvailabilityParams, CancelRideParams, CompleteRideParams, DynAPI, Earnings, EarningsParams,
    EstimateFareParams, Page, RateRideParams, SubmitRequestParams, UpdateStatusParams,
};
use crate::auth::{TokenVerifier, User};
use crate::entities::{Ride, RideRequest};
use crate::error::{unauthorized_error, Error};
use crate::fare::FareEstimate;

/// Calls an in-process engine while still requiring a valid session
/// credential for every operation.
pub struct LocalClient {
    api: DynAPI,
    verifier: TokenVerifier,
    session: Arc<dyn SessionStore>,
}

impl LocalClient {
    pub fn new(api: DynAPI, verifier: TokenVerifier, session: Arc<dyn SessionStore>) -> Self {
        Self {
            api,
            verifier,
            session,
        }
    }

    fn user(&self) -> Result<User, Error> {
        let token = self.session.get().ok_or_else(unauthorized_error)?;

        self.verifier.verify(&token).map_err(|err| {
            self.session.clear();
            err
        })
    }
}

#[async_trait]
impl RideClient for LocalClient {
    async fn estimate_fare(&self, params: EstimateFareParams) -> Result<FareEstimate, Error> {
        self.api.estimate_fare(self.user()?, params).await
    }

    async fn submit_request(&self, params: SubmitRequestParams) -> Result<Ride, Error> {
        self.api.submit_request(self.user()?, params).await
    }

    async fn find_ride(&self, id: Uuid) -> Result<Ride, Error> {
        self.api.find_ride(self.user()?, id).await
    }

    async fn current_ride(&self) -> Result<Option<Ride>, Error> {
        self.api.current_ride(self.user()?).await
    }

    async fn ride_history(&self, page: Page) -> Result<Vec<Ride>, Error> {
        self.api.ride_history(self.user()?, page).await
    }

    async fn cancel_ride(&self, id: Uuid, params: CancelRideParams) -> Result<Ride, Error> {
        self.api.cancel_ride(self.user()?, id, params).await
    }

    async fn rate_ride(&self, id: Uuid, params: RateRideParams) -> Result<(), Error> {
        self.api.rate_ride(self.user()?, id, params).await
    }

    async fn list_pending_requests(&self) -> Result<Vec<RideRequest>, Error> {
        self.api.list_pending_requests(self.user()?).await
    }

    async fn accept_request(&self, request_id: Uuid) -> Result<Ride, Error> {
        self.api.accept_request(self.user()?, request_id).await
    }

    async fn decline_request(&self, request_id: Uuid) -> Result<(), Error> {
        self.api.decline_request(self.user()?, request_id).await
    }

    async fn update_status(&self, id: Uuid, params: UpdateStatusParams) -> Result<Ride, Error> {
        self.api.update_status(self.user()?, id, params).await
    }

    async fn complete_ride(&self, id: Uuid, params: CompleteRideParams) -> Result<Ride, Error> {
        self.api.complete_ride(self.user()?, id, params).await
    }

    async fn set_availability(&self, available: bool) -> Result<bool, Error> {
        self.api
            .set_availability(self.user()?, AvailabilityParams { available })
            .await
    }

    async fn earnings(&self, params: EarningsParams) -> Result<Earnings, Error> {
        self.api.earnings(self.user()?, params).await
    }
}

#[cfg(test)]
pub(crate) fn local_client(api: DynAPI, verifier: &TokenVerifier, user: &User) -> LocalClient {
    let token = verifier.issue(user, chrono::Duration::hours(1)).unwrap();
    let session = Arc::new(super::MemorySessionStore::with_token(token));

    LocalClient::new(api, verifier.clone(), session)
}

#[test]
fn calls_without_a_session_fail() {
    tokio_test::block_on(async {
        let api = Arc::new(crate::engine::test_engine()) as DynAPI;
        let verifier = TokenVerifier::new("test_secret_key");
        let session = Arc::new(super::MemorySessionStore::new());
        let client = LocalClient::new(api, verifier, session);

        let err = client.current_ride().await.unwrap_err();
        assert!(err.is_auth_error());
    });
}

#[test]
fn rejected_credentials_clear_the_session() {
    tokio_test::block_on(async {
        let api = Arc::new(crate::engine::test_engine()) as DynAPI;
        let verifier = TokenVerifier::new("test_secret_key");
        let session = Arc::new(super::MemorySessionStore::with_token("not-a-token"));
        let client = LocalClient::new(api, verifier, session.clone());

        assert!(client.current_ride().await.unwrap_err().is_auth_error());
        assert!(session.get().is_none());
    });
}

#[test]
fn session_identity_reaches_the_engine() {
    tokio_test::block_on(async {
        let api = Arc::new(crate::engine::test_engine()) as DynAPI;
        let verifier = TokenVerifier::new("test_secret_key");
        let rider = User::new_rider(Uuid::new_v4());
        let client = local_client(api, &verifier, &rider);

        let ride = client
            .submit_request(SubmitRequestParams {
                pickup: crate::entities::Place::new("Mumbai CST", 19.0760, 72.8777),
                destination: crate::entities::Place::new("Andheri East", 19.1136, 72.8697),
                ride_type: "bike".into(),
                estimated_fare: None,
            })
            .await
            .unwrap();

        assert_eq!(ride.rider_id, rider.id);
        assert_eq!(client.current_ride().await.unwrap().map(|r| r.id), Some(ride.id));
    });
}
