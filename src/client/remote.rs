use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use super::{RideClient, Role, SessionStore};
use crate::api::{
    AvailabilityParams, CancelRideParams, CompleteRideParams, Earnings, EarningsParams, Envelope,
    EstimateFareParams, Page, RateRideParams, SubmitRequestParams, UpdateStatusParams,
};
use crate::entities::{Ride, RideRequest};
use crate::error::{unauthorized_error, upstream_error, Error};
use crate::fare::FareEstimate;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ErrorBody {
    code: i32,
    error: String,
}

/// Talks to the ride service over HTTP with the session's bearer token.
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    role: Role,
    session: Arc<dyn SessionStore>,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, role: Role, session: Arc<dyn SessionStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            role,
            session,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn own(&self, path: &str) -> String {
        self.url(&format!("{}/{}", self.role.path(), path))
    }

    fn request(&self, method: Method, url: String) -> Result<RequestBuilder, Error> {
        let token = self.session.get().ok_or_else(unauthorized_error)?;

        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, Error> {
        let res = builder.send().await?;
        let status = res.status();

        if status.is_success() {
            let envelope: Envelope<T> = res.json().await.map_err(|err| {
                tracing::warn!(error = %err, "malformed response body");
                upstream_error()
            })?;

            return envelope.into_data();
        }

        if status == StatusCode::UNAUTHORIZED {
            self.session.clear();
        }

        match res.json::<ErrorBody>().await {
            Ok(body) => Err(Error {
                code: body.code,
                message: body.error,
            }),
            Err(_) => {
                tracing::warn!(%status, "error response without error body");
                Err(upstream_error())
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: String) -> Result<T, Error> {
        self.send(self.request(Method::GET, url)?).await
    }

    async fn post<T: DeserializeOwned, P: Serialize + Sync>(
        &self,
        url: String,
        params: &P,
    ) -> Result<T, Error> {
        self.send(self.request(Method::POST, url)?.json(params))
            .await
    }

    async fn put<T: DeserializeOwned, P: Serialize + Sync>(
        &self,
        url: String,
        params: &P,
    ) -> Result<T, Error> {
        self.send(self.request(Method::PUT, url)?.json(params)).await
    }
}

#[derive(Serialize)]
struct Empty {}

#[async_trait]
impl RideClient for RemoteClient {
    #[tracing::instrument(skip(self))]
    async fn estimate_fare(&self, params: EstimateFareParams) -> Result<FareEstimate, Error> {
        self.post(self.url("rides/calculate-fare"), &params).await
    }

    #[tracing::instrument(skip(self))]
    async fn submit_request(&self, params: SubmitRequestParams) -> Result<Ride, Error> {
        self.post(self.url("rider/rides/request"), &params).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_ride(&self, id: Uuid) -> Result<Ride, Error> {
        self.get(self.url(&format!("rides/{}", id))).await
    }

    #[tracing::instrument(skip(self))]
    async fn current_ride(&self) -> Result<Option<Ride>, Error> {
        self.get(self.own("rides/current")).await
    }

    #[tracing::instrument(skip(self))]
    async fn ride_history(&self, page: Page) -> Result<Vec<Ride>, Error> {
        let url = format!(
            "{}?page={}&limit={}",
            self.own("rides/history"),
            page.page,
            page.limit
        );

        self.get(url).await
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_ride(&self, id: Uuid, params: CancelRideParams) -> Result<Ride, Error> {
        self.post(self.own(&format!("rides/{}/cancel", id)), &params)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn rate_ride(&self, id: Uuid, params: RateRideParams) -> Result<(), Error> {
        self.post(self.own(&format!("rides/{}/rate", id)), &params)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_pending_requests(&self) -> Result<Vec<RideRequest>, Error> {
        self.get(self.url("driver/ride-requests")).await
    }

    #[tracing::instrument(skip(self))]
    async fn accept_request(&self, request_id: Uuid) -> Result<Ride, Error> {
        let url = self.url(&format!("driver/ride-requests/{}/accept", request_id));

        self.post(url, &Empty {}).await
    }

    #[tracing::instrument(skip(self))]
    async fn decline_request(&self, request_id: Uuid) -> Result<(), Error> {
        let url = self.url(&format!("driver/ride-requests/{}/decline", request_id));

        self.post(url, &Empty {}).await
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(&self, id: Uuid, params: UpdateStatusParams) -> Result<Ride, Error> {
        self.put(self.url(&format!("driver/rides/{}/status", id)), &params)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn complete_ride(&self, id: Uuid, params: CompleteRideParams) -> Result<Ride, Error> {
        self.post(self.url(&format!("driver/rides/{}/complete", id)), &params)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn set_availability(&self, available: bool) -> Result<bool, Error> {
        let params = AvailabilityParams { available };
        let response: AvailabilityParams =
            self.put(self.url("driver/availability"), &params).await?;

        Ok(response.available)
    }

    #[tracing::instrument(skip(self))]
    async fn earnings(&self, params: EarningsParams) -> Result<Earnings, Error> {
        let builder = self
            .request(Method::GET, self.url("driver/earnings"))?
            .query(&params);

        self.send(builder).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn http_round_trip() {
    use crate::api::DynAPI;
    use crate::auth::{TokenVerifier, User};
    use crate::client::MemorySessionStore;
    use crate::entities::{Place, RideStatus};

    let verifier = TokenVerifier::new("test_secret_key");
    let api = Arc::new(crate::engine::test_engine()) as DynAPI;
    let app = crate::server::router(api, verifier.clone());

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(app.into_make_service());
    tokio::spawn(server);

    let base_url = format!("http://{}", addr);

    let rider = User::new_rider(Uuid::new_v4());
    let rider_session = Arc::new(MemorySessionStore::with_token(
        verifier.issue(&rider, chrono::Duration::hours(1)).unwrap(),
    ));
    let rider_client = RemoteClient::new(base_url.clone(), Role::Rider, rider_session.clone());

    let driver = User::new_driver(Uuid::new_v4());
    let driver_session = Arc::new(MemorySessionStore::with_token(
        verifier.issue(&driver, chrono::Duration::hours(1)).unwrap(),
    ));
    let driver_client = RemoteClient::new(base_url.clone(), Role::Driver, driver_session);

    let ride = rider_client
        .submit_request(SubmitRequestParams {
            pickup: Place::new("Mumbai CST", 19.0760, 72.8777),
            destination: Place::new("Andheri East", 19.1136, 72.8697),
            ride_type: "car".into(),
            estimated_fare: Some(114),
        })
        .await
        .unwrap();
    assert_eq!(ride.status, RideStatus::Requested);

    let requests = driver_client.list_pending_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let accepted = driver_client
        .accept_request(requests[0].id)
        .await
        .unwrap();
    assert_eq!(accepted.driver_id, Some(driver.id));

    // the second attempt crosses the wire as a conflict
    let err = driver_client
        .accept_request(requests[0].id)
        .await
        .unwrap_err();
    assert!(err.is_conflict_error());

    let current = rider_client.current_ride().await.unwrap().unwrap();
    assert_eq!(current.status, RideStatus::Accepted);

    let err = driver_client
        .complete_ride(ride.id, CompleteRideParams::default())
        .await
        .unwrap_err();
    assert!(err.is_invalid_transition_error());

    let cancelled = rider_client
        .cancel_ride(ride.id, CancelRideParams::default())
        .await
        .unwrap();
    assert_eq!(cancelled.status, RideStatus::Cancelled);

    let history = rider_client.ride_history(Page::default()).await.unwrap();
    assert_eq!(history.len(), 1);

    assert!(!driver_client.set_availability(false).await.unwrap());

    let since = chrono::Utc::now() - chrono::Duration::hours(1);
    let earnings = driver_client
        .earnings(EarningsParams { since: Some(since) })
        .await
        .unwrap();
    assert_eq!(earnings.total, 0);
    assert_eq!(earnings.completed_rides, 0);
    assert_eq!(earnings.since, Some(since));

    let err = rider_client
        .earnings(EarningsParams::default())
        .await
        .unwrap_err();
    assert!(err.is_auth_error());

    rider_session.clear();
    let err = rider_client.current_ride().await.unwrap_err();
    assert!(err.is_auth_error());
}
