use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::User;
use crate::entities::{Place, Ride, RideRequest, RideType};
use crate::error::{upstream_error, Error};
use crate::fare::FareEstimate;

pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitRequestParams {
    pub pickup: Place,
    pub destination: Place,
    pub ride_type: String,
    #[serde(default)]
    pub estimated_fare: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EstimateFareParams {
    pub pickup: Place,
    pub destination: Place,
    pub ride_type: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateStatusParams {
    pub status: String,
    #[serde(default)]
    pub otp: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompleteRideParams {
    #[serde(default)]
    pub final_fare: Option<i64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CancelRideParams {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub cancelled_by: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateRideParams {
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AvailabilityParams {
    pub available: bool,
}

/// Earnings window. Without `since` every completed ride counts.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct EarningsParams {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Earnings {
    pub total: i64,
    pub completed_rides: u32,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default = "Page::first")]
    pub page: u32,
    #[serde(default = "Page::default_limit")]
    pub limit: u32,
}

impl Page {
    pub const MAX_LIMIT: u32 = 100;

    fn first() -> u32 {
        1
    }

    fn default_limit() -> u32 {
        10
    }

    /// Clamped (offset, limit) pair for store queries.
    pub fn window(&self) -> (u32, u32) {
        let limit = self.limit.clamp(1, Self::MAX_LIMIT);
        let page = self.page.max(1);

        ((page - 1) * limit, limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: Self::first(),
            limit: Self::default_limit(),
        }
    }
}

/// Single canonical success body for every endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            data,
        }
    }

    pub fn into_data(self) -> Result<T, Error> {
        if self.version != ENVELOPE_VERSION {
            tracing::warn!(version = self.version, "unsupported response envelope");
            return Err(upstream_error());
        }

        Ok(self.data)
    }
}

#[async_trait]
pub trait RideAPI {
    async fn submit_request(&self, user: User, params: SubmitRequestParams) -> Result<Ride, Error>;
    async fn find_ride(&self, user: User, id: Uuid) -> Result<Ride, Error>;
    async fn current_ride(&self, user: User) -> Result<Option<Ride>, Error>;
    async fn ride_history(&self, user: User, page: Page) -> Result<Vec<Ride>, Error>;
    async fn update_status(
        &self,
        user: User,
        id: Uuid,
        params: UpdateStatusParams,
    ) -> Result<Ride, Error>;
    async fn complete_ride(
        &self,
        user: User,
        id: Uuid,
        params: CompleteRideParams,
    ) -> Result<Ride, Error>;
    async fn cancel_ride(&self, user: User, id: Uuid, params: CancelRideParams)
        -> Result<Ride, Error>;
    async fn rate_ride(&self, user: User, id: Uuid, params: RateRideParams) -> Result<(), Error>;
}

#[async_trait]
pub trait RideRequestAPI {
    async fn list_pending_requests(&self, user: User) -> Result<Vec<RideRequest>, Error>;
    async fn accept_request(&self, user: User, request_id: Uuid) -> Result<Ride, Error>;
    async fn decline_request(&self, user: User, request_id: Uuid) -> Result<(), Error>;
    async fn expire_requests(&self, user: User) -> Result<Vec<Ride>, Error>;
}

#[async_trait]
pub trait DriverAPI {
    async fn set_availability(&self, user: User, params: AvailabilityParams) -> Result<bool, Error>;
    async fn earnings(&self, user: User, params: EarningsParams) -> Result<Earnings, Error>;
}

#[async_trait]
pub trait FareAPI {
    async fn estimate_fare(
        &self,
        user: User,
        params: EstimateFareParams,
    ) -> Result<FareEstimate, Error>;
}

pub trait API: RideAPI + RideRequestAPI + DriverAPI + FareAPI {}

pub type DynAPI = Arc<dyn API + Send + Sync>;

pub fn parse_ride_type(ride_type: &str) -> Result<RideType, Error> {
    ride_type.trim().to_ascii_lowercase().parse()
}

#[test]
fn page_window() {
    assert_eq!(Page::default().window(), (0, 10));
    assert_eq!(Page { page: 3, limit: 5 }.window(), (10, 5));
    assert_eq!(Page { page: 0, limit: 0 }.window(), (0, 1));
    assert_eq!(Page { page: 2, limit: 500 }.window(), (100, 100));
}

#[test]
fn envelope_version_is_checked() {
    let envelope: Envelope<u32> = serde_json::from_str(r#"{"version":1,"data":7}"#).unwrap();
    assert_eq!(envelope.into_data().unwrap(), 7);

    let envelope: Envelope<u32> = serde_json::from_str(r#"{"version":2,"data":7}"#).unwrap();
    assert!(envelope.into_data().unwrap_err().is_transport_error());

    let missing: Result<Envelope<u32>, _> = serde_json::from_str(r#"{"currentRide":7}"#);
    assert!(missing.is_err());
}

#[test]
fn ride_type_input_is_normalized() {
    assert_eq!(parse_ride_type(" Car ").unwrap(), RideType::Car);
    assert!(parse_ride_type("scooter").unwrap_err().is_validation_error());
}
