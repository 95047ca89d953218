mod local;
#[cfg(test)]
mod outage;
mod remote;
mod session;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{
    CancelRideParams, CompleteRideParams, Earnings, EarningsParams, EstimateFareParams, Page,
    RateRideParams, SubmitRequestParams, UpdateStatusParams,
};
use crate::entities::{Ride, RideRequest};
use crate::error::Error;
use crate::fare::FareEstimate;

pub use local::LocalClient;
pub use remote::RemoteClient;
pub use session::{MemorySessionStore, SessionStore};

#[cfg(test)]
pub(crate) use local::local_client;
#[cfg(test)]
pub(crate) use outage::OutageClient;

/// Which side of the app a client speaks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Rider,
    Driver,
}

impl Role {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Rider => "rider",
            Self::Driver => "driver",
        }
    }
}

/// The ride operations as seen by one signed-in actor.
#[async_trait]
pub trait RideClient: Send + Sync {
    async fn estimate_fare(&self, params: EstimateFareParams) -> Result<FareEstimate, Error>;

    async fn submit_request(&self, params: SubmitRequestParams) -> Result<Ride, Error>;

    async fn find_ride(&self, id: Uuid) -> Result<Ride, Error>;

    async fn current_ride(&self) -> Result<Option<Ride>, Error>;

    async fn ride_history(&self, page: Page) -> Result<Vec<Ride>, Error>;

    async fn cancel_ride(&self, id: Uuid, params: CancelRideParams) -> Result<Ride, Error>;

    async fn rate_ride(&self, id: Uuid, params: RateRideParams) -> Result<(), Error>;

    async fn list_pending_requests(&self) -> Result<Vec<RideRequest>, Error>;

    async fn accept_request(&self, request_id: Uuid) -> Result<Ride, Error>;

    async fn decline_request(&self, request_id: Uuid) -> Result<(), Error>;

    async fn update_status(&self, id: Uuid, params: UpdateStatusParams) -> Result<Ride, Error>;

    async fn complete_ride(&self, id: Uuid, params: CompleteRideParams) -> Result<Ride, Error>;

    async fn set_availability(&self, available: bool) -> Result<bool, Error>;

    async fn earnings(&self, params: EarningsParams) -> Result<Earnings, Error>;
}
