use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::RideClient;
use crate::api::{
    CancelRideParams, CompleteRideParams, Earnings, EarningsParams, EstimateFareParams, Page,
    RateRideParams, SubmitRequestParams, UpdateStatusParams,
};
use crate::entities::{Ride, RideRequest};
use crate::error::{upstream_error, Error};
use crate::fare::FareEstimate;

/// Wraps a working client and fails calls with a transport error on demand.
pub(crate) struct OutageClient {
    inner: Arc<dyn RideClient>,
    down: AtomicBool,
    availability_down: AtomicBool,
    availability_delay: Duration,
}

impl OutageClient {
    pub(crate) fn new(inner: Arc<dyn RideClient>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            availability_down: AtomicBool::new(false),
            availability_delay: Duration::ZERO,
        }
    }

    /// Availability calls wait this long before answering.
    pub(crate) fn with_availability_delay(mut self, delay: Duration) -> Self {
        self.availability_delay = delay;
        self
    }

    pub(crate) fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn set_availability_down(&self, down: bool) {
        self.availability_down.store(down, Ordering::SeqCst);
    }

    fn reachable(&self) -> Result<(), Error> {
        if self.down.load(Ordering::SeqCst) {
            return Err(upstream_error());
        }

        Ok(())
    }
}

#[async_trait]
impl RideClient for OutageClient {
    async fn estimate_fare(&self, params: EstimateFareParams) -> Result<FareEstimate, Error> {
        self.reachable()?;
        self.inner.estimate_fare(params).await
    }

    async fn submit_request(&self, params: SubmitRequestParams) -> Result<Ride, Error> {
        self.reachable()?;
        self.inner.submit_request(params).await
    }

    async fn find_ride(&self, id: Uuid) -> Result<Ride, Error> {
        self.reachable()?;
        self.inner.find_ride(id).await
    }

    async fn current_ride(&self) -> Result<Option<Ride>, Error> {
        self.reachable()?;
        self.inner.current_ride().await
    }

    async fn ride_history(&self, page: Page) -> Result<Vec<Ride>, Error> {
        self.reachable()?;
        self.inner.ride_history(page).await
    }

    async fn cancel_ride(&self, id: Uuid, params: CancelRideParams) -> Result<Ride, Error> {
        self.reachable()?;
        self.inner.cancel_ride(id, params).await
    }

    async fn rate_ride(&self, id: Uuid, params: RateRideParams) -> Result<(), Error> {
        self.reachable()?;
        self.inner.rate_ride(id, params).await
    }

    async fn list_pending_requests(&self) -> Result<Vec<RideRequest>, Error> {
        self.reachable()?;
        self.inner.list_pending_requests().await
    }

    async fn accept_request(&self, request_id: Uuid) -> Result<Ride, Error> {
        self.reachable()?;
        self.inner.accept_request(request_id).await
    }

    async fn decline_request(&self, request_id: Uuid) -> Result<(), Error> {
        self.reachable()?;
        self.inner.decline_request(request_id).await
    }

    async fn update_status(&self, id: Uuid, params: UpdateStatusParams) -> Result<Ride, Error> {
        self.reachable()?;
        self.inner.update_status(id, params).await
    }

    async fn complete_ride(&self, id: Uuid, params: CompleteRideParams) -> Result<Ride, Error> {
        self.reachable()?;
        self.inner.complete_ride(id, params).await
    }

    async fn set_availability(&self, available: bool) -> Result<bool, Error> {
        tokio::time::sleep(self.availability_delay).await;
        self.reachable()?;

        if self.availability_down.load(Ordering::SeqCst) {
            return Err(upstream_error());
        }

        self.inner.set_availability(available).await
    }

    async fn earnings(&self, params: EarningsParams) -> Result<Earnings, Error> {
        self.reachable()?;
        self.inner.earnings(params).await
    }
}
