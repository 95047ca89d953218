use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    announce, log_poll_error, poll_with, report, ActiveLease, CurrentRideTracker, InFlight, Level,
    Outbox, Tab,
};
use crate::api::{parse_ride_type, CancelRideParams, Page, RateRideParams, SubmitRequestParams};
use crate::client::RideClient;
use crate::entities::{validate_route, Place, Ride};
use crate::error::Error;
use crate::fare::{FareEstimate, FareSchedule};

#[derive(Debug, Default)]
struct RiderView {
    current: CurrentRideTracker,
    history: Vec<Ride>,
}

/// Keeps a rider's current ride and history in step with the authority.
/// The book and current tabs poll the current ride.
pub struct RiderSynchronizer {
    client: Arc<dyn RideClient>,
    outbox: Outbox,
    period: Duration,
    fares: FareSchedule,
    in_flight: InFlight,
    view: Mutex<RiderView>,
    lease: ActiveLease,
}

impl RiderSynchronizer {
    pub fn new(
        client: Arc<dyn RideClient>,
        outbox: Outbox,
        period: Duration,
        fares: FareSchedule,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            outbox,
            period,
            fares,
            in_flight: InFlight::default(),
            view: Mutex::new(RiderView::default()),
            lease: ActiveLease::default(),
        })
    }

    pub fn activate(self: &Arc<Self>, tab: Tab) {
        if self.lease.tab() == Some(tab) {
            return;
        }

        tracing::debug!(?tab, "rider polling activated");

        let lease = poll_with(self, self.period, move |this: Arc<Self>| async move {
            this.tick(tab).await
        });

        self.lease.replace(tab, lease);
    }

    pub fn deactivate(&self) {
        if self.lease.clear().is_some() {
            tracing::debug!("rider polling stopped");
        }
    }

    pub fn active_tab(&self) -> Option<Tab> {
        self.lease.tab()
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.is_busy()
    }

    pub async fn current_ride(&self) -> Option<Ride> {
        self.view.lock().await.current.ride().cloned()
    }

    pub async fn history(&self) -> Vec<Ride> {
        self.view.lock().await.history.clone()
    }

    /// Local quote shown before booking. The authority recomputes its own.
    pub fn estimate(
        &self,
        pickup: &Place,
        destination: &Place,
        ride_type: &str,
    ) -> Result<FareEstimate, Error> {
        let ride_type = parse_ride_type(ride_type)?;
        validate_route(pickup, destination)?;

        Ok(self
            .fares
            .estimate(pickup.coordinates(), destination.coordinates(), ride_type))
    }

    pub async fn refresh(self: &Arc<Self>) -> Result<(), Error> {
        let mut view = self.view.lock().await;

        self.refresh_current(&mut view).await
    }

    pub async fn refresh_history(&self, page: Page) -> Result<Vec<Ride>, Error> {
        let rides = self.client.ride_history(page).await?;
        self.view.lock().await.history = rides.clone();

        Ok(rides)
    }

    async fn tick(self: &Arc<Self>, tab: Tab) {
        let mut view = match self.view.try_lock() {
            Ok(view) => view,
            Err(_) => {
                tracing::debug!("refresh in progress, skipping tick");
                return;
            }
        };

        let result = match tab {
            Tab::Book | Tab::Current => self.refresh_current(&mut view).await,
            Tab::Requests | Tab::History => Ok(()),
        };

        if let Err(err) = result {
            log_poll_error(&err);
        }
    }

    async fn refresh_current(self: &Arc<Self>, view: &mut RiderView) -> Result<(), Error> {
        let snapshot = self.client.current_ride().await?;

        if let Some(change) = view.current.observe(snapshot) {
            if announce(self.client.as_ref(), &self.outbox, &change).await
                && self.lease.tab().is_some()
            {
                self.activate(Tab::Current);
            }
        }

        Ok(())
    }

    async fn act<T, F>(self: &Arc<Self>, action: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let _guard = self.in_flight.try_acquire()?;

        match action.await {
            Ok(value) => {
                if let Err(err) = self.refresh().await {
                    log_poll_error(&err);
                }
                Ok(value)
            }
            Err(err) => {
                report(&self.outbox, &err);
                Err(err)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn request_ride(
        self: &Arc<Self>,
        pickup: Place,
        destination: Place,
        ride_type: &str,
    ) -> Result<Ride, Error> {
        let estimate = match self.estimate(&pickup, &destination, ride_type) {
            Ok(estimate) => estimate,
            Err(err) => {
                report(&self.outbox, &err);
                return Err(err);
            }
        };

        let params = SubmitRequestParams {
            pickup,
            destination,
            ride_type: estimate.ride_type.name().to_string(),
            estimated_fare: Some(estimate.estimated_fare),
        };

        self.act(self.client.submit_request(params)).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(self: &Arc<Self>, ride_id: Uuid, reason: Option<String>) -> Result<Ride, Error> {
        let params = CancelRideParams {
            reason,
            cancelled_by: None,
        };

        self.act(self.client.cancel_ride(ride_id, params)).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn rate_driver(
        self: &Arc<Self>,
        ride_id: Uuid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<(), Error> {
        self.act(
            self.client
                .rate_ride(ride_id, RateRideParams { rating, comment }),
        )
        .await?;

        self.outbox.notify(Level::Success, "Thanks for rating your driver");

        Ok(())
    }
}

#[cfg(test)]
use crate::{
    api::DynAPI,
    auth::{TokenVerifier, User},
    client::OutageClient,
    entities::{CancelledBy, RideStatus},
    sync::{drain, Event, Notification},
};

#[cfg(test)]
fn rider_and_api() -> (User, Arc<RiderSynchronizer>, async_channel::Receiver<Event>, DynAPI) {
    let api = Arc::new(crate::engine::test_engine()) as DynAPI;
    let verifier = TokenVerifier::new("test_secret_key");
    let rider = User::new_rider(Uuid::new_v4());
    let client = Arc::new(crate::client::local_client(api.clone(), &verifier, &rider));
    let (outbox, rx) = Outbox::channel();
    let sync = RiderSynchronizer::new(
        client,
        outbox,
        Duration::from_secs(10),
        FareSchedule::default(),
    );

    (rider, sync, rx, api)
}

#[cfg(test)]
fn unreliable_rider(
    period: Duration,
) -> (Arc<OutageClient>, Arc<RiderSynchronizer>, async_channel::Receiver<Event>) {
    let api = Arc::new(crate::engine::test_engine()) as DynAPI;
    let verifier = TokenVerifier::new("test_secret_key");
    let rider = User::new_rider(Uuid::new_v4());
    let client = Arc::new(OutageClient::new(Arc::new(crate::client::local_client(
        api, &verifier, &rider,
    ))));
    let (outbox, rx) = Outbox::channel();
    let sync = RiderSynchronizer::new(client.clone(), outbox, period, FareSchedule::default());

    (client, sync, rx)
}

#[cfg(test)]
fn cst() -> Place {
    Place::new("Mumbai CST", 19.0760, 72.8777)
}

#[cfg(test)]
fn andheri() -> Place {
    Place::new("Andheri East", 19.1136, 72.8697)
}

#[test]
fn local_estimate_matches_the_tariff() {
    let (_, sync, _, _) = rider_and_api();

    let estimate = sync.estimate(&cst(), &andheri(), "car").unwrap();
    assert_eq!(estimate.estimated_fare, 114);
    assert_eq!(estimate, sync.estimate(&cst(), &andheri(), "car").unwrap());

    assert!(sync
        .estimate(&cst(), &andheri(), "helicopter")
        .unwrap_err()
        .is_validation_error());
    assert!(sync
        .estimate(&cst(), &cst(), "car")
        .unwrap_err()
        .is_validation_error());
}

#[test]
fn requesting_a_ride_switches_to_current_once() {
    tokio_test::block_on(async {
        let (rider, sync, rx, _) = rider_and_api();

        let ride = sync.request_ride(cst(), andheri(), "Car").await.unwrap();
        assert_eq!(ride.status, RideStatus::Requested);
        assert_eq!(ride.rider_id, rider.id);
        assert_eq!(ride.estimated_fare, 114);

        sync.refresh().await.unwrap();
        sync.refresh().await.unwrap();

        let events = drain(&rx);
        assert_eq!(
            events
                .iter()
                .filter(|event| matches!(event, Event::TabChanged(Tab::Current)))
                .count(),
            1
        );
        assert_eq!(sync.current_ride().await.map(|r| r.id), Some(ride.id));

        let err = sync.request_ride(cst(), andheri(), "bike").await.unwrap_err();
        assert!(err.is_conflict_error());
    });
}

#[test]
fn cancelling_moves_the_ride_to_history() {
    tokio_test::block_on(async {
        let (_, sync, rx, _) = rider_and_api();

        let ride = sync.request_ride(cst(), andheri(), "auto").await.unwrap();
        let cancelled = sync
            .cancel(ride.id, Some("changed plans".into()))
            .await
            .unwrap();

        assert_eq!(cancelled.status, RideStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Rider));
        assert!(sync.current_ride().await.is_none());

        let history = sync.refresh_history(Page::default()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(sync.history().await[0].id, ride.id);

        let err = sync.cancel(ride.id, None).await.unwrap_err();
        assert!(err.is_not_found_error());

        let events = drain(&rx);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::Notify(n) if n.message == "Ride cancelled"
        )));
    });
}

#[test]
fn rating_before_completion_is_refused() {
    tokio_test::block_on(async {
        let (_, sync, _rx, _) = rider_and_api();

        let ride = sync.request_ride(cst(), andheri(), "car").await.unwrap();

        let err = sync.rate_driver(ride.id, 5, None).await.unwrap_err();
        assert!(err.is_validation_error());
        assert!(!sync.is_processing());
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_synchronizer_ends_polling() {
    let (_, sync, rx, _) = rider_and_api();

    sync.activate(Tab::Book);
    sync.activate(Tab::Book);
    assert_eq!(sync.active_tab(), Some(Tab::Book));

    drop(sync);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(rx.is_closed());
}

#[test]
fn booking_over_a_broken_network_is_reported_once() {
    tokio_test::block_on(async {
        let (client, sync, rx) = unreliable_rider(Duration::from_secs(10));

        client.set_down(true);
        let err = sync.request_ride(cst(), andheri(), "car").await.unwrap_err();
        assert!(err.is_transport_error());
        assert!(!sync.is_processing());
        assert!(sync.current_ride().await.is_none());
        assert_eq!(
            drain(&rx),
            vec![Event::Notify(Notification {
                level: Level::Error,
                message: "Network error, please try again".into(),
            })]
        );

        client.set_down(false);
        let ride = sync.request_ride(cst(), andheri(), "car").await.unwrap();
        assert_eq!(sync.current_ride().await.map(|r| r.id), Some(ride.id));
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn polling_through_an_outage_stays_silent() {
    let (client, sync, rx) = unreliable_rider(Duration::from_millis(20));

    let ride = sync.request_ride(cst(), andheri(), "bike").await.unwrap();
    drain(&rx);

    client.set_down(true);
    sync.activate(Tab::Current);
    tokio::time::sleep(Duration::from_millis(80)).await;
    sync.deactivate();

    assert!(!drain(&rx)
        .iter()
        .any(|event| matches!(event, Event::Notify(_))));
    assert_eq!(sync.current_ride().await.map(|r| r.id), Some(ride.id));
}
