use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    announce, log_poll_error, poll_with, report, ActiveLease, CurrentRideTracker, InFlight, Level,
    Outbox, PendingRequestsTracker, Tab,
};
use crate::api::{
    CancelRideParams, CompleteRideParams, Earnings, EarningsParams, RateRideParams,
    UpdateStatusParams,
};
use crate::client::RideClient;
use crate::entities::{Ride, RideRequest, RideStatus};
use crate::error::Error;

#[derive(Debug, Default)]
struct DriverView {
    current: CurrentRideTracker,
    requests: PendingRequestsTracker,
    earnings: Option<Earnings>,
}

/// Keeps a driver's pending requests and current ride in step with the
/// authority.
///
/// The requests tab polls pending requests and the current tab polls the
/// current ride. Only one refresh runs at a time: ticks skip while another
/// refresh holds the view, forced refreshes wait for it.
///
/// Availability is tracked twice. `available` is what the driver sees and
/// flips as soon as they toggle; `confirmed` only changes once the authority
/// answers, and it alone decides whether polling lists requests.
pub struct DriverSynchronizer {
    client: Arc<dyn RideClient>,
    outbox: Outbox,
    period: Duration,
    in_flight: InFlight,
    available: AtomicBool,
    confirmed: AtomicBool,
    view: Mutex<DriverView>,
    lease: ActiveLease,
}

impl DriverSynchronizer {
    pub fn new(client: Arc<dyn RideClient>, outbox: Outbox, period: Duration) -> Arc<Self> {
        Arc::new(Self {
            client,
            outbox,
            period,
            in_flight: InFlight::default(),
            available: AtomicBool::new(true),
            confirmed: AtomicBool::new(true),
            view: Mutex::new(DriverView::default()),
            lease: ActiveLease::default(),
        })
    }

    /// Starts polling for `tab`, replacing the lease of any other tab.
    pub fn activate(self: &Arc<Self>, tab: Tab) {
        if self.lease.tab() == Some(tab) {
            return;
        }

        tracing::debug!(?tab, "driver polling activated");

        let lease = poll_with(self, self.period, move |this: Arc<Self>| async move {
            this.tick(tab).await
        });

        self.lease.replace(tab, lease);
    }

    pub fn deactivate(&self) {
        if self.lease.clear().is_some() {
            tracing::debug!("driver polling stopped");
        }
    }

    pub fn active_tab(&self) -> Option<Tab> {
        self.lease.tab()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.is_busy()
    }

    pub async fn pending_requests(&self) -> Vec<RideRequest> {
        self.view.lock().await.requests.pending().to_vec()
    }

    pub async fn current_ride(&self) -> Option<Ride> {
        self.view.lock().await.current.ride().cloned()
    }

    pub async fn earnings(&self) -> Option<Earnings> {
        self.view.lock().await.earnings.clone()
    }

    /// Loads the earnings summary for `params` and keeps it for display.
    pub async fn refresh_earnings(&self, params: EarningsParams) -> Result<Earnings, Error> {
        let earnings = self.client.earnings(params).await?;
        self.view.lock().await.earnings = Some(earnings.clone());

        Ok(earnings)
    }

    /// Out-of-cycle refresh of both projections.
    pub async fn refresh(self: &Arc<Self>) -> Result<(), Error> {
        let mut view = self.view.lock().await;

        self.refresh_current(&mut view).await?;
        self.refresh_requests(&mut view).await
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
            Tab::Requests => self.refresh_requests(&mut view).await,
            Tab::Current => self.refresh_current(&mut view).await,
            Tab::Book | Tab::History => Ok(()),
        };

        if let Err(err) = result {
            log_poll_error(&err);
        }
    }

    async fn refresh_requests(&self, view: &mut DriverView) -> Result<(), Error> {
        if !self.confirmed.load(Ordering::SeqCst) {
            view.requests.reset();
            return Ok(());
        }

        let snapshot = self.client.list_pending_requests().await?;
        let changes = view.requests.observe(snapshot);

        match changes.arrived.as_slice() {
            [] => (),
            [request] => self.outbox.notify(
                Level::Info,
                format!(
                    "New {} ride request, fare {}",
                    request.ride_type.display_text(),
                    request.estimated_fare
                ),
            ),
            arrived => self
                .outbox
                .notify(Level::Info, format!("{} new ride requests", arrived.len())),
        }

        if !changes.resolved.is_empty() {
            tracing::debug!(count = changes.resolved.len(), "requests resolved elsewhere");
        }

        Ok(())
    }

    async fn refresh_current(self: &Arc<Self>, view: &mut DriverView) -> Result<(), Error> {
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

    async fn after_action(self: &Arc<Self>) {
        if let Err(err) = self.refresh().await {
            log_poll_error(&err);
        }
    }

    async fn act<T, F>(self: &Arc<Self>, action: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let _guard = self.in_flight.try_acquire()?;

        match action.await {
            Ok(value) => {
                self.after_action().await;
                Ok(value)
            }
            Err(err) => {
                report(&self.outbox, &err);
                Err(err)
            }
        }
    }

    /// Claims a pending request. Losing the race notifies the conflict and
    /// drops the request from the local list.
    #[tracing::instrument(skip(self))]
    pub async fn accept(self: &Arc<Self>, request_id: Uuid) -> Result<Ride, Error> {
        let _guard = self.in_flight.try_acquire()?;

        match self.client.accept_request(request_id).await {
            Ok(ride) => {
                self.view.lock().await.requests.remove(request_id);
                self.after_action().await;
                Ok(ride)
            }
            Err(err) => {
                report(&self.outbox, &err);

                if err.is_conflict_error() || err.is_not_found_error() {
                    let mut view = self.view.lock().await;
                    view.requests.remove(request_id);

                    if let Err(err) = self.refresh_requests(&mut view).await {
                        log_poll_error(&err);
                    }
                }

                Err(err)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn decline(self: &Arc<Self>, request_id: Uuid) -> Result<(), Error> {
        let _guard = self.in_flight.try_acquire()?;

        if let Err(err) = self.client.decline_request(request_id).await {
            report(&self.outbox, &err);
            return Err(err);
        }

        self.view.lock().await.requests.remove(request_id);
        self.after_action().await;

        Ok(())
    }

    #[tracing::instrument(skip(self, otp))]
    pub async fn update_status(
        self: &Arc<Self>,
        ride_id: Uuid,
        status: RideStatus,
        otp: Option<String>,
    ) -> Result<Ride, Error> {
        let params = UpdateStatusParams {
            status: status.name().to_string(),
            otp,
        };

        self.act(self.client.update_status(ride_id, params)).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete(
        self: &Arc<Self>,
        ride_id: Uuid,
        final_fare: Option<i64>,
    ) -> Result<Ride, Error> {
        let ride = self
            .act(
                self.client
                    .complete_ride(ride_id, CompleteRideParams { final_fare }),
            )
            .await?;

        let window = self.view.lock().await.earnings.as_ref().map(|e| e.since);
        if let Some(since) = window {
            if let Err(err) = self.refresh_earnings(EarningsParams { since }).await {
                log_poll_error(&err);
            }
        }

        Ok(ride)
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
    pub async fn rate_rider(
        self: &Arc<Self>,
        ride_id: Uuid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<(), Error> {
        self.act(
            self.client
                .rate_ride(ride_id, RateRideParams { rating, comment }),
        )
        .await
    }

    /// Shows the new availability before the call lands and puts the previous
    /// value back if it fails. Polling keeps following the last confirmed
    /// value meanwhile. Going offline clears the pending list.
    #[tracing::instrument(skip(self))]
    pub async fn set_availability(self: &Arc<Self>, available: bool) -> Result<bool, Error> {
        let _guard = self.in_flight.try_acquire()?;
        let previous = self.available.swap(available, Ordering::SeqCst);

        match self.client.set_availability(available).await {
            Ok(confirmed) => {
                self.confirmed.store(confirmed, Ordering::SeqCst);
                self.available.store(confirmed, Ordering::SeqCst);

                if confirmed {
                    self.outbox.notify(Level::Success, "You are now online");
                    let mut view = self.view.lock().await;
                    if let Err(err) = self.refresh_requests(&mut view).await {
                        log_poll_error(&err);
                    }
                } else {
                    self.view.lock().await.requests.reset();
                    self.outbox.notify(Level::Info, "You are now offline");
                }

                Ok(confirmed)
            }
            Err(err) => {
                self.available.store(previous, Ordering::SeqCst);
                report(&self.outbox, &err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
use crate::{
    api::{DynAPI, SubmitRequestParams},
    auth::{TokenVerifier, User},
    client::{LocalClient, OutageClient},
    entities::Place,
    sync::{drain, Event, Notification},
};

#[cfg(test)]
struct Harness {
    api: DynAPI,
    verifier: TokenVerifier,
}

#[cfg(test)]
impl Harness {
    fn new() -> Self {
        Self {
            api: Arc::new(crate::engine::test_engine()) as DynAPI,
            verifier: TokenVerifier::new("test_secret_key"),
        }
    }

    fn client(&self, user: &User) -> Arc<LocalClient> {
        Arc::new(crate::client::local_client(
            self.api.clone(),
            &self.verifier,
            user,
        ))
    }

    fn driver(&self) -> (User, Arc<DriverSynchronizer>, async_channel::Receiver<Event>) {
        let user = User::new_driver(Uuid::new_v4());
        let (outbox, rx) = Outbox::channel();
        let sync = DriverSynchronizer::new(self.client(&user), outbox, Duration::from_secs(10));

        (user, sync, rx)
    }

    fn unreliable_driver(
        &self,
        period: Duration,
        availability_delay: Duration,
    ) -> (Arc<OutageClient>, Arc<DriverSynchronizer>, async_channel::Receiver<Event>) {
        let user = User::new_driver(Uuid::new_v4());
        let client = Arc::new(
            OutageClient::new(self.client(&user)).with_availability_delay(availability_delay),
        );
        let (outbox, rx) = Outbox::channel();
        let sync = DriverSynchronizer::new(client.clone(), outbox, period);

        (client, sync, rx)
    }

    async fn submit(&self) -> (User, Ride) {
        let rider = User::new_rider(Uuid::new_v4());

        let ride = self
            .client(&rider)
            .submit_request(SubmitRequestParams {
                pickup: Place::new("Mumbai CST", 19.0760, 72.8777),
                destination: Place::new("Andheri East", 19.1136, 72.8697),
                ride_type: "car".into(),
                estimated_fare: None,
            })
            .await
            .unwrap();

        (rider, ride)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn racing_drivers_converge_on_one_winner() {
    let harness = Harness::new();
    let (_, ride) = harness.submit().await;
    let (d1, s1, rx1) = harness.driver();
    let (d2, s2, rx2) = harness.driver();

    s1.refresh().await.unwrap();
    s2.refresh().await.unwrap();
    assert_eq!(s1.pending_requests().await.len(), 1);
    assert_eq!(s2.pending_requests().await.len(), 1);
    drain(&rx1);
    drain(&rx2);

    let (r1, r2) = tokio::join!(s1.accept(ride.request_id), s2.accept(ride.request_id));

    let (winner, winner_rx, loser, loser_rx, err, won) = match (r1, r2) {
        (Ok(won), Err(err)) => (d1, rx1, s2, rx2, err, won),
        (Err(err), Ok(won)) => (d2, rx2, s1, rx1, err, won),
        other => panic!("expected exactly one winner, got {:?}", other),
    };

    assert_eq!(won.driver_id, Some(winner.id));
    assert!(err.is_conflict_error());
    assert_eq!(err.message, crate::engine::ALREADY_ACCEPTED);

    let events = drain(&winner_rx);
    assert_eq!(
        events
            .iter()
            .filter(|event| **event == Event::TabChanged(Tab::Current))
            .count(),
        1
    );

    assert!(loser.pending_requests().await.is_empty());
    assert!(loser.current_ride().await.is_none());
    assert!(drain(&loser_rx).contains(&Event::Notify(Notification {
        level: Level::Warning,
        message: crate::engine::ALREADY_ACCEPTED.into(),
    })));
}

#[test]
fn unchanged_snapshots_switch_the_view_once() {
    tokio_test::block_on(async {
        let harness = Harness::new();
        let (_, ride) = harness.submit().await;
        let (driver, sync, rx) = harness.driver();

        sync.refresh().await.unwrap();
        sync.accept(ride.request_id).await.unwrap();
        sync.refresh().await.unwrap();
        sync.refresh().await.unwrap();

        let events = drain(&rx);
        let switches = events
            .iter()
            .filter(|event| matches!(event, Event::TabChanged(_)))
            .count();
        let arrivals = events
            .iter()
            .filter(|event| matches!(event, Event::Notify(n) if n.message.starts_with("New ")))
            .count();

        assert_eq!(switches, 1);
        assert_eq!(arrivals, 1);
        assert_eq!(
            sync.current_ride().await.and_then(|ride| ride.driver_id),
            Some(driver.id)
        );
    });
}

#[test]
fn ride_progress_is_announced_and_completion_ends_it() {
    tokio_test::block_on(async {
        let harness = Harness::new();
        let (_, ride) = harness.submit().await;
        let (_, sync, rx) = harness.driver();

        let accepted = sync.accept(ride.request_id).await.unwrap();
        let otp = accepted.otp.clone();

        let err = sync.complete(ride.id, None).await.unwrap_err();
        assert!(err.is_invalid_transition_error());

        sync.update_status(ride.id, RideStatus::DriverOnWay, None)
            .await
            .unwrap();
        sync.update_status(ride.id, RideStatus::RiderPickedUp, otp)
            .await
            .unwrap();
        let completed = sync.complete(ride.id, None).await.unwrap();
        assert_eq!(completed.final_fare, Some(ride.estimated_fare));

        assert!(sync.current_ride().await.is_none());
        assert!(!sync.is_processing());

        let messages: Vec<String> = drain(&rx)
            .into_iter()
            .filter_map(|event| match event {
                Event::Notify(n) => Some(n.message),
                _ => None,
            })
            .collect();

        assert!(messages.contains(&"Driver On The Way".to_string()));
        assert!(messages.contains(&"In Progress".to_string()));
        assert!(messages.contains(&"Completed".to_string()));

        sync.rate_rider(ride.id, 5, None).await.unwrap();
    });
}

#[test]
fn declined_requests_leave_the_list() {
    tokio_test::block_on(async {
        let harness = Harness::new();
        let (_, ride) = harness.submit().await;
        let (_, sync, _rx) = harness.driver();

        sync.refresh().await.unwrap();
        sync.decline(ride.request_id).await.unwrap();
        assert!(sync.pending_requests().await.is_empty());

        sync.refresh().await.unwrap();
        assert!(sync.pending_requests().await.is_empty());
    });
}

#[test]
fn failed_availability_toggle_reverts() {
    tokio_test::block_on(async {
        let harness = Harness::new();
        harness.submit().await;

        let driver = User::new_driver(Uuid::new_v4());
        let token = harness
            .verifier
            .issue(&driver, chrono::Duration::hours(1))
            .unwrap();
        let session = Arc::new(crate::client::MemorySessionStore::with_token(token));
        let client = Arc::new(LocalClient::new(
            harness.api.clone(),
            harness.verifier.clone(),
            session.clone(),
        ));
        let (outbox, _rx) = Outbox::channel();
        let sync = DriverSynchronizer::new(client, outbox, Duration::from_secs(10));

        sync.refresh().await.unwrap();
        assert_eq!(sync.pending_requests().await.len(), 1);

        use crate::client::SessionStore;
        session.clear();
        let err = sync.set_availability(false).await.unwrap_err();
        assert!(err.is_auth_error());
        assert!(sync.is_available());
        assert_eq!(sync.pending_requests().await.len(), 1);
    });
}

#[test]
fn going_offline_clears_pending_requests() {
    tokio_test::block_on(async {
        let harness = Harness::new();
        harness.submit().await;
        let (_, sync, _rx) = harness.driver();

        sync.refresh().await.unwrap();
        assert_eq!(sync.pending_requests().await.len(), 1);

        assert!(!sync.set_availability(false).await.unwrap());
        assert!(!sync.is_available());
        assert!(sync.pending_requests().await.is_empty());

        sync.refresh().await.unwrap();
        assert!(sync.pending_requests().await.is_empty());

        assert!(sync.set_availability(true).await.unwrap());
        assert_eq!(sync.pending_requests().await.len(), 1);
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn polling_follows_the_active_tab() {
    let harness = Harness::new();
    harness.submit().await;
    let (_, sync, _rx) = harness.driver();

    sync.activate(Tab::Requests);
    assert_eq!(sync.active_tab(), Some(Tab::Requests));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sync.pending_requests().await.len(), 1);

    sync.deactivate();
    assert_eq!(sync.active_tab(), None);
}

#[cfg(test)]
fn arrivals(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, Event::Notify(n) if n.message.starts_with("New ")))
        .count()
}

#[cfg(test)]
fn network_error() -> Event {
    Event::Notify(Notification {
        level: Level::Error,
        message: "Network error, please try again".into(),
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_toggle_while_polling_announces_requests_once() {
    let harness = Harness::new();
    harness.submit().await;
    let (client, sync, rx) =
        harness.unreliable_driver(Duration::from_millis(30), Duration::from_millis(150));

    sync.activate(Tab::Requests);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(sync.pending_requests().await.len(), 1);

    client.set_availability_down(true);
    let err = sync.set_availability(false).await.unwrap_err();
    assert!(err.is_transport_error());
    assert!(sync.is_available());
    assert!(!sync.is_processing());
    assert_eq!(sync.pending_requests().await.len(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    sync.deactivate();

    let events = drain(&rx);
    assert_eq!(arrivals(&events), 1);
    assert!(events.contains(&network_error()));
}

#[tokio::test(flavor = "multi_thread")]
async fn toggle_shows_the_new_value_before_confirmation() {
    let harness = Harness::new();
    let (_, sync, _rx) =
        harness.unreliable_driver(Duration::from_secs(10), Duration::from_millis(100));

    let toggle = tokio::spawn({
        let sync = sync.clone();
        async move { sync.set_availability(false).await }
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!sync.is_available());
    assert!(sync.is_processing());

    assert!(!toggle.await.unwrap().unwrap());
    assert!(!sync.is_available());
    assert!(!sync.is_processing());
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_failures_while_polling_stay_silent() {
    let harness = Harness::new();
    harness.submit().await;
    let (client, sync, rx) = harness.unreliable_driver(Duration::from_millis(20), Duration::ZERO);

    client.set_down(true);
    sync.activate(Tab::Requests);
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(sync.pending_requests().await.is_empty());
    assert!(!drain(&rx)
        .iter()
        .any(|event| matches!(event, Event::Notify(_))));

    client.set_down(false);
    tokio::time::sleep(Duration::from_millis(80)).await;
    sync.deactivate();

    assert_eq!(sync.pending_requests().await.len(), 1);
    assert_eq!(arrivals(&drain(&rx)), 1);
}

#[test]
fn transport_failure_during_an_action_is_reported_once() {
    tokio_test::block_on(async {
        let harness = Harness::new();
        let (_, ride) = harness.submit().await;
        let (client, sync, rx) =
            harness.unreliable_driver(Duration::from_secs(10), Duration::ZERO);

        sync.refresh().await.unwrap();
        drain(&rx);

        client.set_down(true);
        let err = sync.accept(ride.request_id).await.unwrap_err();
        assert!(err.is_transport_error());
        assert!(!sync.is_processing());
        assert_eq!(sync.pending_requests().await.len(), 1);

        let err = sync.set_availability(false).await.unwrap_err();
        assert!(err.is_transport_error());
        assert!(sync.is_available());
        assert!(!sync.is_processing());

        assert_eq!(drain(&rx), vec![network_error(), network_error()]);

        client.set_down(false);
        let accepted = sync.accept(ride.request_id).await.unwrap();
        assert_eq!(accepted.status, RideStatus::Accepted);
    });
}

#[test]
fn completing_a_ride_refreshes_loaded_earnings() {
    tokio_test::block_on(async {
        let harness = Harness::new();
        let (_, ride) = harness.submit().await;
        let (_, sync, _rx) = harness.driver();

        assert!(sync.earnings().await.is_none());
        let earnings = sync
            .refresh_earnings(EarningsParams::default())
            .await
            .unwrap();
        assert_eq!(earnings.total, 0);

        let accepted = sync.accept(ride.request_id).await.unwrap();
        sync.update_status(ride.id, RideStatus::DriverOnWay, None)
            .await
            .unwrap();
        sync.update_status(ride.id, RideStatus::RiderPickedUp, accepted.otp)
            .await
            .unwrap();
        sync.complete(ride.id, Some(150)).await.unwrap();

        let earnings = sync.earnings().await.unwrap();
        assert_eq!(earnings.total, 150);
        assert_eq!(earnings.completed_rides, 1);
    });
}
