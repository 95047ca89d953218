//! Client-side polling synchronization.
//!
//! Each synchronizer keeps a possibly stale projection of the authority's
//! state, refreshed by a [`PollLease`] tied to the active tab and forced
//! after every successful user action.

mod driver;
mod events;
mod guard;
mod lease;
mod reconcile;
mod rider;

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub use driver::DriverSynchronizer;
pub use events::{Event, Level, Notification, Outbox, Tab};
pub use guard::{InFlight, InFlightGuard};
pub use lease::PollLease;
pub use reconcile::{CurrentRideTracker, PendingRequestsTracker, RequestChanges, RideChange};
pub use rider::RiderSynchronizer;

use crate::client::RideClient;
use crate::entities::RideStatus;
use crate::error::Error;

/// Background reconciliation never surfaces errors; the next tick retries.
fn log_poll_error(err: &Error) {
    if err.is_transport_error() {
        tracing::warn!(code = err.code, message = %err.message, "poll failed, retrying next tick");
    } else {
        tracing::error!(code = err.code, message = %err.message, "poll failed");
    }
}

/// Turns a failed user action into one actionable notification.
fn report(outbox: &Outbox, err: &Error) {
    if err.is_conflict_error() {
        outbox.notify(Level::Warning, err.message.clone());
    } else if err.is_transport_error() {
        outbox.notify(Level::Error, "Network error, please try again");
    } else {
        outbox.notify(Level::Error, err.message.clone());
    }
}

/// Emits the single notification for an observed ride change. Returns true
/// when the view should follow the ride to the current tab.
async fn announce(client: &dyn RideClient, outbox: &Outbox, change: &RideChange) -> bool {
    match change {
        RideChange::Appeared(ride) => {
            outbox.switch_to(Tab::Current);
            outbox.notify(
                Level::Success,
                format!(
                    "{} ride: {}",
                    ride.ride_type.display_text(),
                    ride.status.display_text()
                ),
            );
            true
        }
        RideChange::Changed { ride, .. } => {
            outbox.notify(Level::Info, ride.status.display_text());
            false
        }
        RideChange::Ended { ride_id, .. } => {
            match client.find_ride(*ride_id).await {
                Ok(ride) if ride.status == RideStatus::Completed => {
                    outbox.notify(Level::Success, ride.status.display_text())
                }
                Ok(ride) => outbox.notify(
                    Level::Warning,
                    format!("Ride {}", ride.status.display_text().to_lowercase()),
                ),
                Err(err) => {
                    log_poll_error(&err);
                    outbox.notify(Level::Info, "Ride ended");
                }
            }
            false
        }
    }
}

/// Spawns a lease that ticks `owner` through a weak reference, so the loop
/// ends on its own once the owner is gone.
fn poll_with<S, F, Fut>(owner: &Arc<S>, period: Duration, tick: F) -> PollLease
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let owner = Arc::downgrade(owner);

    PollLease::spawn(period, move || {
        let pending = owner.upgrade().map(&tick);

        async move {
            match pending {
                Some(pending) => {
                    pending.await;
                    ControlFlow::Continue(())
                }
                None => ControlFlow::Break(()),
            }
        }
    })
}

/// The lease for whichever tab is currently active.
#[derive(Default)]
struct ActiveLease {
    slot: Mutex<Option<(Tab, PollLease)>>,
}

impl ActiveLease {
    fn lock(&self) -> MutexGuard<'_, Option<(Tab, PollLease)>> {
        match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn tab(&self) -> Option<Tab> {
        self.lock()
            .as_ref()
            .filter(|(_, lease)| lease.is_active())
            .map(|(tab, _)| *tab)
    }

    fn replace(&self, tab: Tab, lease: PollLease) {
        let previous = self.lock().replace((tab, lease));
        drop(previous);
    }

    fn clear(&self) -> Option<PollLease> {
        self.lock().take().map(|(_, lease)| lease)
    }
}

#[cfg(test)]
pub(crate) fn drain(rx: &async_channel::Receiver<Event>) -> Vec<Event> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}
