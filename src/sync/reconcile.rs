use uuid::Uuid;

use crate::entities::{Ride, RideRequest, RideStatus};

/// What changed between the cached current ride and a fresh snapshot.
#[derive(Clone, Debug, PartialEq)]
pub enum RideChange {
    Appeared(Ride),
    Changed { ride: Ride, from: RideStatus },
    Ended { ride_id: Uuid, last_status: RideStatus },
}

/// Cached projection of the actor's current ride.
#[derive(Debug, Default)]
pub struct CurrentRideTracker {
    ride: Option<Ride>,
}

impl CurrentRideTracker {
    pub fn ride(&self) -> Option<&Ride> {
        self.ride.as_ref()
    }

    /// Replaces the cache with `snapshot` and reports the change, if any.
    /// Feeding the same snapshot again reports nothing.
    pub fn observe(&mut self, snapshot: Option<Ride>) -> Option<RideChange> {
        let previous = self.ride.as_ref().map(|ride| (ride.id, ride.status));
        self.ride = snapshot.clone();

        match (previous, snapshot) {
            (None, None) => None,
            (None, Some(ride)) => Some(RideChange::Appeared(ride)),
            (Some((ride_id, last_status)), None) => Some(RideChange::Ended {
                ride_id,
                last_status,
            }),
            (Some((id, status)), Some(ride)) if id == ride.id => {
                if status == ride.status {
                    None
                } else {
                    Some(RideChange::Changed { ride, from: status })
                }
            }
            (Some(_), Some(ride)) => Some(RideChange::Appeared(ride)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestChanges {
    pub arrived: Vec<RideRequest>,
    pub resolved: Vec<Uuid>,
}

impl RequestChanges {
    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.resolved.is_empty()
    }
}

/// Cached list of the requests a driver can still act on.
#[derive(Debug, Default)]
pub struct PendingRequestsTracker {
    pending: Vec<RideRequest>,
}

impl PendingRequestsTracker {
    pub fn pending(&self) -> &[RideRequest] {
        &self.pending
    }

    fn contains(&self, id: Uuid) -> bool {
        self.pending.iter().any(|request| request.id == id)
    }

    /// Identity is the request id; bookkeeping fields like `seen_by` may
    /// change between polls without counting as an arrival.
    pub fn observe(&mut self, snapshot: Vec<RideRequest>) -> RequestChanges {
        let arrived = snapshot
            .iter()
            .filter(|request| !self.contains(request.id))
            .cloned()
            .collect();

        let resolved = self
            .pending
            .iter()
            .map(|request| request.id)
            .filter(|id| !snapshot.iter().any(|request| request.id == *id))
            .collect();

        self.pending = snapshot;

        RequestChanges { arrived, resolved }
    }

    /// Drops a request locally after the driver acted on it.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.pending.len();
        self.pending.retain(|request| request.id != id);

        self.pending.len() != before
    }

    pub fn reset(&mut self) -> usize {
        let cleared = self.pending.len();
        self.pending.clear();

        cleared
    }
}

#[cfg(test)]
fn sample_request() -> RideRequest {
    RideRequest::new(&crate::entities::ride::sample_ride(), chrono::Duration::minutes(5))
}

#[test]
fn unchanged_ride_snapshot_is_reported_once() {
    let mut tracker = CurrentRideTracker::default();
    let ride = crate::entities::ride::sample_ride();

    assert_eq!(
        tracker.observe(Some(ride.clone())),
        Some(RideChange::Appeared(ride.clone()))
    );
    assert_eq!(tracker.observe(Some(ride.clone())), None);
    assert_eq!(tracker.observe(Some(ride.clone())), None);
    assert_eq!(tracker.ride().map(|r| r.id), Some(ride.id));
}

#[test]
fn ride_status_changes_and_end_are_reported() {
    let mut tracker = CurrentRideTracker::default();
    let mut ride = crate::entities::ride::sample_ride();
    tracker.observe(Some(ride.clone()));

    ride.accept(Uuid::new_v4(), "4821".into()).unwrap();
    assert_eq!(
        tracker.observe(Some(ride.clone())),
        Some(RideChange::Changed {
            ride: ride.clone(),
            from: RideStatus::Requested
        })
    );
    assert_eq!(tracker.observe(Some(ride.clone())), None);

    assert_eq!(
        tracker.observe(None),
        Some(RideChange::Ended {
            ride_id: ride.id,
            last_status: RideStatus::Accepted
        })
    );
    assert_eq!(tracker.observe(None), None);
}

#[test]
fn request_arrivals_and_resolutions_are_reported_once() {
    let mut tracker = PendingRequestsTracker::default();
    let first = sample_request();
    let second = sample_request();

    let changes = tracker.observe(vec![first.clone()]);
    assert_eq!(changes.arrived, vec![first.clone()]);
    assert!(changes.resolved.is_empty());

    let mut seen = first.clone();
    seen.mark_seen(Uuid::new_v4());
    assert!(tracker.observe(vec![seen.clone()]).is_empty());

    let changes = tracker.observe(vec![second.clone()]);
    assert_eq!(changes.arrived, vec![second.clone()]);
    assert_eq!(changes.resolved, vec![first.id]);

    assert!(tracker.remove(second.id));
    assert!(!tracker.remove(second.id));
    assert!(tracker.pending().is_empty());
}
