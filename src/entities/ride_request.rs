use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Place, Ride, RideType};

/// The unassigned phase of a ride, as offered to drivers.
///
/// Lives only while the ride is `requested`; the store drops it as soon as the
/// ride is accepted, cancelled or expired.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub rider_id: Uuid,
    pub pickup: Place,
    pub destination: Place,
    pub ride_type: RideType,
    pub estimated_fare: i64,
    pub seen_by: BTreeSet<Uuid>,
    pub declined_by: BTreeSet<Uuid>,
    pub expires_at: DateTime<Utc>,
}

impl RideRequest {
    pub fn new(ride: &Ride, ttl: Duration) -> Self {
        Self {
            id: ride.request_id,
            ride_id: ride.id,
            rider_id: ride.rider_id,
            pickup: ride.pickup.clone(),
            destination: ride.destination.clone(),
            ride_type: ride.ride_type,
            estimated_fare: ride.estimated_fare,
            seen_by: BTreeSet::new(),
            declined_by: BTreeSet::new(),
            expires_at: ride.created_at + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn has_declined(&self, driver_id: Uuid) -> bool {
        self.declined_by.contains(&driver_id)
    }

    /// Whether this request should be offered to `driver_id` at `now`.
    pub fn is_open_for(&self, driver_id: Uuid, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.has_declined(driver_id) && self.rider_id != driver_id
    }

    /// Returns false when the driver had already declined.
    pub fn decline(&mut self, driver_id: Uuid) -> bool {
        self.declined_by.insert(driver_id)
    }

    pub fn mark_seen(&mut self, driver_id: Uuid) {
        self.seen_by.insert(driver_id);
    }
}

#[test]
fn candidate_set() {
    use crate::entities::ride::sample_ride;

    let ride = sample_ride();
    let mut request = RideRequest::new(&ride, Duration::minutes(5));
    let driver = Uuid::new_v4();
    let now = ride.created_at;

    assert_eq!(request.id, ride.request_id);
    assert!(request.is_open_for(driver, now));
    assert!(!request.is_open_for(ride.rider_id, now));

    assert!(request.decline(driver));
    assert!(!request.decline(driver));
    assert!(!request.is_open_for(driver, now));
    assert!(request.is_open_for(Uuid::new_v4(), now));
}

#[test]
fn expiry_is_inclusive() {
    use crate::entities::ride::sample_ride;

    let ride = sample_ride();
    let request = RideRequest::new(&ride, Duration::seconds(30));

    assert!(!request.is_expired(ride.created_at + Duration::seconds(29)));
    assert!(request.is_expired(ride.created_at + Duration::seconds(30)));
}
