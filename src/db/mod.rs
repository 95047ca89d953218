mod memory;
mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::api::Page;
use crate::entities::{Driver, Rating, Ride, RideRequest, RideStatus};
use crate::error::Error;

pub use memory::MemoryStore;
pub use pg::{connect, PgStore};

/// Primitive operations of the authoritative ride record.
///
/// Every status change goes through [`RideStore::compare_and_swap`], which
/// writes only if the stored status is still the one the caller validated
/// against. That conditional write is the only serialization point between
/// concurrent actors.
#[async_trait]
pub trait RideStore: Send + Sync {
    /// Inserts a new ride with its open request. Returns false, writing
    /// nothing, when the rider already has a non-terminal ride.
    async fn insert_ride(&self, ride: &Ride, request: &RideRequest) -> Result<bool, Error>;

    async fn find_ride(&self, id: Uuid) -> Result<Option<Ride>, Error>;

    async fn find_ride_by_request(&self, request_id: Uuid) -> Result<Option<Ride>, Error>;

    /// Newest non-terminal ride where the actor is rider or assigned driver.
    async fn find_active_ride(&self, actor_id: Uuid) -> Result<Option<Ride>, Error>;

    /// Terminal rides of the actor, newest first.
    async fn list_history(&self, actor_id: Uuid, page: Page) -> Result<Vec<Ride>, Error>;

    /// Completed rides the driver was assigned to, newest first.
    async fn list_completed_rides(&self, driver_id: Uuid) -> Result<Vec<Ride>, Error>;

    /// Replaces the stored ride if its status still equals `expected`.
    ///
    /// Drops the ride's request in the same step once the new status is no
    /// longer `requested`. Fails with a conflict if the write would give a
    /// driver a second active ride.
    async fn compare_and_swap(&self, expected: RideStatus, ride: &Ride) -> Result<bool, Error>;

    async fn find_request(&self, request_id: Uuid) -> Result<Option<RideRequest>, Error>;

    /// Unexpired requests the driver has not declined, excluding their own.
    async fn list_open_requests(
        &self,
        driver_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RideRequest>, Error>;

    async fn list_expired_requests(&self, now: DateTime<Utc>) -> Result<Vec<RideRequest>, Error>;

    /// Records a decline. Returns false when no open request has that id.
    async fn add_decline(&self, request_id: Uuid, driver_id: Uuid) -> Result<bool, Error>;

    async fn mark_seen(&self, request_ids: &[Uuid], driver_id: Uuid) -> Result<(), Error>;

    async fn find_driver(&self, id: Uuid) -> Result<Option<Driver>, Error>;

    async fn save_driver(&self, driver: &Driver) -> Result<(), Error>;

    /// Returns false when this rater already rated the ride.
    async fn insert_rating(&self, rating: &Rating) -> Result<bool, Error>;

    async fn has_rated(&self, ride_id: Uuid, rater_id: Uuid) -> Result<bool, Error>;
}
