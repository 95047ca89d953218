use uuid::Uuid;

use super::Engine;
use crate::auth::User;
use crate::entities::Ride;
use crate::error::{conflict_error, not_found_error, Error};

const MAX_ATTEMPTS: usize = 3;

impl Engine {
    #[tracing::instrument(skip(self))]
    pub(super) async fn load_ride(&self, id: Uuid) -> Result<Ride, Error> {
        self.store
            .find_ride(id)
            .await?
            .ok_or_else(|| not_found_error("ride not found"))
    }

    /// Applies `change` to the stored ride and writes it back only if nobody
    /// moved the ride in between. A lost swap reloads and revalidates.
    #[tracing::instrument(skip(self, user, change))]
    pub(super) async fn transition_ride<F>(
        &self,
        user: &User,
        id: Uuid,
        action: &'static str,
        change: F,
    ) -> Result<Ride, Error>
    where
        F: Fn(&mut Ride) -> Result<(), Error> + Send + Sync,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let ride = self.load_ride(id).await?;

            self.authorize(user.clone(), action, ride.clone())?;

            if ride.status.is_terminal() {
                return Err(not_found_error("ride already resolved"));
            }

            let mut next = ride.clone();
            change(&mut next)?;

            if self.store.compare_and_swap(ride.status, &next).await? {
                tracing::info!(from = %ride.status, to = %next.status, "ride updated");
                return Ok(next);
            }

            tracing::info!(attempt, "ride changed underneath update, retrying");
        }

        Err(conflict_error("ride is changing too quickly, try again"))
    }
}
