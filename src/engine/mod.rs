mod driver_api;
mod fare_api;
mod helpers;
mod matcher;
mod request_api;
mod ride_api;

use std::sync::Arc;

use chrono::Duration;
use oso::Oso;

pub use matcher::{generate_otp, RequestMatcher, ALREADY_ACCEPTED, REQUEST_CANCELLED, REQUEST_EXPIRED};

use crate::{
    api::API,
    auth::authorizor,
    db::RideStore,
    error::{forbidden_error, Error},
    fare::FareSchedule,
};

/// The authority over ride records. Every operation is authorized for the
/// calling user before it reaches the store.
pub struct Engine {
    store: Arc<dyn RideStore>,
    matcher: RequestMatcher,
    authorizor: Oso,
    fares: FareSchedule,
    request_ttl: Duration,
}

impl Engine {
    #[tracing::instrument(name = "Engine::new", skip_all)]
    pub fn new(
        store: Arc<dyn RideStore>,
        fares: FareSchedule,
        request_ttl: Duration,
    ) -> Result<Self, Error> {
        Ok(Self {
            matcher: RequestMatcher::new(store.clone()),
            store,
            authorizor: authorizor::new()?,
            fares,
            request_ttl,
        })
    }
}

impl Engine {
    pub fn authorize<Actor, Action, Resource>(
        &self,
        actor: Actor,
        action: Action,
        resource: Resource,
    ) -> Result<(), Error>
    where
        Actor: oso::ToPolar,
        Action: oso::ToPolar,
        Resource: oso::ToPolar,
    {
        if self.authorizor.is_allowed(actor, action, resource)? {
            return Ok(());
        }

        Err(forbidden_error())
    }
}

impl API for Engine {}

#[cfg(test)]
pub(crate) fn test_engine() -> Engine {
    let store: Arc<dyn RideStore> = Arc::new(crate::db::MemoryStore::new());

    Engine::new(store, FareSchedule::default(), Duration::minutes(5)).unwrap()
}
