use axum::extract::{Extension, Json, Path};
use uuid::Uuid;

use crate::api::{DynAPI, Envelope};
use crate::auth::User;
use crate::entities::{Ride, RideRequest};
use crate::error::Error;

pub async fn list(
    Extension(api): Extension<DynAPI>,
    user: User,
) -> Result<Json<Envelope<Vec<RideRequest>>>, Error> {
    let requests = api.list_pending_requests(user).await?;

    Ok(Json(Envelope::new(requests)))
}

pub async fn accept(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<Ride>>, Error> {
    let ride = api.accept_request(user, id).await?;

    Ok(Json(Envelope::new(ride)))
}

pub async fn decline(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<()>>, Error> {
    api.decline_request(user, id).await?;

    Ok(Json(Envelope::new(())))
}
