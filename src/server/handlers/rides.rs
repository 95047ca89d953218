use axum::extract::{Extension, Json, Path, Query};
use uuid::Uuid;

use crate::api::{
    CancelRideParams, CompleteRideParams, DynAPI, Envelope, EstimateFareParams, Page,
    RateRideParams, SubmitRequestParams, UpdateStatusParams,
};
use crate::auth::User;
use crate::entities::Ride;
use crate::error::Error;
use crate::fare::FareEstimate;

pub async fn calculate_fare(
    Extension(api): Extension<DynAPI>,
    user: User,
    Json(params): Json<EstimateFareParams>,
) -> Result<Json<Envelope<FareEstimate>>, Error> {
    let estimate = api.estimate_fare(user, params).await?;

    Ok(Json(Envelope::new(estimate)))
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<Ride>>, Error> {
    let ride = api.find_ride(user, id).await?;

    Ok(Json(Envelope::new(ride)))
}

pub async fn request(
    Extension(api): Extension<DynAPI>,
    user: User,
    Json(params): Json<SubmitRequestParams>,
) -> Result<Json<Envelope<Ride>>, Error> {
    let ride = api.submit_request(user, params).await?;

    Ok(Json(Envelope::new(ride)))
}

pub async fn current(
    Extension(api): Extension<DynAPI>,
    user: User,
) -> Result<Json<Envelope<Option<Ride>>>, Error> {
    let ride = api.current_ride(user).await?;

    Ok(Json(Envelope::new(ride)))
}

pub async fn history(
    Extension(api): Extension<DynAPI>,
    user: User,
    Query(page): Query<Page>,
) -> Result<Json<Envelope<Vec<Ride>>>, Error> {
    let rides = api.ride_history(user, page).await?;

    Ok(Json(Envelope::new(rides)))
}

pub async fn update_status(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    Json(params): Json<UpdateStatusParams>,
) -> Result<Json<Envelope<Ride>>, Error> {
    let ride = api.update_status(user, id, params).await?;

    Ok(Json(Envelope::new(ride)))
}

pub async fn complete(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    Json(params): Json<CompleteRideParams>,
) -> Result<Json<Envelope<Ride>>, Error> {
    let ride = api.complete_ride(user, id, params).await?;

    Ok(Json(Envelope::new(ride)))
}

pub async fn cancel(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    Json(params): Json<CancelRideParams>,
) -> Result<Json<Envelope<Ride>>, Error> {
    let ride = api.cancel_ride(user, id, params).await?;

    Ok(Json(Envelope::new(ride)))
}

pub async fn rate(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    Json(params): Json<RateRideParams>,
) -> Result<Json<Envelope<()>>, Error> {
    api.rate_ride(user, id, params).await?;

    Ok(Json(Envelope::new(())))
}
