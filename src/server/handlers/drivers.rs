use axum::extract::{Extension, Json, Query};

use crate::api::{AvailabilityParams, DynAPI, Earnings, EarningsParams, Envelope};
use crate::auth::User;
use crate::error::Error;

pub async fn availability(
    Extension(api): Extension<DynAPI>,
    user: User,
    Json(params): Json<AvailabilityParams>,
) -> Result<Json<Envelope<AvailabilityParams>>, Error> {
    let available = api.set_availability(user, params).await?;

    Ok(Json(Envelope::new(AvailabilityParams { available })))
}

pub async fn earnings(
    Extension(api): Extension<DynAPI>,
    user: User,
    Query(params): Query<EarningsParams>,
) -> Result<Json<Envelope<Earnings>>, Error> {
    let earnings = api.earnings(user, params).await?;

    Ok(Json(Envelope::new(earnings)))
}
