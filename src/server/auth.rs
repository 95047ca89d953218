use async_trait::async_trait;
use axum::extract::{FromRequest, RequestParts};
use axum::http::header::AUTHORIZATION;

use crate::auth::{TokenVerifier, User};
use crate::error::{unauthorized_error, unexpected_error, Error};

/// Resolves the calling user from the `Authorization: Bearer` header.
/// Requests without a valid credential never reach a handler.
#[async_trait]
impl<B> FromRequest<B> for User
where
    B: Send,
{
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let token = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(unauthorized_error)?;

        let verifier = req.extensions().get::<TokenVerifier>().ok_or_else(|| {
            tracing::error!("token verifier missing from router");
            unexpected_error()
        })?;

        verifier.verify(token)
    }
}
