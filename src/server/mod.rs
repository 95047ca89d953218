mod auth;
mod handlers;

use std::net::SocketAddr;

use axum::{
    extract::Extension,
    routing::{get, post, put},
    Router,
};

use crate::api::DynAPI;
use crate::auth::TokenVerifier;
use crate::error::{unexpected_error, Error};
use crate::server::handlers::{drivers, requests, rides};

pub fn router(api: DynAPI, verifier: TokenVerifier) -> Router {
    let rider = Router::new()
        .route("/rides/request", post(rides::request))
        .route("/rides/current", get(rides::current))
        .route("/rides/history", get(rides::history))
        .route("/rides/:id/cancel", post(rides::cancel))
        .route("/rides/:id/rate", post(rides::rate));

    let driver = Router::new()
        .route("/ride-requests", get(requests::list))
        .route("/ride-requests/:id/accept", post(requests::accept))
        .route("/ride-requests/:id/decline", post(requests::decline))
        .route("/rides/current", get(rides::current))
        .route("/rides/history", get(rides::history))
        .route("/rides/:id/status", put(rides::update_status))
        .route("/rides/:id/complete", post(rides::complete))
        .route("/rides/:id/cancel", post(rides::cancel))
        .route("/rides/:id/rate", post(rides::rate))
        .route("/availability", put(drivers::availability))
        .route("/earnings", get(drivers::earnings));

    let routes = Router::new()
        .route("/rides/calculate-fare", post(rides::calculate_fare))
        .route("/rides/:id", get(rides::find))
        .nest("/rider", rider)
        .nest("/driver", driver);

    Router::new()
        .nest("/api", routes)
        .layer(Extension(api))
        .layer(Extension(verifier))
}

pub async fn serve(api: DynAPI, verifier: TokenVerifier, addr: SocketAddr) -> Result<(), Error> {
    let app = router(api, verifier);

    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "server stopped");
            unexpected_error()
        })
}

#[cfg(test)]
fn test_router() -> (Router, TokenVerifier) {
    use std::sync::Arc;

    let verifier = TokenVerifier::new("test_secret_key");
    let api = Arc::new(crate::engine::test_engine()) as DynAPI;

    (router(api, verifier.clone()), verifier)
}

#[test]
fn missing_bearer_is_unauthorized() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    tokio_test::block_on(async {
        let (app, _) = test_router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/rider/rides/current")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    });
}

#[test]
fn forged_bearer_is_unauthorized() {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    tokio_test::block_on(async {
        let (app, _) = test_router();

        let forger = TokenVerifier::new("not_the_secret");
        let token = forger
            .issue(
                &crate::auth::User::new_driver(uuid::Uuid::new_v4()),
                chrono::Duration::hours(1),
            )
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/driver/ride-requests")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    });
}

#[test]
fn role_checks_map_to_forbidden() {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    tokio_test::block_on(async {
        let (app, verifier) = test_router();

        let token = verifier
            .issue(
                &crate::auth::User::new_rider(uuid::Uuid::new_v4()),
                chrono::Duration::hours(1),
            )
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/driver/ride-requests")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    });
}
