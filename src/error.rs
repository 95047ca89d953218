use axum::extract::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::env;
use std::fmt::{self, Debug, Display};

use crate::entities::RideStatus;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

pub const VALIDATION: i32 = 101;
pub const CONFLICT: i32 = 102;
pub const INVALID_TRANSITION: i32 = 103;
pub const NOT_FOUND: i32 = 104;
pub const UNAUTHORIZED: i32 = 105;
pub const FORBIDDEN: i32 = 106;
pub const IN_FLIGHT: i32 = 107;

impl Error {
    pub fn is_validation_error(&self) -> bool {
        self.code == VALIDATION
    }

    pub fn is_conflict_error(&self) -> bool {
        self.code == CONFLICT
    }

    pub fn is_invalid_transition_error(&self) -> bool {
        self.code == INVALID_TRANSITION
    }

    pub fn is_not_found_error(&self) -> bool {
        self.code == NOT_FOUND
    }

    pub fn is_auth_error(&self) -> bool {
        self.code == UNAUTHORIZED || self.code == FORBIDDEN
    }

    pub fn is_in_flight_error(&self) -> bool {
        self.code == IN_FLIGHT
    }

    /// Network or server failure where the outcome of the call is unknown.
    pub fn is_transport_error(&self) -> bool {
        (2..=4).contains(&self.code)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for Error {}

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        env_var_error(err)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        database_error(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        reqwest_error(err)
    }
}

impl From<oso::OsoError> for Error {
    fn from(err: oso::OsoError) -> Self {
        authorizor_error(err)
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::debug!(error = %err, "rejected bearer credential");
        unauthorized_error()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self.code {
            1..=99 => StatusCode::INTERNAL_SERVER_ERROR,
            VALIDATION => StatusCode::BAD_REQUEST,
            CONFLICT => StatusCode::CONFLICT,
            INVALID_TRANSITION => StatusCode::UNPROCESSABLE_ENTITY,
            NOT_FOUND => StatusCode::NOT_FOUND,
            UNAUTHORIZED => StatusCode::UNAUTHORIZED,
            FORBIDDEN => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        };

        let error_message = match self.code {
            1..=99 => "Internal Server Error",
            _ => self.message.as_str(),
        };

        let body = Json(json!({
            "code": self.code,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub fn validation_error(message: impl Into<String>) -> Error {
    Error {
        code: VALIDATION,
        message: message.into(),
    }
}

pub fn conflict_error(reason: impl Into<String>) -> Error {
    Error {
        code: CONFLICT,
        message: reason.into(),
    }
}

pub fn invalid_transition_error(from: RideStatus, to: RideStatus) -> Error {
    Error {
        code: INVALID_TRANSITION,
        message: format!("invalid transition from {} to {}", from, to),
    }
}

pub fn not_found_error(what: impl Into<String>) -> Error {
    Error {
        code: NOT_FOUND,
        message: what.into(),
    }
}

pub fn unauthorized_error() -> Error {
    Error {
        code: UNAUTHORIZED,
        message: "missing or invalid credential".into(),
    }
}

pub fn forbidden_error() -> Error {
    Error {
        code: FORBIDDEN,
        message: "action not allowed".into(),
    }
}

pub fn in_flight_error() -> Error {
    Error {
        code: IN_FLIGHT,
        message: "another action is still in progress".into(),
    }
}

pub fn env_var_error(_: env::VarError) -> Error {
    Error {
        code: 1,
        message: "environment variable error".into(),
    }
}

pub fn database_error<T: Debug>(err: T) -> Error {
    tracing::error!(error = ?err, "database error");

    Error {
        code: 2,
        message: "database error".into(),
    }
}

pub fn reqwest_error(err: reqwest::Error) -> Error {
    tracing::warn!(error = %err, "transport error");

    Error {
        code: 3,
        message: "transport error".into(),
    }
}

pub fn upstream_error() -> Error {
    Error {
        code: 4,
        message: "upstream error".into(),
    }
}

pub fn unexpected_error() -> Error {
    Error {
        code: 5,
        message: "unexpected error".into(),
    }
}

pub fn config_error(key: &str) -> Error {
    Error {
        code: 6,
        message: format!("invalid configuration value for {}", key),
    }
}

pub fn authorizor_error(err: oso::OsoError) -> Error {
    tracing::error!(error = %err, "authorization engine error");

    Error {
        code: 7,
        message: "authorization error".into(),
    }
}

#[test]
fn error_classification() {
    assert!(database_error("boom").is_transport_error());
    assert!(upstream_error().is_transport_error());
    assert!(!unexpected_error().is_transport_error());
    assert!(!conflict_error("taken").is_transport_error());

    assert!(unauthorized_error().is_auth_error());
    assert!(forbidden_error().is_auth_error());
    assert!(conflict_error("taken").is_conflict_error());
    assert!(not_found_error("ride").is_not_found_error());
}

#[test]
fn invalid_transition_names_both_states() {
    let err = invalid_transition_error(RideStatus::DriverOnWay, RideStatus::Completed);

    assert!(err.is_invalid_transition_error());
    assert_eq!(err.message, "invalid transition from driver_on_way to completed");
}

#[test]
fn internal_errors_render_as_server_errors() {
    assert_eq!(
        database_error("boom").into_response().status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
        conflict_error("taken").into_response().status(),
        StatusCode::CONFLICT
    );
    assert_eq!(
        invalid_transition_error(RideStatus::Completed, RideStatus::Cancelled)
            .into_response()
            .status(),
        StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(
        unauthorized_error().into_response().status(),
        StatusCode::UNAUTHORIZED
    );
}
