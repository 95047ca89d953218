mod driver;
mod place;
mod rating;
pub(crate) mod ride;
mod ride_request;
mod status;

pub use driver::{Driver, Status as DriverStatus};
pub use place::{validate_route, Coordinates, Place};
pub use rating::{Rating, MAX_RATING, MIN_RATING};
pub use ride::{CancelledBy, Ride, RideType, EXPIRED_REASON};
pub use ride_request::RideRequest;
pub use status::Status as RideStatus;
