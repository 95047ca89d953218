use oso::{Oso, PolarClass};

use crate::auth::{Dispatch, User};
use crate::entities::{Driver, Ride, RideStatus};
use crate::error::Error;

pub fn new() -> Result<Oso, Error> {
    let mut o = Oso::new();

    o.register_class(Dispatch::get_polar_class())?;
    o.register_class(User::get_polar_class())?;
    o.register_class(Driver::get_polar_class())?;
    o.register_class(Ride::get_polar_class())?;
    o.register_class(RideStatus::get_polar_class())?;

    o.load_str(include_str!("rules.polar"))?;

    Ok(o)
}

#[test]
fn dispatch_actions_follow_roles() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let rider = User::new_rider(Uuid::new_v4());
    let driver = User::new_driver(Uuid::new_v4());

    let result = authorizor.is_allowed(rider.clone(), "submit_request", Dispatch::Booking);
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(driver.clone(), "submit_request", Dispatch::Booking);
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(driver.clone(), "list_requests", Dispatch::RequestBoard);
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(rider.clone(), "list_requests", Dispatch::RequestBoard);
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(rider.clone(), "set_availability", Driver::new(rider.id));
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(driver.clone(), "set_availability", Driver::new(driver.id));
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(
        driver.clone(),
        "set_availability",
        Driver::new(Uuid::new_v4()),
    );
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(driver.clone(), "read_own", Dispatch::OwnRides);
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(driver.clone(), "read_own", Dispatch::Fares);
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(rider.clone(), "estimate_fare", Dispatch::Fares);
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(driver.clone(), "read_earnings", Dispatch::OwnRides);
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(rider.clone(), "read_earnings", Dispatch::OwnRides);
    assert_eq!(result.unwrap(), false);
}

#[test]
fn ride_rider_role_test() {
    use crate::entities::ride::sample_ride;
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let mut ride = sample_ride();
    let rider = User::new_rider(ride.rider_id);
    let stranger = User::new_rider(Uuid::new_v4());

    let result = authorizor.is_allowed(rider.clone(), "read", ride.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(rider.clone(), "cancel", ride.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(stranger.clone(), "read", ride.clone());
    assert_eq!(result.unwrap(), false);

    ride.accept(Uuid::new_v4(), "1234".into()).unwrap();

    let result = authorizor.is_allowed(rider.clone(), "update_status", ride.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(rider.clone(), "complete", ride.clone());
    assert_eq!(result.unwrap(), false);
}

#[test]
fn ride_driver_role_test() {
    use crate::entities::ride::sample_ride;
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let mut ride = sample_ride();
    let driver = User::new_driver(Uuid::new_v4());
    let other_driver = User::new_driver(Uuid::new_v4());

    // before acceptance

    let result = authorizor.is_allowed(driver.clone(), "accept", ride.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(driver.clone(), "read", ride.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(driver.clone(), "cancel", ride.clone());
    assert_eq!(result.unwrap(), false);

    ride.accept(driver.id, "1234".into()).unwrap();

    // after acceptance

    let result = authorizor.is_allowed(driver.clone(), "read", ride.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(driver.clone(), "update_status", ride.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(driver.clone(), "cancel", ride.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(other_driver.clone(), "update_status", ride.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(other_driver.clone(), "complete", ride.clone());
    assert_eq!(result.unwrap(), false);
}

#[test]
fn rider_cannot_accept_own_request() {
    use crate::entities::ride::sample_ride;

    let authorizor = new().unwrap();

    let ride = sample_ride();
    let both = User::new(ride.rider_id, vec!["rider".into(), "driver".into()]);

    let result = authorizor.is_allowed(both, "accept", ride);
    assert_eq!(result.unwrap(), false);
}

#[test]
fn system_role_test() {
    use crate::entities::ride::sample_ride;

    let authorizor = new().unwrap();

    let system = User::new_system_user();

    let result = authorizor.is_allowed(system.clone(), "complete", sample_ride());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(system, "list_requests", Dispatch::RequestBoard);
    assert_eq!(result.unwrap(), true);
}
