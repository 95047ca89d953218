use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Place, RideStatus as Status};
use crate::error::{invalid_transition_error, validation_error, Error};

pub const EXPIRED_REASON: &str = "expired";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub request_id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup: Place,
    pub destination: Place,
    pub ride_type: RideType,
    pub status: Status,
    pub estimated_fare: i64,
    pub final_fare: Option<i64>,
    pub otp: Option<String>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancel_reason: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideType {
    Car,
    Bike,
    Auto,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Rider,
    Driver,
}

impl RideType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Bike => "bike",
            Self::Auto => "auto",
        }
    }

    pub fn display_text(&self) -> &'static str {
        match self {
            Self::Car => "Car",
            Self::Bike => "Bike",
            Self::Auto => "Auto Rickshaw",
        }
    }
}

impl fmt::Display for RideType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RideType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "car" => Ok(Self::Car),
            "bike" => Ok(Self::Bike),
            "auto" => Ok(Self::Auto),
            _ => Err(validation_error("Valid ride type is required")),
        }
    }
}

impl Ride {
    pub fn new(
        rider_id: Uuid,
        pickup: Place,
        destination: Place,
        ride_type: RideType,
        estimated_fare: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            rider_id,
            driver_id: None,
            pickup,
            destination,
            ride_type,
            status: Status::Requested,
            estimated_fare,
            final_fare: None,
            otp: None,
            created_at: Utc::now(),
            accepted_at: None,
            picked_up_at: None,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancel_reason: None,
        }
    }

    pub fn is_rider(&self, user_id: Uuid) -> bool {
        self.rider_id == user_id
    }

    pub fn is_driver(&self, user_id: Uuid) -> bool {
        self.driver_id == Some(user_id)
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.is_rider(user_id) || self.is_driver(user_id)
    }

    /// Which side of the ride `user_id` is on.
    pub fn party(&self, user_id: Uuid) -> Option<CancelledBy> {
        if self.is_rider(user_id) {
            Some(CancelledBy::Rider)
        } else if self.is_driver(user_id) {
            Some(CancelledBy::Driver)
        } else {
            None
        }
    }

    pub fn is_expired_request(&self) -> bool {
        self.status == Status::Cancelled
            && self.cancelled_by.is_none()
            && self.cancel_reason.as_deref() == Some(EXPIRED_REASON)
    }

    pub fn verify_otp(&self, otp: &str) -> bool {
        self.otp.as_deref() == Some(otp)
    }

    /// What the driver earned on this ride, if it completed at or after
    /// `since`.
    pub fn earned_since(&self, since: Option<DateTime<Utc>>) -> Option<i64> {
        if self.status != Status::Completed {
            return None;
        }

        match (self.completed_at, since) {
            (Some(at), Some(since)) if at < since => None,
            _ => Some(self.final_fare.unwrap_or(self.estimated_fare)),
        }
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id))]
    pub fn accept(&mut self, driver_id: Uuid, otp: String) -> Result<(), Error> {
        self.status = self.status.transition(Status::Accepted)?;
        self.driver_id = Some(driver_id);
        self.otp.get_or_insert(otp);
        self.accepted_at = Some(Utc::now());

        Ok(())
    }

    /// Moves an assigned ride one stage forward, short of completion.
    #[tracing::instrument(skip(self), fields(ride_id = %self.id))]
    pub fn advance(&mut self, to: Status) -> Result<(), Error> {
        match to {
            Status::DriverOnWay => {
                self.status = self.status.transition(to)?;
            }
            Status::RiderPickedUp => {
                self.status = self.status.transition(to)?;
                self.picked_up_at = Some(Utc::now());
            }
            _ => return Err(invalid_transition_error(self.status, to)),
        };

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id))]
    pub fn complete(&mut self, final_fare: Option<i64>) -> Result<(), Error> {
        if !self.status.can_complete() {
            return Err(invalid_transition_error(self.status, Status::Completed));
        }

        let final_fare = final_fare.unwrap_or(self.estimated_fare);
        if final_fare < 0 {
            return Err(validation_error("final fare cannot be negative"));
        }

        self.status = Status::Completed;
        self.final_fare = Some(final_fare);
        self.completed_at = Some(Utc::now());

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id))]
    pub fn cancel(&mut self, by: Option<CancelledBy>, reason: Option<String>) -> Result<(), Error> {
        self.status = self.status.transition(Status::Cancelled)?;
        self.cancelled_at = Some(Utc::now());
        self.cancelled_by = by;
        self.cancel_reason = reason;

        Ok(())
    }

    pub fn expire(&mut self) -> Result<(), Error> {
        if self.status != Status::Requested {
            return Err(invalid_transition_error(self.status, Status::Cancelled));
        }

        self.cancel(None, Some(EXPIRED_REASON.into()))
    }
}

impl PolarClass for Ride {
    fn get_polar_class_builder() -> oso::ClassBuilder<Ride> {
        oso::Class::builder()
            .name("Ride")
            .add_attribute_getter("id", |recv: &Ride| recv.id)
            .add_attribute_getter("rider_id", |recv: &Ride| recv.rider_id)
            .add_attribute_getter("driver_id", |recv: &Ride| recv.driver_id)
            .add_attribute_getter("status", |recv: &Ride| recv.status)
            .add_method("is_rider", Ride::is_rider)
            .add_method("is_driver", Ride::is_driver)
            .add_method("is_participant", Ride::is_participant)
    }

    fn get_polar_class() -> oso::Class {
        let builder = Ride::get_polar_class_builder();
        builder.build()
    }
}

#[cfg(test)]
pub(crate) fn sample_ride() -> Ride {
    Ride::new(
        Uuid::new_v4(),
        Place::new("Mumbai CST", 19.0760, 72.8777),
        Place::new("Andheri East", 19.1136, 72.8697),
        RideType::Car,
        114,
    )
}

#[test]
fn full_lifecycle() {
    let driver_id = Uuid::new_v4();
    let mut ride = sample_ride();

    assert_eq!(ride.status, Status::Requested);
    assert!(ride.driver_id.is_none());

    ride.accept(driver_id, "4821".into()).unwrap();
    assert_eq!(ride.status, Status::Accepted);
    assert_eq!(ride.driver_id, Some(driver_id));
    assert!(ride.verify_otp("4821"));
    assert!(ride.accepted_at.is_some());

    ride.advance(Status::DriverOnWay).unwrap();
    ride.advance(Status::RiderPickedUp).unwrap();
    assert!(ride.picked_up_at.is_some());
    assert!(ride.final_fare.is_none());

    ride.complete(None).unwrap();
    assert_eq!(ride.status, Status::Completed);
    assert_eq!(ride.final_fare, Some(ride.estimated_fare));
}

#[test]
fn accept_only_from_requested() {
    let mut ride = sample_ride();
    ride.accept(Uuid::new_v4(), "1111".into()).unwrap();

    let before = ride.clone();
    let err = ride.accept(Uuid::new_v4(), "2222".into()).unwrap_err();

    assert!(err.is_invalid_transition_error());
    assert_eq!(ride, before);
}

#[test]
fn complete_before_pickup_is_rejected() {
    let mut ride = sample_ride();
    ride.accept(Uuid::new_v4(), "1111".into()).unwrap();
    ride.advance(Status::DriverOnWay).unwrap();

    let before = ride.clone();
    let err = ride.complete(Some(200)).unwrap_err();

    assert!(err.is_invalid_transition_error());
    assert_eq!(ride, before);
}

#[test]
fn advance_refuses_skips_and_terminal_targets() {
    let mut ride = sample_ride();
    ride.accept(Uuid::new_v4(), "1111".into()).unwrap();

    assert!(ride.advance(Status::RiderPickedUp).is_err());
    assert!(ride.advance(Status::Completed).is_err());
    assert!(ride.advance(Status::Cancelled).is_err());
    assert_eq!(ride.status, Status::Accepted);
}

#[test]
fn cancel_records_party_and_reason() {
    let mut ride = sample_ride();
    ride.cancel(Some(CancelledBy::Rider), Some("changed plans".into()))
        .unwrap();

    assert_eq!(ride.status, Status::Cancelled);
    assert_eq!(ride.cancelled_by, Some(CancelledBy::Rider));
    assert!(!ride.is_expired_request());

    assert!(ride.cancel(Some(CancelledBy::Rider), None).is_err());
}

#[test]
fn cancel_after_pickup_is_rejected() {
    let mut ride = sample_ride();
    ride.accept(Uuid::new_v4(), "1111".into()).unwrap();
    ride.advance(Status::DriverOnWay).unwrap();
    ride.advance(Status::RiderPickedUp).unwrap();

    let err = ride.cancel(Some(CancelledBy::Driver), None).unwrap_err();
    assert!(err.is_invalid_transition_error());
}

#[test]
fn expiry_is_a_partyless_cancellation() {
    let mut ride = sample_ride();
    ride.expire().unwrap();

    assert!(ride.is_expired_request());
    assert!(ride.cancelled_by.is_none());
}

#[test]
fn ride_type_parsing() {
    assert_eq!("auto".parse::<RideType>().unwrap(), RideType::Auto);
    assert!("rickshaw".parse::<RideType>().unwrap_err().is_validation_error());
    assert_eq!(
        serde_json::to_string(&RideType::Bike).unwrap(),
        "\"bike\"".to_string()
    );
}

#[test]
fn earnings_count_completed_rides_only() {
    let mut ride = sample_ride();
    assert_eq!(ride.earned_since(None), None);

    ride.accept(Uuid::new_v4(), "4821".into()).unwrap();
    ride.advance(Status::DriverOnWay).unwrap();
    ride.advance(Status::RiderPickedUp).unwrap();
    assert_eq!(ride.earned_since(None), None);

    ride.complete(Some(130)).unwrap();
    assert_eq!(ride.earned_since(None), Some(130));

    let before = Utc::now() - chrono::Duration::hours(1);
    let after = Utc::now() + chrono::Duration::hours(1);
    assert_eq!(ride.earned_since(Some(before)), Some(130));
    assert_eq!(ride.earned_since(Some(after)), None);
}
