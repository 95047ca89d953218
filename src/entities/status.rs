use std::fmt;
use std::str::FromStr;

use oso::PolarClass;
use serde::{Deserialize, Serialize};

use crate::error::{invalid_transition_error, validation_error, Error};

/// Lifecycle of a ride.
///
/// `requested -> accepted -> driver_on_way -> rider_picked_up -> completed`, with
/// `cancelled` reachable from the first three states only. `completed` and
/// `cancelled` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Requested,
    Accepted,
    DriverOnWay,
    RiderPickedUp,
    Completed,
    Cancelled,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Self::Requested,
        Self::Accepted,
        Self::DriverOnWay,
        Self::RiderPickedUp,
        Self::Completed,
        Self::Cancelled,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::DriverOnWay => "driver_on_way",
            Self::RiderPickedUp => "rider_picked_up",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn display_text(&self) -> &'static str {
        match self {
            Self::Requested => "Looking for Driver",
            Self::Accepted => "Driver Assigned",
            Self::DriverOnWay => "Driver On The Way",
            Self::RiderPickedUp => "In Progress",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// The single forward edge out of this state, if any.
    pub fn next(&self) -> Option<Status> {
        match self {
            Self::Requested => Some(Self::Accepted),
            Self::Accepted => Some(Self::DriverOnWay),
            Self::DriverOnWay => Some(Self::RiderPickedUp),
            Self::RiderPickedUp => Some(Self::Completed),
            Self::Completed | Self::Cancelled => None,
        }
    }

    pub fn can_transition(&self, to: Status) -> bool {
        match to {
            Self::Cancelled => self.can_cancel(),
            _ => self.next() == Some(to),
        }
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Requested | Self::Accepted | Self::DriverOnWay)
    }

    pub fn can_complete(&self) -> bool {
        *self == Self::RiderPickedUp
    }

    pub fn can_rate(&self, already_rated: bool) -> bool {
        *self == Self::Completed && !already_rated
    }

    pub fn transition(&self, to: Status) -> Result<Status, Error> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(invalid_transition_error(*self, to))
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.name() == s)
            .copied()
            .ok_or_else(|| validation_error(format!("unknown ride status: {}", s)))
    }
}

impl PolarClass for Status {
    fn get_polar_class_builder() -> oso::ClassBuilder<Status> {
        oso::Class::builder()
            .name("RideStatus")
            .add_attribute_getter("name", |recv: &Status| recv.name().to_string())
    }

    fn get_polar_class() -> oso::Class {
        let builder = Status::get_polar_class_builder();
        builder.build()
    }
}

#[test]
fn forward_edges_only() {
    use Status::*;

    let legal = [
        (Requested, Accepted),
        (Accepted, DriverOnWay),
        (DriverOnWay, RiderPickedUp),
        (RiderPickedUp, Completed),
        (Requested, Cancelled),
        (Accepted, Cancelled),
        (DriverOnWay, Cancelled),
    ];

    for from in Status::ALL {
        for to in Status::ALL {
            let expected = legal.contains(&(from, to));
            assert_eq!(from.can_transition(to), expected, "{} -> {}", from, to);

            match from.transition(to) {
                Ok(next) => assert_eq!(next, to),
                Err(err) => {
                    assert!(!expected);
                    assert!(err.is_invalid_transition_error());
                }
            }
        }
    }
}

#[test]
fn terminal_states_have_no_exits() {
    for to in Status::ALL {
        assert!(!Status::Completed.can_transition(to));
        assert!(!Status::Cancelled.can_transition(to));
    }
}

#[test]
fn cancel_complete_and_rate_gates() {
    use Status::*;

    assert!(Requested.can_cancel());
    assert!(Accepted.can_cancel());
    assert!(DriverOnWay.can_cancel());
    assert!(!RiderPickedUp.can_cancel());
    assert!(!Completed.can_cancel());
    assert!(!Cancelled.can_cancel());

    assert!(RiderPickedUp.can_complete());
    assert!(!DriverOnWay.can_complete());
    assert!(!Accepted.can_complete());

    assert!(Completed.can_rate(false));
    assert!(!Completed.can_rate(true));
    assert!(!Cancelled.can_rate(false));
    assert!(!RiderPickedUp.can_rate(false));
}

#[test]
fn wire_names_match_serde() {
    for status in Status::ALL {
        let encoded = serde_json::to_string(&status).unwrap();
        assert_eq!(encoded, format!("\"{}\"", status.name()));
        assert_eq!(status.name().parse::<Status>().unwrap(), status);
    }

    assert!("on_the_way".parse::<Status>().unwrap_err().is_validation_error());
}
