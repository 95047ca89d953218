use geo_types::Point;
use serde::{Deserialize, Serialize};

use crate::entities::{Coordinates, RideType};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    pub base_fare: f64,
    pub per_km_rate: f64,
}

/// Per ride type tariffs. Estimation is pure: same inputs, same fare.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FareSchedule {
    pub car: Tariff,
    pub bike: Tariff,
    pub auto: Tariff,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FareEstimate {
    pub ride_type: RideType,
    pub distance_km: f64,
    pub estimated_fare: i64,
}

impl Default for FareSchedule {
    fn default() -> Self {
        Self {
            car: Tariff {
                base_fare: 50.0,
                per_km_rate: 15.0,
            },
            bike: Tariff {
                base_fare: 20.0,
                per_km_rate: 7.0,
            },
            auto: Tariff {
                base_fare: 30.0,
                per_km_rate: 10.0,
            },
        }
    }
}

impl FareSchedule {
    pub fn tariff(&self, ride_type: RideType) -> Tariff {
        match ride_type {
            RideType::Car => self.car,
            RideType::Bike => self.bike,
            RideType::Auto => self.auto,
        }
    }

    pub fn estimate(
        &self,
        pickup: Coordinates,
        destination: Coordinates,
        ride_type: RideType,
    ) -> FareEstimate {
        let distance_km = haversine_km(pickup, destination);
        let tariff = self.tariff(ride_type);
        let fare = tariff.base_fare + tariff.per_km_rate * distance_km;

        FareEstimate {
            ride_type,
            distance_km,
            estimated_fare: fare.round() as i64,
        }
    }
}

/// Great-circle distance in kilometers.
pub fn haversine_km(from: Coordinates, to: Coordinates) -> f64 {
    let from: Point<f64> = from.into();
    let to: Point<f64> = to.into();

    let dlat = (to.y() - from.y()).to_radians();
    let dlon = (to.x() - from.x()).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + from.y().to_radians().cos() * to.y().to_radians().cos() * (dlon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
const CST: Coordinates = Coordinates {
    lat: 19.0760,
    lon: 72.8777,
};

#[cfg(test)]
const ANDHERI: Coordinates = Coordinates {
    lat: 19.1136,
    lon: 72.8697,
};

#[test]
fn haversine_distance() {
    let distance = haversine_km(CST, ANDHERI);
    assert!(distance > 4.1 && distance < 4.3, "{}", distance);

    assert_eq!(haversine_km(CST, CST), 0.0);
    assert!((haversine_km(CST, ANDHERI) - haversine_km(ANDHERI, CST)).abs() < 1e-9);
}

#[test]
fn car_fare_for_mumbai_hop() {
    let schedule = FareSchedule::default();
    let estimate = schedule.estimate(CST, ANDHERI, RideType::Car);

    let expected = (50.0 + 15.0 * haversine_km(CST, ANDHERI)).round() as i64;
    assert_eq!(estimate.estimated_fare, expected);
    assert_eq!(estimate.estimated_fare, 114);
    assert_eq!(estimate.ride_type, RideType::Car);
}

#[test]
fn estimates_are_deterministic() {
    let schedule = FareSchedule::default();

    for ride_type in [RideType::Car, RideType::Bike, RideType::Auto] {
        assert_eq!(
            schedule.estimate(CST, ANDHERI, ride_type),
            schedule.estimate(CST, ANDHERI, ride_type)
        );
    }
}

#[test]
fn tariffs_differ_by_ride_type() {
    let schedule = FareSchedule::default();

    let car = schedule.estimate(CST, ANDHERI, RideType::Car).estimated_fare;
    let auto = schedule.estimate(CST, ANDHERI, RideType::Auto).estimated_fare;
    let bike = schedule.estimate(CST, ANDHERI, RideType::Bike).estimated_fare;

    assert!(car > auto && auto > bike);
    assert_eq!(schedule.estimate(CST, CST, RideType::Bike).estimated_fare, 20);
}
