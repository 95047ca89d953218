use serde::{Deserialize, Serialize};

use crate::error::{validation_error, Error};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl From<Coordinates> for geo_types::Point<f64> {
    fn from(coordinates: Coordinates) -> Self {
        geo_types::Point::new(coordinates.lon, coordinates.lat)
    }
}

/// A pickup or destination as chosen by the rider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub address: String,
    pub lat: f64,
    pub lon: f64,
}

impl Place {
    pub fn new(address: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            address: address.into(),
            lat,
            lon,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.lat,
            lon: self.lon,
        }
    }

    fn validate(&self, field: &str) -> Result<(), Error> {
        if self.address.trim().is_empty() {
            return Err(validation_error(format!("{} address is required", field)));
        }

        if !self.coordinates().is_valid() {
            return Err(validation_error(format!("{} coordinates are invalid", field)));
        }

        Ok(())
    }

    fn same_place(&self, other: &Place) -> bool {
        self.coordinates() == other.coordinates()
            || self.address.trim().eq_ignore_ascii_case(other.address.trim())
    }
}

pub fn validate_route(pickup: &Place, destination: &Place) -> Result<(), Error> {
    pickup.validate("pickup")?;
    destination.validate("destination")?;

    if pickup.same_place(destination) {
        return Err(validation_error("Pickup and destination cannot be the same"));
    }

    Ok(())
}

#[test]
fn route_validation() {
    let bandra = Place::new("Bandra West", 19.0596, 72.8295);
    let andheri = Place::new("Andheri East", 19.1136, 72.8697);

    assert!(validate_route(&bandra, &andheri).is_ok());

    let err = validate_route(&bandra, &bandra.clone()).unwrap_err();
    assert!(err.is_validation_error());

    let renamed = Place::new("  bandra west ", 19.0, 72.0);
    assert!(validate_route(&bandra, &renamed).is_err());

    let blank = Place::new("", 19.0, 72.0);
    assert!(validate_route(&blank, &andheri).is_err());

    let off_globe = Place::new("Nowhere", 91.0, 72.0);
    assert!(validate_route(&off_globe, &andheri).is_err());

    let nan = Place::new("Nowhere", f64::NAN, 72.0);
    assert!(validate_route(&andheri, &nan).is_err());
}

#[test]
fn point_uses_lon_lat_order() {
    let point: geo_types::Point<f64> = Coordinates {
        lat: 19.076,
        lon: 72.8777,
    }
    .into();

    assert_eq!(point.x(), 72.8777);
    assert_eq!(point.y(), 19.076);
}
