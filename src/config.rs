use std::{env, fmt::Display, net::SocketAddr, str::FromStr};

use tracing::{info, warn};

use crate::error::{config_error, Error};
use crate::fare::{FareSchedule, Tariff};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub request_ttl: chrono::Duration,
    pub fares: FareSchedule,
}

impl Config {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> Result<Self, Error> {
        if dotenv::dotenv().is_err() {
            info!(".env not found, using process environment only");
        }

        Self::load(|key| env::var(key).ok())
    }

    pub fn load<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = FareSchedule::default();

        let request_ttl_seconds: i64 = try_load(&lookup, "REQUEST_TTL_SECONDS", "300")?;

        if request_ttl_seconds <= 0 {
            return Err(config_error("REQUEST_TTL_SECONDS"));
        }

        Ok(Self {
            database_url: required(&lookup, "DATABASE_URL")?,
            database_max_connections: try_load(&lookup, "DATABASE_MAX_CONNECTIONS", "5")?,
            bind_addr: try_load(&lookup, "BIND_ADDR", "127.0.0.1:3000")?,
            jwt_secret: required(&lookup, "JWT_SECRET")?,
            request_ttl: chrono::Duration::seconds(request_ttl_seconds),
            fares: FareSchedule {
                car: load_tariff(&lookup, "CAR", defaults.car)?,
                bike: load_tariff(&lookup, "BIKE", defaults.bike)?,
                auto: load_tariff(&lookup, "AUTO", defaults.auto)?,
            },
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, Error>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            warn!("required environment variable {key} not set");
            config_error(key)
        })
}

fn try_load<F, T>(lookup: &F, key: &str, default: &str) -> Result<T, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .trim()
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            config_error(key)
        })
}

fn load_tariff<F>(lookup: &F, ride_type: &str, default: Tariff) -> Result<Tariff, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let base_key = format!("FARE_{}_BASE", ride_type);
    let per_km_key = format!("FARE_{}_PER_KM", ride_type);

    let tariff = Tariff {
        base_fare: try_load(lookup, &base_key, &default.base_fare.to_string())?,
        per_km_rate: try_load(lookup, &per_km_key, &default.per_km_rate.to_string())?,
    };

    if !(tariff.base_fare >= 0.0 && tariff.per_km_rate >= 0.0) {
        return Err(config_error(&base_key));
    }

    Ok(tariff)
}

#[cfg(test)]
fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: std::collections::HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_fill_optional_values() {
    let config = Config::load(lookup_from(&[
        ("DATABASE_URL", "postgresql://localhost/rideline"),
        ("JWT_SECRET", "secret"),
    ]))
    .unwrap();

    assert_eq!(config.database_max_connections, 5);
    assert_eq!(config.bind_addr, "127.0.0.1:3000".parse().unwrap());
    assert_eq!(config.request_ttl, chrono::Duration::seconds(300));
    assert_eq!(config.fares, FareSchedule::default());
}

#[test]
fn missing_and_malformed_values_fail() {
    let err = Config::load(lookup_from(&[("JWT_SECRET", "secret")])).unwrap_err();
    assert!(err.message.contains("DATABASE_URL"));

    let err = Config::load(lookup_from(&[
        ("DATABASE_URL", "postgresql://localhost/rideline"),
        ("JWT_SECRET", "secret"),
        ("REQUEST_TTL_SECONDS", "soon"),
    ]))
    .unwrap_err();
    assert!(err.message.contains("REQUEST_TTL_SECONDS"));

    let err = Config::load(lookup_from(&[
        ("DATABASE_URL", "postgresql://localhost/rideline"),
        ("JWT_SECRET", "secret"),
        ("REQUEST_TTL_SECONDS", "0"),
    ]))
    .unwrap_err();
    assert!(err.message.contains("REQUEST_TTL_SECONDS"));
}

#[test]
fn tariffs_can_be_overridden() {
    let config = Config::load(lookup_from(&[
        ("DATABASE_URL", "postgresql://localhost/rideline"),
        ("JWT_SECRET", "secret"),
        ("FARE_BIKE_BASE", "25"),
        ("FARE_BIKE_PER_KM", "8.5"),
    ]))
    .unwrap();

    assert_eq!(config.fares.bike.base_fare, 25.0);
    assert_eq!(config.fares.bike.per_km_rate, 8.5);
    assert_eq!(config.fares.car, FareSchedule::default().car);
}
