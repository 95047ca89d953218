use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    Executor, Pool, Postgres, Row,
};
use uuid::Uuid;

use super::RideStore;
use crate::api::Page;
use crate::entities::{Driver, Rating, Ride, RideRequest, RideStatus};
use crate::error::{conflict_error, Error};

const UNIQUE_VIOLATION: &str = "23505";

const TERMINAL: &str = "('completed', 'cancelled')";

const REQUEST_COLUMNS: &str = "
    r.data,
    ARRAY(SELECT v.driver_id FROM ride_request_views v WHERE v.request_id = r.id) AS seen_by,
    ARRAY(SELECT d.driver_id FROM ride_request_declines d WHERE d.request_id = r.id) AS declined_by
";

pub async fn connect(db_uri: &str, max_connections: u32) -> Result<Pool<Postgres>, Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(db_uri)
        .await?;

    Ok(pool)
}

pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    #[tracing::instrument(name = "PgStore::new", skip_all)]
    pub async fn new(pool: Pool<Postgres>) -> Result<Self, Error> {
        pool.execute(
            "CREATE TABLE IF NOT EXISTS rides (
                id UUID PRIMARY KEY,
                request_id UUID NOT NULL UNIQUE,
                rider_id UUID NOT NULL,
                driver_id UUID,
                status VARCHAR NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )",
        )
        .await?;

        // at most one open ride per rider and per driver
        pool.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS rides_active_rider
                ON rides (rider_id) WHERE status NOT IN ('completed', 'cancelled')",
        )
        .await?;
        pool.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS rides_active_driver
                ON rides (driver_id) WHERE driver_id IS NOT NULL AND status NOT IN ('completed', 'cancelled')",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS ride_requests (
                id UUID PRIMARY KEY,
                ride_id UUID NOT NULL REFERENCES rides (id),
                rider_id UUID NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS ride_request_declines (
                request_id UUID NOT NULL REFERENCES ride_requests (id) ON DELETE CASCADE,
                driver_id UUID NOT NULL,
                PRIMARY KEY (request_id, driver_id)
            )",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS ride_request_views (
                request_id UUID NOT NULL REFERENCES ride_requests (id) ON DELETE CASCADE,
                driver_id UUID NOT NULL,
                PRIMARY KEY (request_id, driver_id)
            )",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS drivers (id UUID PRIMARY KEY, status VARCHAR NOT NULL, data JSONB NOT NULL)",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS ratings (
                ride_id UUID NOT NULL REFERENCES rides (id),
                rater_id UUID NOT NULL,
                data JSONB NOT NULL,
                PRIMARY KEY (ride_id, rater_id)
            )",
        )
        .await?;

        Ok(Self { pool })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

fn ride_from_row(row: PgRow) -> Result<Ride, Error> {
    let Json(ride): Json<Ride> = row.try_get("data")?;

    Ok(ride)
}

fn request_from_row(row: PgRow) -> Result<RideRequest, Error> {
    let Json(mut request): Json<RideRequest> = row.try_get("data")?;
    let seen_by: Vec<Uuid> = row.try_get("seen_by")?;
    let declined_by: Vec<Uuid> = row.try_get("declined_by")?;

    request.seen_by = seen_by.into_iter().collect();
    request.declined_by = declined_by.into_iter().collect();

    Ok(request)
}

#[async_trait]
impl RideStore for PgStore {
    #[tracing::instrument(skip_all, fields(ride_id = %ride.id))]
    async fn insert_ride(&self, ride: &Ride, request: &RideRequest) -> Result<bool, Error> {
        let mut tx = self.pool.begin().await?;

        let inserted = tx
            .execute(
                sqlx::query(
                    "INSERT INTO rides (id, request_id, rider_id, driver_id, status, created_at, data)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(ride.id)
                .bind(ride.request_id)
                .bind(ride.rider_id)
                .bind(ride.driver_id)
                .bind(ride.status.name())
                .bind(ride.created_at)
                .bind(Json(ride)),
            )
            .await;

        match inserted {
            Err(err) if is_unique_violation(&err) => {
                tracing::info!("rider already has an open ride");
                return Ok(false);
            }
            result => {
                result?;
            }
        };

        tx.execute(
            sqlx::query(
                "INSERT INTO ride_requests (id, ride_id, rider_id, expires_at, data)
                VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(request.id)
            .bind(request.ride_id)
            .bind(request.rider_id)
            .bind(request.expires_at)
            .bind(Json(request)),
        )
        .await?;

        tx.commit().await?;

        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn find_ride(&self, id: Uuid) -> Result<Option<Ride>, Error> {
        self.pool
            .fetch_optional(sqlx::query("SELECT data FROM rides WHERE id = $1").bind(id))
            .await?
            .map(ride_from_row)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn find_ride_by_request(&self, request_id: Uuid) -> Result<Option<Ride>, Error> {
        self.pool
            .fetch_optional(
                sqlx::query("SELECT data FROM rides WHERE request_id = $1").bind(request_id),
            )
            .await?
            .map(ride_from_row)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn find_active_ride(&self, actor_id: Uuid) -> Result<Option<Ride>, Error> {
        let query = format!(
            "SELECT data FROM rides
            WHERE (rider_id = $1 OR driver_id = $1) AND status NOT IN {}
            ORDER BY created_at DESC
            LIMIT 1",
            TERMINAL
        );

        self.pool
            .fetch_optional(sqlx::query(&query).bind(actor_id))
            .await?
            .map(ride_from_row)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn list_history(&self, actor_id: Uuid, page: Page) -> Result<Vec<Ride>, Error> {
        let (offset, limit) = page.window();
        let query = format!(
            "SELECT data FROM rides
            WHERE (rider_id = $1 OR driver_id = $1) AND status IN {}
            ORDER BY created_at DESC
            OFFSET $2 LIMIT $3",
            TERMINAL
        );

        self.pool
            .fetch_all(
                sqlx::query(&query)
                    .bind(actor_id)
                    .bind(i64::from(offset))
                    .bind(i64::from(limit)),
            )
            .await?
            .into_iter()
            .map(ride_from_row)
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn list_completed_rides(&self, driver_id: Uuid) -> Result<Vec<Ride>, Error> {
        self.pool
            .fetch_all(
                sqlx::query(
                    "SELECT data FROM rides
                    WHERE driver_id = $1 AND status = $2
                    ORDER BY created_at DESC",
                )
                .bind(driver_id)
                .bind(RideStatus::Completed.name()),
            )
            .await?
            .into_iter()
            .map(ride_from_row)
            .collect()
    }

    #[tracing::instrument(skip_all, fields(ride_id = %ride.id, %expected, to = %ride.status))]
    async fn compare_and_swap(&self, expected: RideStatus, ride: &Ride) -> Result<bool, Error> {
        let mut tx = self.pool.begin().await?;

        let updated = tx
            .execute(
                sqlx::query(
                    "UPDATE rides SET status = $3, driver_id = $4, data = $5
                    WHERE id = $1 AND status = $2",
                )
                .bind(ride.id)
                .bind(expected.name())
                .bind(ride.status.name())
                .bind(ride.driver_id)
                .bind(Json(ride)),
            )
            .await;

        let result = match updated {
            Err(err) if is_unique_violation(&err) => {
                return Err(conflict_error("Driver already has an active ride"));
            }
            result => result?,
        };

        if result.rows_affected() == 0 {
            tracing::info!("stored status moved on, swap refused");
            tx.rollback().await?;
            return Ok(false);
        }

        if ride.status != RideStatus::Requested {
            tx.execute(sqlx::query("DELETE FROM ride_requests WHERE ride_id = $1").bind(ride.id))
                .await?;
        }

        tx.commit().await?;

        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn find_request(&self, request_id: Uuid) -> Result<Option<RideRequest>, Error> {
        let query = format!("SELECT {} FROM ride_requests r WHERE r.id = $1", REQUEST_COLUMNS);

        self.pool
            .fetch_optional(sqlx::query(&query).bind(request_id))
            .await?
            .map(request_from_row)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn list_open_requests(
        &self,
        driver_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RideRequest>, Error> {
        let query = format!(
            "SELECT {}
            FROM
                ride_requests r
                LEFT JOIN ride_request_declines own ON own.request_id = r.id AND own.driver_id = $1
            WHERE
                own.driver_id IS NULL
                AND r.rider_id <> $1
                AND r.expires_at > $2
            ORDER BY r.expires_at ASC",
            REQUEST_COLUMNS
        );

        self.pool
            .fetch_all(sqlx::query(&query).bind(driver_id).bind(now))
            .await?
            .into_iter()
            .map(request_from_row)
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn list_expired_requests(&self, now: DateTime<Utc>) -> Result<Vec<RideRequest>, Error> {
        let query = format!(
            "SELECT {} FROM ride_requests r WHERE r.expires_at <= $1",
            REQUEST_COLUMNS
        );

        self.pool
            .fetch_all(sqlx::query(&query).bind(now))
            .await?
            .into_iter()
            .map(request_from_row)
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn add_decline(&self, request_id: Uuid, driver_id: Uuid) -> Result<bool, Error> {
        let exists = self
            .pool
            .fetch_optional(sqlx::query("SELECT id FROM ride_requests WHERE id = $1").bind(request_id))
            .await?
            .is_some();

        if !exists {
            return Ok(false);
        }

        self.pool
            .execute(
                sqlx::query(
                    "INSERT INTO ride_request_declines (request_id, driver_id)
                    SELECT id, $2 FROM ride_requests WHERE id = $1
                    ON CONFLICT DO NOTHING",
                )
                .bind(request_id)
                .bind(driver_id),
            )
            .await?;

        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_seen(&self, request_ids: &[Uuid], driver_id: Uuid) -> Result<(), Error> {
        if request_ids.is_empty() {
            return Ok(());
        }

        self.pool
            .execute(
                sqlx::query(
                    "INSERT INTO ride_request_views (request_id, driver_id)
                    SELECT id, $2 FROM ride_requests WHERE id = ANY($1)
                    ON CONFLICT DO NOTHING",
                )
                .bind(request_ids)
                .bind(driver_id),
            )
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn find_driver(&self, id: Uuid) -> Result<Option<Driver>, Error> {
        let maybe_row = self
            .pool
            .fetch_optional(sqlx::query("SELECT data FROM drivers WHERE id = $1").bind(id))
            .await?;

        match maybe_row {
            Some(row) => {
                let Json(driver): Json<Driver> = row.try_get("data")?;
                Ok(Some(driver))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn save_driver(&self, driver: &Driver) -> Result<(), Error> {
        self.pool
            .execute(
                sqlx::query(
                    "INSERT INTO drivers (id, status, data) VALUES ($1, $2, $3)
                    ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, data = EXCLUDED.data",
                )
                .bind(driver.id)
                .bind(driver.status.name())
                .bind(Json(driver)),
            )
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn insert_rating(&self, rating: &Rating) -> Result<bool, Error> {
        let result = self
            .pool
            .execute(
                sqlx::query(
                    "INSERT INTO ratings (ride_id, rater_id, data) VALUES ($1, $2, $3)
                    ON CONFLICT DO NOTHING",
                )
                .bind(rating.ride_id)
                .bind(rating.rater_id)
                .bind(Json(rating)),
            )
            .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn has_rated(&self, ride_id: Uuid, rater_id: Uuid) -> Result<bool, Error> {
        let maybe_row = self
            .pool
            .fetch_optional(
                sqlx::query("SELECT ride_id FROM ratings WHERE ride_id = $1 AND rater_id = $2")
                    .bind(ride_id)
                    .bind(rater_id),
            )
            .await?;

        Ok(maybe_row.is_some())
    }
}
