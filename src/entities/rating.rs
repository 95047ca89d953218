use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{validation_error, Error};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub ride_id: Uuid,
    pub rater_id: Uuid,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Rating {
    pub fn new(
        ride_id: Uuid,
        rater_id: Uuid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Self, Error> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(validation_error(format!(
                "rating must be between {} and {}",
                MIN_RATING, MAX_RATING
            )));
        }

        let comment = comment
            .map(|comment| comment.trim().to_string())
            .filter(|comment| !comment.is_empty());

        Ok(Self {
            ride_id,
            rater_id,
            rating,
            comment,
            created_at: Utc::now(),
        })
    }
}

#[test]
fn rating_bounds() {
    let ride_id = Uuid::new_v4();
    let rater_id = Uuid::new_v4();

    assert!(Rating::new(ride_id, rater_id, 0, None)
        .unwrap_err()
        .is_validation_error());
    assert!(Rating::new(ride_id, rater_id, 6, None).is_err());

    let rating = Rating::new(ride_id, rater_id, 5, Some("  ".into())).unwrap();
    assert_eq!(rating.rating, 5);
    assert!(rating.comment.is_none());
}
