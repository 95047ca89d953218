use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A driver's willingness to be offered ride requests.
///
/// A driver with no stored record is treated as available.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub status: Status,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Offline,
    Available,
}

impl Status {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Available => "available",
        }
    }
}

impl Driver {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            id: user_id,
            status: Status::Available,
        }
    }

    pub fn belongs_to(&self, user_id: Uuid) -> bool {
        self.id == user_id
    }

    pub fn is_available(&self) -> bool {
        self.status == Status::Available
    }

    pub fn set_available(&mut self, available: bool) {
        if available {
            self.start();
        } else {
            self.stop();
        }
    }

    #[tracing::instrument]
    pub fn start(&mut self) {
        self.status = Status::Available;
    }

    #[tracing::instrument]
    pub fn stop(&mut self) {
        self.status = Status::Offline;
    }
}

impl PolarClass for Driver {
    fn get_polar_class_builder() -> oso::ClassBuilder<Driver> {
        oso::Class::builder()
            .name("Driver")
            .add_attribute_getter("id", |recv: &Driver| recv.id)
            .add_attribute_getter("status", |recv: &Driver| recv.status.name().to_string())
            .add_method("belongs_to", Driver::belongs_to)
    }

    fn get_polar_class() -> oso::Class {
        let builder = Driver::get_polar_class_builder();
        builder.build()
    }
}

#[test]
fn availability_toggle() {
    let mut driver = Driver::new(Uuid::new_v4());
    assert!(driver.is_available());

    driver.set_available(false);
    assert_eq!(driver.status, Status::Offline);

    driver.set_available(false);
    assert!(!driver.is_available());

    driver.set_available(true);
    assert!(driver.is_available());
}
