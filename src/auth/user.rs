use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const RIDER: &str = "rider";
pub const DRIVER: &str = "driver";
pub const SYSTEM: &str = "system";

/// The authenticated actor behind every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub roles: Vec<String>,
}

impl User {
    pub fn new(id: Uuid, roles: Vec<String>) -> Self {
        Self { id, roles }
    }

    pub fn new_rider(id: Uuid) -> Self {
        Self::new(id, vec![RIDER.into()])
    }

    pub fn new_driver(id: Uuid) -> Self {
        Self::new(id, vec![DRIVER.into()])
    }

    pub fn new_system_user() -> Self {
        Self::new(Uuid::new_v4(), vec![SYSTEM.into()])
    }

    pub fn has_role(&self, role: String) -> bool {
        self.roles.iter().any(|x| x == &role)
    }

    pub fn is_driver(&self) -> bool {
        self.has_role(DRIVER.into())
    }
}

impl PolarClass for User {
    fn get_polar_class_builder() -> oso::ClassBuilder<User> {
        oso::Class::builder()
            .name("User")
            .add_attribute_getter("id", |recv: &User| recv.id)
            .add_attribute_getter("roles", |recv: &User| recv.roles.clone())
            .add_method("has_role", User::has_role)
    }

    fn get_polar_class() -> oso::Class {
        let builder = User::get_polar_class_builder();
        builder.build()
    }
}
