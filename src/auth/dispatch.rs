use oso::PolarClass;

/// Resource for actions that do not target one existing ride. Rules match
/// on the `area` the action belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Booking,
    RequestBoard,
    Fares,
    OwnRides,
}

impl Dispatch {
    pub fn area(&self) -> &'static str {
        match self {
            Self::Booking => "booking",
            Self::RequestBoard => "request_board",
            Self::Fares => "fares",
            Self::OwnRides => "own_rides",
        }
    }
}

impl PolarClass for Dispatch {
    fn get_polar_class_builder() -> oso::ClassBuilder<Dispatch> {
        oso::Class::builder()
            .name("Dispatch")
            .add_attribute_getter("area", |recv: &Dispatch| recv.area().to_string())
    }

    fn get_polar_class() -> oso::Class {
        let builder = Dispatch::get_polar_class_builder();
        builder.build()
    }
}
