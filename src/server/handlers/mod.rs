pub mod drivers;
pub mod requests;
pub mod rides;
