pub mod authorizor;
mod dispatch;
mod token;
mod user;

pub use dispatch::Dispatch;
pub use token::{Claims, TokenVerifier};
pub use user::{User, DRIVER, RIDER, SYSTEM};
