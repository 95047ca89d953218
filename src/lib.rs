pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod engine;
pub mod entities;
pub mod error;
pub mod fare;
pub mod server;
pub mod sync;
