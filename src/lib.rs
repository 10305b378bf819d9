/// authgate - username/password authentication service
///
/// Registration, JWT login with single-slot refresh tokens, profile
/// self-service, account administration, avatars and an activity trail.

pub mod account;
pub mod api;
pub mod auth;
pub mod avatar;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod server;
