//! LiftUp keeps a microentrepreneur's income and expense transactions in a client-side store that
//! stays in sync with a remote document collection, reports denied reads and writes on an error
//! channel, and binds the signed-in user to the store and to the routes they may visit.

pub mod advisor;
pub mod api;
pub mod args;
pub mod auth;
pub mod channel;
pub mod commands;
mod config;
mod error;
pub mod model;
pub mod session;
pub mod store;
mod utils;


pub use api::Mode;
pub use config::{AdvisorConfig, Config};
pub use error::{AuthError, AuthErrorCode, Error, RemoteError, Result};
