//! Management HTTP surface.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{serve, AppState};
