//! tempchain coordinator
//!
//! Accepts agent connections over WebSocket, assigns rounds from the
//! operator console and prints a report once every assigned agent has
//! answered or gone away.

pub mod console;
pub mod error;
pub mod server;
pub mod service;
pub mod socket;

pub use error::{AppError, AppResult};
