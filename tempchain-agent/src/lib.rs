//! tempchain agent
//!
//! Connects to a coordinator, runs the rounds it is assigned against a
//! JSON-RPC ledger and reports one result per round.

pub mod client;
pub mod config;
pub mod error;
pub mod ledger;
pub mod sensors;

pub use error::{ClientError, ClientResult};
