//! # tempchain core
//!
//! Shared building blocks of the tempchain fleet: a coordinator hands out
//! rounds of sensor-to-ledger work to connected agents and collects one
//! result per agent.
//!
//! ## Coordinator side
//! - Connected agents ([`agent_registry`])
//! - Round bookkeeping ([`pending_set`])
//! - The round-dispatch state machine ([`coordinator`])
//!
//! ## Agent side
//! - Round execution ([`executor`])
//! - Per-round settlement tracking ([`operation_counter`])
//! - External collaborators ([`ledger`], [`sensor`])
//!
//! ## Shared
//! - Wire frames ([`protocol`]) and round types ([`round`])
//! - Configuration ([`config`]) and errors ([`error`])

pub mod agent_registry;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod operation_counter;
pub mod pending_set;
pub mod protocol;
pub mod round;
pub mod sensor;

pub use error::*;
