//! Domain Module
//!
//! Types shared by the topology core, its collaborators and the goal layer.
//!
//! - [`models`] - identities, results, parameters and events
//! - [`services`] - interfaces of the externally-owned subsystems
//! - [`settings`] - persisted configuration

pub mod models;
pub mod services;
pub mod settings;
