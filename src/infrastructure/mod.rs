//! Infrastructure Module
//!
//! - [`dispatcher`] - message queue, timers and subscriptions
//! - [`logging`] - tracing subscriber setup
//! - [`simulator`] - simulated collaborators for the simulator binary

pub mod dispatcher;
pub mod logging;
pub mod simulator;
