//! Command implementations that need more than a few lines of wiring.

pub mod investigate;

pub use investigate::{ConnectorSet, InvestigationRuntime};
