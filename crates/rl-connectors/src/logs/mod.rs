//! Log backend connectors.

pub mod gateway;
pub mod mock;

pub use gateway::LogGatewayClient;
pub use mock::MockLogQueryClient;
