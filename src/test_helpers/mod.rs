// Test Helpers Module
//
// Mock connector, static tenant directory and runtime setup used by this crate's unit
// tests, the integration tests under tests/ and the benches.

pub mod mock_connector;
pub mod test_utils;

pub use mock_connector::{MockConnection, MockConnector, StaticDirectory};
pub use test_utils::{get_test_database_url, mock_runtime_builder, setup_test_environment};
