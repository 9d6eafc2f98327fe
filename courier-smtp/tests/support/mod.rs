pub mod mock_api;
pub mod mock_server;
