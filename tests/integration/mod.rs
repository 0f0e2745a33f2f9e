//! Integration tests with mock HTTP server

pub mod gems;
pub mod mock_server;
pub mod session;
