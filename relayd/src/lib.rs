pub mod client;
pub mod command;
pub mod config;
pub mod connection_manager;
pub mod error;
pub mod server;
pub mod signals;
pub mod stream;
pub mod telemetry;
