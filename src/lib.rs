pub mod coalescer;
pub mod config;
pub mod dispatch;
pub mod dlq;
pub mod error;
pub mod http_server;
pub mod types;
pub mod verification;
