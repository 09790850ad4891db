pub mod config;
pub mod error;
pub mod node;
pub mod panel;
pub mod proxy_sim;
pub mod telemetry;
