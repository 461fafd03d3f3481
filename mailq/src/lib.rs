pub mod config;
pub mod controller;

pub use config::{TransportConfig, find_config_file};
pub use controller::Mailq;
