//! Startup wiring: configuration loading and service construction.

pub mod config;
pub mod services;

pub use config::load_config;
pub use services::{init_services, Services};
