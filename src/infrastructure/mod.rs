// Infrastructure module - External dependencies and adapters
pub mod serial;
pub mod loopback;
pub mod logging;
pub mod config;
