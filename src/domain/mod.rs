// Domain module - Plain data shared across layers
pub mod config;
pub mod error;
pub mod function;
pub mod session_log;
pub mod traceback;
pub mod value;
