// Core module - REPL protocol, marshalling and board facade
pub mod board;
pub mod marshal;
pub mod session;
pub mod transport;
