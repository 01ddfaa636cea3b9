// Serial module - Serial port links
pub mod client;

pub use client::{available_devices, find_serial_number, SerialLink, SerialOpener};
