//! ReplBoard Library
//!
//! Drives the interactive interpreter prompt of a CircuitPython or
//! MicroPython board over a serial link, turning it into a remote-call
//! channel: run source, evaluate expressions, call local function
//! definitions on the device and get structured values and tracebacks back.

pub mod core;
pub mod domain;
pub mod infrastructure;

pub use crate::domain::error::{BoardError, BoardResult};
pub use crate::domain::config::{BoardConfig, ExecMode, ReplBoardConfig};
pub use crate::domain::session_log::SessionLog;
pub use crate::domain::value::{Record, Uname, Value};
pub use crate::core::board::{Board, EvalOptions, ExecOptions, LinkOpener, ProgramStager, RunMode};
pub use crate::core::marshal::{CallCodec, RemoteCall, RemoteFunction, SourceCodec};
pub use crate::core::session::{Session, SessionState};
pub use crate::domain::traceback::{ExceptionKind, Frame, RemoteError};
pub use crate::core::transport::{Link, Transport};
