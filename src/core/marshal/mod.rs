// Marshal module - Call encoding and literal value decoding
pub mod call;
pub mod literal;

pub use crate::domain::function::{RemoteFunction, ANONYMOUS_SOURCE};
pub use call::{
    extract_envelope, CallCodec, MarshalError, RemoteCall, SourceCodec, BEGIN_MARKER, END_MARKER,
};
pub use literal::{decode, parse_literal, LiteralError};
