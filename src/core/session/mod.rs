// Session module - REPL session driving
pub mod protocol;
pub mod session;
pub mod state;

pub use session::Session;
pub use state::SessionState;
