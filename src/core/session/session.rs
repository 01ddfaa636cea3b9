use crate::core::session::protocol;
use crate::core::session::state::SessionState;
use crate::core::transport::Transport;
use crate::domain::error::{BoardError, BoardResult};
use crate::domain::session_log::SessionLog;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info, warn};

/// REPL driver over one board's transport.
///
/// Calls are strictly sequential: one submission in flight, no pipelining.
/// After any error (a timeout in particular) the prompt position is unknown
/// and the session stays in [`SessionState::Executing`] until [`reset`]
/// resynchronises it.
///
/// [`reset`]: Session::reset
pub struct Session {
    transport: Transport,
    state: SessionState,
    degraded: bool,
    protocol_timeout: Duration,
}

impl Session {
    pub fn new(transport: Transport, protocol_timeout: Duration) -> Self {
        Self {
            transport,
            state: SessionState::Disconnected,
            degraded: false,
            protocol_timeout,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the device reported safe mode during [`run`](Self::run).
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn log(&self) -> &SessionLog {
        self.transport.log()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn protocol_error(&self, message: String) -> BoardError {
        BoardError::Protocol {
            message,
            session: self.transport.log().clone(),
        }
    }

    /// Interrupt whatever is running and wait for the friendly prompt.
    ///
    /// Safe from any state, including after a timeout left stray bytes.
    pub fn reset(&mut self) -> BoardResult<()> {
        self.set_state(SessionState::Disconnected);

        // Stale output from an aborted exchange must not end up in the log
        self.transport.read()?;
        self.transport.clear_log();

        self.transport.write(protocol::INTERRUPT, None)?;
        self.transport.write(protocol::FRIENDLY_REQUEST, None)?;
        self.transport
            .read_until(protocol::FRIENDLY_PROMPT, Some(self.protocol_timeout), None)?;

        self.set_state(SessionState::Interrupted);
        Ok(())
    }

    /// Submit `source` in raw mode and collect its stdout and stderr blocks.
    ///
    /// `timeout` bounds the program's own run time (the stdout block); the
    /// fixed protocol waits use the session's protocol timeout. With
    /// `fire_and_forget` the call returns right after the execute byte with
    /// empty blocks, for code that reboots or hangs the device.
    pub fn execute(
        &mut self,
        source: &[u8],
        timeout: Option<Duration>,
        fire_and_forget: bool,
        sink: Option<&mut dyn Write>,
    ) -> BoardResult<(Vec<u8>, Vec<u8>)> {
        if !self.state.accepts_source() {
            return Err(self.protocol_error(format!(
                "session is {}; reset() is required before executing",
                self.state
            )));
        }

        let result = self.submit(source, timeout, fire_and_forget, sink);
        match &result {
            Ok(_) if !fire_and_forget => self.set_state(SessionState::RawMode),
            Ok(_) => {}
            Err(e) => {
                warn!("Execution aborted, session needs a reset: {}", e);
                self.set_state(SessionState::Executing);
            }
        }
        result
    }

    fn submit(
        &mut self,
        source: &[u8],
        timeout: Option<Duration>,
        fire_and_forget: bool,
        sink: Option<&mut dyn Write>,
    ) -> BoardResult<(Vec<u8>, Vec<u8>)> {
        self.transport.read()?;

        self.transport.write(protocol::ENTER_RAW, None)?;
        self.transport
            .read_until(protocol::RAW_PROMPT, Some(self.protocol_timeout), None)?;
        self.set_state(SessionState::RawMode);

        // Source must be fully on the wire before the execute byte
        self.transport.write(source, None)?;
        self.transport.write(protocol::EXECUTE, None)?;
        self.set_state(SessionState::Executing);
        debug!("Submitted {} bytes of source", source.len());

        if fire_and_forget {
            return Ok((Vec::new(), Vec::new()));
        }

        self.transport
            .read_until(protocol::ACK, Some(self.protocol_timeout), None)?;

        let mut stdout = self
            .transport
            .read_until(protocol::END_OF_BLOCK, timeout, sink)?;
        stdout.pop();

        let mut stderr = self.transport.read_until(
            protocol::END_OF_BLOCK,
            Some(self.protocol_timeout),
            None,
        )?;
        stderr.pop();

        Ok((stdout, stderr))
    }

    /// Soft-reboot the device and return the output of its staged program.
    ///
    /// A safe-mode banner marks the session degraded and every later call
    /// fails immediately with [`BoardError::DegradedDevice`]. The device is
    /// left waiting for a key, so the state stays `Executing`.
    pub fn run(&mut self, timeout: Option<Duration>) -> BoardResult<Vec<u8>> {
        if self.degraded {
            return Err(BoardError::DegradedDevice {
                session: self.transport.log().clone(),
            });
        }

        self.reset()?;
        self.transport.write(protocol::SOFT_REBOOT, None)?;
        self.set_state(SessionState::Executing);

        let (banner, matched) = self.transport.read_until_any(
            &[protocol::PROGRAM_OUTPUT_HEADER, protocol::REPL_READY_MARKER],
            Some(self.protocol_timeout),
            None,
        )?;

        if protocol::is_degraded_banner(&banner) {
            warn!("Device is running in safe mode");
            self.degraded = true;
            return Err(BoardError::DegradedDevice {
                session: self.transport.log().clone(),
            });
        }

        if matched == 1 {
            info!("Device has no program to run");
            return Ok(Vec::new());
        }

        let mut output = self
            .transport
            .read_until(protocol::REPL_READY_MARKER, timeout, None)?;
        output.truncate(output.len() - protocol::REPL_READY_MARKER.len());
        if output.ends_with(protocol::TRAILING_BLANK_LINE) {
            output.truncate(output.len() - protocol::TRAILING_BLANK_LINE.len());
        }
        Ok(output)
    }
}
