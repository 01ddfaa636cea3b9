//! Facade over one device: connection lifecycle, code execution, remote
//! calls, resets and identity.

use crate::core::marshal::{literal, CallCodec, RemoteCall, RemoteFunction, SourceCodec};
use crate::core::session::Session;
use crate::core::transport::{Link, Transport, TransportSettings};
use crate::domain::{
    config::{BoardConfig, ExecMode, GlobalConfig, RetryPolicy},
    error::{BoardError, BoardResult},
    session_log::SessionLog,
    traceback::RemoteError,
    value::{Uname, Value},
};
use crate::infrastructure::serial::{find_serial_number, SerialOpener};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Opens the byte channel for a board.
pub trait LinkOpener: Send {
    fn open_link(&self, config: &BoardConfig) -> BoardResult<Box<dyn Link>>;
}

impl<F> LinkOpener for F
where
    F: Fn(&BoardConfig) -> BoardResult<Box<dyn Link>> + Send,
{
    fn open_link(&self, config: &BoardConfig) -> BoardResult<Box<dyn Link>> {
        self(config)
    }
}

/// Places a program on the device's storage so a soft reboot runs it.
pub trait ProgramStager: Send {
    fn stage(&mut self, board: &BoardConfig, program: &Path) -> BoardResult<()>;
}

impl<F> ProgramStager for F
where
    F: FnMut(&BoardConfig, &Path) -> BoardResult<()> + Send,
{
    fn stage(&mut self, board: &BoardConfig, program: &Path) -> BoardResult<()> {
        self(board, program)
    }
}

/// Options for [`Board::exec`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOptions {
    /// Bound on the program's run time; the board timeout when `None`
    pub timeout: Option<Duration>,
    /// Interrupt and resynchronise before submitting
    pub reset_first: bool,
    /// Surface known exception kinds as [`BoardError::Exception`]
    pub raise_remote: bool,
    /// Return right after submission without reading any output
    pub fire_and_forget: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            reset_first: true,
            raise_remote: true,
            fire_and_forget: false,
        }
    }
}

impl ExecOptions {
    /// Submit without resetting, so earlier definitions stay bound.
    pub fn keep_session() -> Self {
        Self {
            reset_first: false,
            ..Self::default()
        }
    }
}

/// Options for [`Board::eval`].
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOptions {
    pub exec: ExecOptions,
    /// Fail on output outside the literal grammar instead of returning it
    /// as an opaque value
    pub strict: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            exec: ExecOptions::default(),
            strict: true,
        }
    }
}

/// What the firmware boots into after [`Board::reset_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Normal,
    SafeMode,
    Bootloader,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Normal => "NORMAL",
            RunMode::SafeMode => "SAFE_MODE",
            RunMode::Bootloader => "BOOTLOADER",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opening the port at this rate and closing it again asks the firmware
/// to restart into its bootloader.
pub const BOOTLOADER_TOUCH_BAUD: u32 = 1200;

const BOOTLOADER_TOUCH_TIMEOUT_MS: u64 = 4_000;

/// Built-in remote function returning the device's `os.uname()`.
pub fn os_uname() -> RemoteFunction {
    RemoteFunction::new(
        "os_uname",
        "def os_uname():\n    import os\n    return os.uname()\n",
    )
}

/// One device reached through its interactive prompt.
///
/// Not safe for concurrent use; drive several devices with one `Board`
/// each.
pub struct Board {
    config: BoardConfig,
    protocol_timeout: Duration,
    exec_mode: ExecMode,
    opener: Box<dyn LinkOpener>,
    codec: Box<dyn CallCodec>,
    stager: Option<Box<dyn ProgramStager>>,
    session: Option<Session>,
}

impl Board {
    /// Board on a serial device with global defaults.
    pub fn new(config: BoardConfig) -> Self {
        Self::with_global(config, &GlobalConfig::default())
    }

    pub fn with_global(config: BoardConfig, global: &GlobalConfig) -> Self {
        Self {
            config,
            protocol_timeout: global.protocol_timeout(),
            exec_mode: global.effective_exec_mode(),
            opener: Box::new(SerialOpener),
            codec: Box::new(SourceCodec::new()),
            stager: None,
            session: None,
        }
    }

    pub fn with_opener(mut self, opener: impl LinkOpener + 'static) -> Self {
        self.opener = Box::new(opener);
        self
    }

    pub fn with_codec(mut self, codec: impl CallCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    pub fn with_stager(mut self, stager: impl ProgramStager + 'static) -> Self {
        self.stager = Some(Box::new(stager));
        self
    }

    pub fn with_exec_mode(mut self, exec_mode: ExecMode) -> Self {
        self.exec_mode = exec_mode;
        self
    }

    pub fn with_protocol_timeout(mut self, timeout: Duration) -> Self {
        self.protocol_timeout = timeout;
        self
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn device(&self) -> &str {
        &self.config.device
    }

    pub fn baud_rate(&self) -> u32 {
        self.config.baud_rate
    }

    pub fn exec_mode(&self) -> ExecMode {
        self.exec_mode
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> BoardResult<&mut Session> {
        self.session.as_mut().ok_or(BoardError::NotConnected)
    }

    /// Open the link, retrying while the device node is absent.
    ///
    /// `wait` overrides the configured wait in seconds. Opening an open
    /// board does nothing.
    pub fn open(&mut self, wait: Option<u32>) -> BoardResult<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let policy = wait
            .map(RetryPolicy::from_wait)
            .unwrap_or_else(|| self.config.retry_policy());

        let mut last_error = None;
        for attempt in 1..=policy.max_attempts {
            match self.opener.open_link(&self.config) {
                Ok(link) => {
                    let transport =
                        Transport::new(link, TransportSettings::from(&self.config.transport));
                    self.session = Some(Session::new(transport, self.protocol_timeout));
                    info!("Connected to {} (attempt {})", self.config.device, attempt);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Open attempt {} for {} failed: {}", attempt, self.config.device, e);
                    last_error = Some(e);
                    if attempt < policy.max_attempts {
                        if attempt == 1 {
                            info!(
                                "Waiting up to {} attempt(s) for {}",
                                policy.max_attempts, self.config.device
                            );
                        }
                        std::thread::sleep(policy.delay);
                    }
                }
            }
        }

        Err(BoardError::Connect {
            device: self.config.device.clone(),
            attempts: policy.max_attempts,
            message: last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string()),
        })
    }

    pub fn close(&mut self) {
        if self.session.take().is_some() {
            info!("Disconnected from {}", self.config.device);
        }
    }

    /// Open, run `f`, and close again whatever `f` returns.
    pub fn with_open<T, F>(&mut self, f: F) -> BoardResult<T>
    where
        F: FnOnce(&mut Board) -> BoardResult<T>,
    {
        self.open(None)?;
        let result = f(self);
        self.close();
        result
    }

    /// Run `source` and return its stdout.
    ///
    /// Anything on stderr becomes a remote error.
    pub fn exec(&mut self, source: &[u8], options: &ExecOptions) -> BoardResult<Vec<u8>> {
        self.exec_with_sink(source, options, None)
    }

    /// [`exec`](Self::exec), mirroring stdout to `sink` as it arrives.
    pub fn exec_with_sink(
        &mut self,
        source: &[u8],
        options: &ExecOptions,
        sink: Option<&mut dyn Write>,
    ) -> BoardResult<Vec<u8>> {
        let timeout = options.timeout.unwrap_or(self.config.timeout());
        let session = self.session_mut()?;

        if options.reset_first {
            session.reset()?;
        }

        let (stdout, stderr) =
            session.execute(source, Some(timeout), options.fire_and_forget, sink)?;

        if !stderr.is_empty() {
            let remote = RemoteError::from_stderr(&stderr, session.log().clone());
            debug!("Remote failure: {}", remote);
            return Err(remote.into_error(options.raise_remote));
        }
        Ok(stdout)
    }

    /// Evaluate `expression` on the device and decode the printed value.
    pub fn eval(&mut self, expression: &str, options: &EvalOptions) -> BoardResult<Value> {
        let command = format!("print({}, end=\"\")", expression);
        let output = self.exec(command.as_bytes(), &options.exec)?;
        let text = String::from_utf8_lossy(&output);

        if !options.strict {
            return Ok(literal::decode(&text));
        }

        literal::parse_literal(text.trim()).map_err(|e| BoardError::Protocol {
            message: format!("failed to eval {:?}: {}", text, e),
            session: self.session_log(),
        })
    }

    /// Run a local function on the device and return its result.
    ///
    /// A remote failure inside the function is spliced onto the local
    /// definition; known exception kinds surface as
    /// [`BoardError::Exception`].
    pub fn call(&mut self, call: &RemoteCall) -> BoardResult<Value> {
        self.call_with_sink(call, None)
    }

    pub fn call_with_sink(
        &mut self,
        call: &RemoteCall,
        sink: Option<&mut dyn Write>,
    ) -> BoardResult<Value> {
        let source = self
            .codec
            .encode(call)
            .map_err(|e| BoardError::InvalidInput(e.to_string()))?;

        let options = ExecOptions {
            timeout: call.call_timeout(),
            reset_first: call.resets_first(),
            raise_remote: false,
            fire_and_forget: false,
        };

        let output = match self.exec_with_sink(source.as_bytes(), &options, sink) {
            Ok(output) => output,
            Err(BoardError::Remote(mut remote)) => {
                if !remote.splice(call.function()) {
                    debug!("No frame of {} in remote traceback", call.function().name);
                }
                return Err((*remote).into_error(true));
            }
            Err(e) => return Err(e),
        };

        self.codec.decode(&output).map_err(|e| BoardError::Protocol {
            message: e.to_string(),
            session: self.session_log(),
        })
    }

    /// Reboot the device, optionally into safe mode, and reconnect.
    pub fn reset(&mut self, safe_mode: bool) -> BoardResult<()> {
        self.reset_into(if safe_mode {
            RunMode::SafeMode
        } else {
            RunMode::Normal
        })
    }

    /// Schedule `mode` for the next boot, reboot, and reconnect.
    ///
    /// A board sent to the bootloader stays closed; its serial port does
    /// not come back as an interpreter prompt.
    pub fn reset_into(&mut self, mode: RunMode) -> BoardResult<()> {
        info!("Resetting {} into {}", self.config.device, mode);

        let schedule = format!(
            "import microcontroller;microcontroller.on_next_reset(microcontroller.RunMode.{})",
            mode
        );
        self.exec(schedule.as_bytes(), &ExecOptions::default())?;

        let reboot = ExecOptions {
            fire_and_forget: true,
            ..ExecOptions::default()
        };
        // The link usually drops mid-write
        if let Err(e) = self.exec(b"import microcontroller;microcontroller.reset()", &reboot) {
            debug!("Ignoring error from reset request: {}", e);
        }

        self.close();
        if mode == RunMode::Bootloader {
            return Ok(());
        }

        let delay = self.config.reset.delay();
        std::thread::sleep(delay);
        self.open(Some(self.config.reset.wait_secs))?;
        std::thread::sleep(delay);
        Ok(())
    }

    /// Send the device to its bootloader and leave the board closed.
    ///
    /// With `via_repl` the request goes through the prompt, for boards that
    /// ignore the baud-rate touch; otherwise the port is reopened at
    /// [`BOOTLOADER_TOUCH_BAUD`] and closed again.
    pub fn reset_to_bootloader(&mut self, via_repl: bool) -> BoardResult<()> {
        if via_repl {
            return self.reset_into(RunMode::Bootloader);
        }

        self.close();
        let mut touch = self.config.clone();
        touch.baud_rate = BOOTLOADER_TOUCH_BAUD;
        touch.timeout_ms = BOOTLOADER_TOUCH_TIMEOUT_MS;
        let link = self.opener.open_link(&touch)?;
        drop(link);
        info!("Touched {} at {} baud", self.config.device, BOOTLOADER_TOUCH_BAUD);
        Ok(())
    }

    /// Run a program file and return its output.
    ///
    /// [`ExecMode::Direct`] sends the file as source text;
    /// [`ExecMode::Staged`] hands it to the program stager and soft-reboots.
    pub fn execfile(&mut self, path: &Path) -> BoardResult<Vec<u8>> {
        match self.exec_mode {
            ExecMode::Direct => {
                let source = std::fs::read(path)?;
                self.exec(&source, &ExecOptions::default())
            }
            ExecMode::Staged => {
                let stager = self.stager.as_mut().ok_or_else(|| BoardError::Config {
                    message: "staged execution needs a program stager".to_string(),
                })?;
                stager.stage(&self.config, path)?;
                info!("Staged {} on {}", path.display(), self.config.device);

                let timeout = self.config.timeout();
                let session = self.session_mut()?;
                if session.is_degraded() {
                    warn!("Device is in safe mode; staged program will not run");
                }
                session.run(Some(timeout))
            }
        }
    }

    /// USB serial number of the configured device, when it has one.
    pub fn serial_number(&self) -> BoardResult<Option<String>> {
        find_serial_number(&self.config.device)
    }

    /// The device's `os.uname()`.
    pub fn uname(&mut self) -> BoardResult<Uname> {
        let value = self.call(&RemoteCall::new(os_uname()))?;
        Uname::try_from(&value).map_err(|message| BoardError::Protocol {
            message,
            session: self.session_log(),
        })
    }

    fn session_log(&self) -> SessionLog {
        self.session
            .as_ref()
            .map(|s| s.log().clone())
            .unwrap_or_default()
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        self.close();
    }
}
