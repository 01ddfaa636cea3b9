//! Byte-level raw-REPL simulator for integration tests.
//!
//! Understands just enough source to exercise the protocol: assignments of
//! integer sums, `print(...)`, `raise Kind('msg')`, a `while True` loop
//! (silent, or printing forever), `microcontroller` run-mode and reset
//! requests, and marshalled calls to registered handlers.
#![allow(dead_code)]

use replboard::core::transport::{Link, TransportSettings};
use replboard::infrastructure::loopback::{LoopbackHandle, LoopbackLink};
use replboard::{Board, BoardConfig, BoardError, BoardResult, ExecMode, Session, Transport};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const BANNER: &[u8] =
    b"\r\nAdafruit CircuitPython 9.0.0 on 2024-01-01; Fake Board with samd21\r\n>>> ";
pub const RAW_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";
pub const READY: &[u8] = b"\r\nPress any key to enter the REPL. Use CTRL-D to reload.\r\n";
pub const UNAME: &str = "(sysname='samd21', nodename='samd21', release='9.0.0', version='9.0.0 on 2024-01-01', machine='Fake Board with samd21')";

/// How a registered remote function behaves when called.
pub enum CallReply {
    Return(String),
    /// Print `output` before returning `value`
    Print { output: String, value: String },
    /// Raise at `line` of the shipped definition
    Raise { line: u32, kind: String, message: String },
}

type Handler = Box<dyn FnMut(&str) -> CallReply + Send>;

#[derive(Default)]
struct Device {
    raw: bool,
    running: bool,
    /// Printed over and over while `running`
    chatter: Option<Vec<u8>>,
    pending: Vec<u8>,
    vars: HashMap<String, i64>,
    handlers: HashMap<String, Handler>,
    program: Option<String>,
    safe_mode: bool,
    next_run_mode: Option<String>,
    run_mode: String,
    resets: usize,
    opens: usize,
    open_bauds: Vec<u32>,
    unavailable_opens: usize,
    written: Vec<u8>,
    executed: Vec<String>,
}

fn traceback(frames: &[(&str, u32, &str)], kind: &str, message: &str) -> String {
    let mut out = String::from("Traceback (most recent call last):\r\n");
    for (file, line, function) in frames {
        out.push_str(&format!("  File \"{}\", line {}, in {}\r\n", file, line, function));
    }
    out.push_str(&format!("{}: {}\r\n", kind, message));
    out
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
        && !matches!(text, "True" | "False" | "None")
}

type Failure = (String, String);

impl Device {
    fn feed(&mut self, data: &[u8]) -> Vec<u8> {
        self.written.extend_from_slice(data);
        let mut reply = Vec::new();

        for &b in data {
            match b {
                0x03 => {
                    if self.running {
                        self.running = false;
                        self.chatter = None;
                        reply.extend_from_slice(&[0x04]);
                        reply.extend_from_slice(
                            traceback(&[("<stdin>", 2, "<module>")], "KeyboardInterrupt", "")
                                .as_bytes(),
                        );
                        reply.extend_from_slice(b"\x04>");
                    }
                    self.pending.clear();
                }
                _ if self.running => {}
                0x02 => {
                    self.raw = false;
                    self.pending.clear();
                    reply.extend_from_slice(BANNER);
                }
                0x01 => {
                    self.raw = true;
                    self.pending.clear();
                    reply.extend_from_slice(RAW_BANNER);
                }
                0x04 if self.raw => {
                    let source = String::from_utf8_lossy(&std::mem::take(&mut self.pending))
                        .into_owned();
                    reply.extend(self.execute(&source));
                }
                0x04 => reply.extend(self.soft_reboot()),
                _ if self.raw => self.pending.push(b),
                _ => {}
            }
        }
        reply
    }

    fn execute(&mut self, source: &str) -> Vec<u8> {
        self.executed.push(source.to_string());

        if source.contains("microcontroller.reset()") {
            self.resets += 1;
            let mode = self.next_run_mode.take().unwrap_or_else(|| "NORMAL".to_string());
            self.safe_mode = mode == "SAFE_MODE";
            self.run_mode = mode;
            self.raw = false;
            self.vars.clear();
            // Drops off the bus without answering
            return Vec::new();
        }

        if source.contains("while True") {
            self.running = true;
            self.chatter = source
                .lines()
                .find_map(|line| line.trim().strip_prefix("print('"))
                .and_then(|rest| rest.strip_suffix("')"))
                .map(|text| format!("{}\r\n", text).into_bytes());
            return b"OK".to_vec();
        }

        let (stdout, stderr) = self.interpret(source);
        let mut reply = b"OK".to_vec();
        reply.extend_from_slice(stdout.as_bytes());
        reply.push(0x04);
        reply.extend_from_slice(stderr.as_bytes());
        reply.push(0x04);
        reply.push(b'>');
        reply
    }

    fn interpret(&mut self, source: &str) -> (String, String) {
        const RUN_MODE: &str = "microcontroller.RunMode.";
        if let Some(start) = source.find(RUN_MODE) {
            let mode: String = source[start + RUN_MODE.len()..]
                .chars()
                .take_while(|c| c.is_ascii_uppercase() || *c == '_')
                .collect();
            self.next_run_mode = Some(mode);
            return (String::new(), String::new());
        }

        if source.contains("BEGINMARKER>") {
            return self.call(source);
        }

        let mut out = String::new();
        for (index, line) in source.lines().enumerate() {
            match self.statement(line) {
                Ok(text) => out.push_str(&text),
                Err((kind, message)) => {
                    let line = index as u32 + 1;
                    return (out, traceback(&[("<stdin>", line, "<module>")], &kind, &message));
                }
            }
        }
        (out, String::new())
    }

    fn statement(&mut self, line: &str) -> Result<String, Failure> {
        let line = line.trim();
        if line.is_empty() || line.starts_with("import ") || line.starts_with('#') {
            return Ok(String::new());
        }

        if let Some(inner) = line.strip_prefix("print(").and_then(|l| l.strip_suffix(')')) {
            if let Some(expr) = inner.strip_suffix(", end=\"\"") {
                return self.show(expr);
            }
            return Ok(format!("{}\r\n", self.show(inner)?));
        }

        if let Some(inner) = line.strip_prefix("raise ") {
            let (kind, rest) = inner.split_once('(').unwrap_or((inner, ")"));
            let message = rest.trim_end_matches(')').trim_matches('\'');
            return Err((kind.to_string(), message.to_string()));
        }

        if let Some((name, expr)) = line.split_once(" = ") {
            let value = self.eval_int(expr)?;
            self.vars.insert(name.trim().to_string(), value);
            return Ok(String::new());
        }

        Err(("SyntaxError".to_string(), "invalid syntax".to_string()))
    }

    fn show(&self, expr: &str) -> Result<String, Failure> {
        let expr = expr.trim();
        if expr.len() >= 2 && expr.starts_with('\'') && expr.ends_with('\'') {
            return Ok(expr[1..expr.len() - 1].to_string());
        }
        if expr == "object()" {
            return Ok("<object object at 0x20001ad0>".to_string());
        }
        if expr.contains('+') || is_identifier(expr) || expr.parse::<i64>().is_ok() || expr == "1/0"
        {
            return Ok(self.eval_int(expr)?.to_string());
        }
        Ok(expr.to_string())
    }

    fn eval_int(&self, expr: &str) -> Result<i64, Failure> {
        let mut total = 0i64;
        for term in expr.split('+') {
            let term = term.trim();
            if term == "1/0" {
                return Err(("ZeroDivisionError".to_string(), "division by zero".to_string()));
            }
            total += match term.parse::<i64>() {
                Ok(n) => n,
                Err(_) => *self.vars.get(term).ok_or_else(|| {
                    ("NameError".to_string(), format!("name '{}' isn't defined", term))
                })?,
            };
        }
        Ok(total)
    }

    fn call(&mut self, source: &str) -> (String, String) {
        let Some((index, call_line)) = source
            .lines()
            .enumerate()
            .find(|(_, line)| line.starts_with("res = "))
        else {
            return (String::new(), traceback(&[], "SyntaxError", "invalid syntax"));
        };
        let call_lineno = index as u32 + 1;

        let invocation = &call_line["res = ".len()..];
        let (name, args) = invocation.split_once('(').unwrap_or((invocation, ")"));
        let args = args.strip_suffix(')').unwrap_or(args);

        let Some(handler) = self.handlers.get_mut(name) else {
            return (
                String::new(),
                traceback(
                    &[("<stdin>", call_lineno, "<module>")],
                    "NameError",
                    &format!("name '{}' isn't defined", name),
                ),
            );
        };

        match handler(args) {
            CallReply::Return(value) => {
                (format!("BEGINMARKER>{}<ENDMARKER\r\n", value), String::new())
            }
            CallReply::Print { output, value } => (
                format!("{}\r\nBEGINMARKER>{}<ENDMARKER\r\n", output, value),
                String::new(),
            ),
            CallReply::Raise { line, kind, message } => (
                String::new(),
                traceback(
                    &[("<stdin>", call_lineno, "<module>"), ("<stdin>", line, name)],
                    &kind,
                    &message,
                ),
            ),
        }
    }

    fn soft_reboot(&mut self) -> Vec<u8> {
        self.vars.clear();
        let mut reply = b"\r\nsoft reboot\r\n\r\nAuto-reload is off.\r\n".to_vec();

        if self.safe_mode {
            reply.extend_from_slice(
                b"Running in safe mode! Not running saved code.\r\n\r\nYou are in safe mode because:\r\nYou requested starting safe mode by reset button.\r\n",
            );
            reply.extend_from_slice(READY);
            return reply;
        }

        match self.program.clone() {
            Some(program) => {
                reply.extend_from_slice(b"code.py output:\r\n");
                let (stdout, stderr) = self.interpret(&program);
                reply.extend_from_slice(stdout.as_bytes());
                reply.extend_from_slice(stderr.as_bytes());
                reply.extend_from_slice(b"\r\n\r\n");
                reply.extend_from_slice(READY);
            }
            None => reply.extend_from_slice(READY),
        }
        reply
    }
}

/// Link to the fake device. While a printing loop runs, the device keeps
/// producing output whenever the host looks for it.
pub struct FakeLink {
    link: LoopbackLink,
    handle: LoopbackHandle,
    device: Arc<Mutex<Device>>,
}

impl Link for FakeLink {
    fn bytes_available(&mut self) -> io::Result<usize> {
        if self.handle.pending() == 0 {
            let chatter = self.device.lock().unwrap().chatter.clone();
            if let Some(chatter) = chatter {
                self.handle.push(&chatter);
            }
        }
        self.link.bytes_available()
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.link.read_bytes(buf)
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.link.write_bytes(data)
    }
}

/// Shared fake device; every link it opens talks to the same interpreter
/// state, so it survives reconnects.
#[derive(Clone)]
pub struct FakeRepl {
    device: Arc<Mutex<Device>>,
}

impl FakeRepl {
    pub fn new() -> Self {
        let repl = Self {
            device: Arc::new(Mutex::new(Device::default())),
        };
        repl.on_call("os_uname", |_| CallReply::Return(UNAME.to_string()));
        repl
    }

    fn device(&self) -> MutexGuard<'_, Device> {
        self.device.lock().unwrap()
    }

    /// Register the remote behaviour of function `name`. The handler gets
    /// the literal argument text of the call.
    pub fn on_call<F>(&self, name: &str, handler: F)
    where
        F: FnMut(&str) -> CallReply + Send + 'static,
    {
        self.device().handlers.insert(name.to_string(), Box::new(handler));
    }

    pub fn link(&self) -> FakeLink {
        let device = Arc::clone(&self.device);
        let (link, handle) =
            LoopbackLink::with_responder(move |data| device.lock().unwrap().feed(data));
        FakeLink {
            link,
            handle,
            device: Arc::clone(&self.device),
        }
    }

    pub fn opener(&self) -> impl Fn(&BoardConfig) -> BoardResult<Box<dyn Link>> + Send + 'static {
        let repl = self.clone();
        move |config: &BoardConfig| {
            {
                let mut device = repl.device();
                device.opens += 1;
                device.open_bauds.push(config.baud_rate);
                if device.unavailable_opens > 0 {
                    device.unavailable_opens -= 1;
                    return Err(BoardError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "device node is gone",
                    )));
                }
            }
            Ok(Box::new(repl.link()) as Box<dyn Link>)
        }
    }

    /// Board wired to this device with fast pacing and no reset delays.
    pub fn board(&self) -> Board {
        Board::new(fast_config())
            .with_opener(self.opener())
            .with_exec_mode(ExecMode::Direct)
            .with_protocol_timeout(Duration::from_millis(500))
    }

    /// Session on a fresh link to this device.
    pub fn session(&self) -> Session {
        let transport = Transport::new(Box::new(self.link()), fast_settings());
        Session::new(transport, Duration::from_millis(500))
    }

    /// Source the next soft reboot runs as its program.
    pub fn stage_program(&self, source: &str) {
        self.device().program = Some(source.to_string());
    }

    pub fn set_safe_mode(&self, safe_mode: bool) {
        self.device().safe_mode = safe_mode;
    }

    /// Make the next `count` opens fail as if the device node were absent.
    pub fn fail_next_opens(&self, count: usize) {
        self.device().unavailable_opens = count;
    }

    pub fn written(&self) -> Vec<u8> {
        self.device().written.clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.device().written)
    }

    pub fn executed(&self) -> Vec<String> {
        self.device().executed.clone()
    }

    pub fn resets(&self) -> usize {
        self.device().resets
    }

    pub fn run_mode(&self) -> String {
        self.device().run_mode.clone()
    }

    pub fn opens(&self) -> usize {
        self.device().opens
    }

    /// Baud rate of every open attempt, in order.
    pub fn open_bauds(&self) -> Vec<u32> {
        self.device().open_bauds.clone()
    }

    pub fn var(&self, name: &str) -> Option<i64> {
        self.device().vars.get(name).copied()
    }
}

pub fn fast_settings() -> TransportSettings {
    TransportSettings {
        write_chunk_size: 64,
        write_pacing: Duration::ZERO,
        poll_interval: Duration::from_millis(1),
    }
}

pub fn fast_config() -> BoardConfig {
    let mut config = BoardConfig::new("/dev/ttyFAKE0");
    config.name = "fake".to_string();
    config.timeout_ms = 2_000;
    config.transport.write_chunk_size = 64;
    config.transport.write_pacing_ms = 0;
    config.transport.poll_interval_ms = 1;
    config.reset.delay_ms = 0;
    config.reset.wait_secs = 0;
    config
}

/// Number of interrupt sequences written, i.e. REPL resets performed.
pub fn count_interrupts(written: &[u8]) -> usize {
    written.windows(3).filter(|w| *w == b"\r\x03\x03").count()
}
