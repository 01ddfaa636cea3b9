//! Rebuilds structured failures from the device's stderr text.
//!
//! Parsing is best-effort: any deviation from the traceback grammar leaves
//! the error with its raw text only, and never produces a second error.

use crate::domain::error::BoardError;
use crate::domain::function::{RemoteFunction, ANONYMOUS_SOURCE};
use crate::domain::session_log::SessionLog;
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

pub const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

fn frame_pattern() -> &'static Regex {
    static FRAME: OnceLock<Regex> = OnceLock::new();
    FRAME.get_or_init(|| {
        Regex::new(r#"^ +File "(.+)", line (\d+)(, in (.+))?"#).unwrap_or_else(|e| {
            unreachable!("frame pattern is a valid regex: {e}")
        })
    })
}

/// One `File "...", line N, in name` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub file: String,
    pub line: u32,
    pub function: Option<String>,
}

impl Frame {
    pub fn new(file: impl Into<String>, line: u32, function: Option<&str>) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.map(str::to_string),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File \"{}\", line {}", self.file, self.line)?;
        if let Some(function) = &self.function {
            write!(f, ", in {}", function)?;
        }
        Ok(())
    }
}

/// Parsed form of a traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traceback {
    pub frames: Vec<Frame>,
    /// Exception name as printed, e.g. `AssertionError` or `module.Error`
    pub kind: String,
    /// Text after the first colon, trimmed; `None` when empty
    pub message: Option<String>,
}

/// Parse `text` as a traceback. Returns `None` when it doesn't follow the
/// grammar exactly.
pub fn parse_traceback(text: &str) -> Option<Traceback> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < 3 || lines[0] != TRACEBACK_HEADER {
        return None;
    }

    let mut frames = Vec::with_capacity(lines.len() - 2);
    for line in &lines[1..lines.len() - 1] {
        let caps = frame_pattern().captures(line)?;
        let line_number = caps[2].parse().ok()?;
        frames.push(Frame {
            file: caps[1].to_string(),
            line: line_number,
            function: caps.get(4).map(|m| m.as_str().to_string()),
        });
    }

    let (kind, message) = lines[lines.len() - 1].split_once(':')?;
    let message = message.trim();
    Some(Traceback {
        frames,
        kind: kind.to_string(),
        message: (!message.is_empty()).then(|| message.to_string()),
    })
}

/// Built-in exception types of the device's interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    ArithmeticError,
    AssertionError,
    AttributeError,
    BaseException,
    EOFError,
    Exception,
    GeneratorExit,
    ImportError,
    IndentationError,
    IndexError,
    KeyError,
    KeyboardInterrupt,
    LookupError,
    MemoryError,
    NameError,
    NotImplementedError,
    OSError,
    OverflowError,
    RuntimeError,
    StopIteration,
    SyntaxError,
    SystemExit,
    TimeoutError,
    TypeError,
    UnicodeError,
    ValueError,
    ZeroDivisionError,
}

impl ExceptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionKind::ArithmeticError => "ArithmeticError",
            ExceptionKind::AssertionError => "AssertionError",
            ExceptionKind::AttributeError => "AttributeError",
            ExceptionKind::BaseException => "BaseException",
            ExceptionKind::EOFError => "EOFError",
            ExceptionKind::Exception => "Exception",
            ExceptionKind::GeneratorExit => "GeneratorExit",
            ExceptionKind::ImportError => "ImportError",
            ExceptionKind::IndentationError => "IndentationError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::KeyboardInterrupt => "KeyboardInterrupt",
            ExceptionKind::LookupError => "LookupError",
            ExceptionKind::MemoryError => "MemoryError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::NotImplementedError => "NotImplementedError",
            ExceptionKind::OSError => "OSError",
            ExceptionKind::OverflowError => "OverflowError",
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::StopIteration => "StopIteration",
            ExceptionKind::SyntaxError => "SyntaxError",
            ExceptionKind::SystemExit => "SystemExit",
            ExceptionKind::TimeoutError => "TimeoutError",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::UnicodeError => "UnicodeError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
        }
    }
}

impl FromStr for ExceptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "ArithmeticError" => ExceptionKind::ArithmeticError,
            "AssertionError" => ExceptionKind::AssertionError,
            "AttributeError" => ExceptionKind::AttributeError,
            "BaseException" => ExceptionKind::BaseException,
            "EOFError" => ExceptionKind::EOFError,
            "Exception" => ExceptionKind::Exception,
            "GeneratorExit" => ExceptionKind::GeneratorExit,
            "ImportError" => ExceptionKind::ImportError,
            "IndentationError" => ExceptionKind::IndentationError,
            "IndexError" => ExceptionKind::IndexError,
            "KeyError" => ExceptionKind::KeyError,
            "KeyboardInterrupt" => ExceptionKind::KeyboardInterrupt,
            "LookupError" => ExceptionKind::LookupError,
            "MemoryError" => ExceptionKind::MemoryError,
            "NameError" => ExceptionKind::NameError,
            "NotImplementedError" => ExceptionKind::NotImplementedError,
            "OSError" => ExceptionKind::OSError,
            "OverflowError" => ExceptionKind::OverflowError,
            "RuntimeError" => ExceptionKind::RuntimeError,
            "StopIteration" => ExceptionKind::StopIteration,
            "SyntaxError" => ExceptionKind::SyntaxError,
            "SystemExit" => ExceptionKind::SystemExit,
            "TimeoutError" => ExceptionKind::TimeoutError,
            "TypeError" => ExceptionKind::TypeError,
            "UnicodeError" => ExceptionKind::UnicodeError,
            "ValueError" => ExceptionKind::ValueError,
            "ZeroDivisionError" => ExceptionKind::ZeroDivisionError,
            _ => return Err(format!("Unknown exception kind: {}", s)),
        };
        Ok(kind)
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by code running on the device.
#[derive(Debug, Clone)]
pub struct RemoteError {
    raw: Vec<u8>,
    session: SessionLog,
    traceback: Option<Traceback>,
    exception: Option<ExceptionKind>,
    display_frames: Option<Vec<Frame>>,
}

impl RemoteError {
    pub fn from_stderr(stderr: &[u8], session: SessionLog) -> Self {
        let traceback = parse_traceback(&String::from_utf8_lossy(stderr));
        let exception = traceback.as_ref().and_then(|tb| tb.kind.parse().ok());
        Self {
            raw: stderr.to_vec(),
            session,
            traceback,
            exception,
            display_frames: None,
        }
    }

    /// The stderr bytes exactly as received.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn raw_text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    pub fn session(&self) -> &SessionLog {
        &self.session
    }

    pub fn traceback(&self) -> Option<&Traceback> {
        self.traceback.as_ref()
    }

    /// Exception name as printed by the device, resolved or not.
    pub fn kind(&self) -> Option<&str> {
        self.traceback.as_ref().map(|tb| tb.kind.as_str())
    }

    pub fn message(&self) -> Option<&str> {
        self.traceback.as_ref().and_then(|tb| tb.message.as_deref())
    }

    /// Frames as the device reported them, outermost first.
    pub fn frames(&self) -> &[Frame] {
        self.traceback.as_ref().map_or(&[], |tb| tb.frames.as_slice())
    }

    /// The exception kind, when it names one known locally.
    pub fn exception(&self) -> Option<ExceptionKind> {
        self.exception
    }

    /// Spliced frames if [`splice`](Self::splice) matched, otherwise the
    /// device's own frames.
    pub fn display_frames(&self) -> &[Frame] {
        self.display_frames.as_deref().unwrap_or_else(|| self.frames())
    }

    pub fn is_spliced(&self) -> bool {
        self.display_frames.is_some()
    }

    /// Point the display frames at the local definition of `function`.
    ///
    /// Frames above the one running `function` belong to the generated
    /// call harness and are dropped. Returns whether a frame matched.
    pub fn splice(&mut self, function: &RemoteFunction) -> bool {
        let local_name = Path::new(&function.file)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| function.file.clone());

        let frames = self.frames();
        let Some(start) = frames.iter().position(|frame| {
            frame.function.as_deref() == Some(function.name.as_str())
                && (frame.file == local_name || frame.file == ANONYMOUS_SOURCE)
        }) else {
            return false;
        };

        let anchor = |line: u32| function.first_line + line.saturating_sub(1);
        let spliced = frames[start..]
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                if i == 0 || frame.file == ANONYMOUS_SOURCE {
                    Frame {
                        file: function.file.clone(),
                        line: anchor(frame.line),
                        function: frame.function.clone(),
                    }
                } else {
                    frame.clone()
                }
            })
            .collect();

        self.display_frames = Some(spliced);
        true
    }

    /// Render like a host-side traceback. Falls back to the raw text when
    /// the stderr could not be parsed.
    pub fn format_traceback(&self) -> String {
        let Some(traceback) = &self.traceback else {
            return self.raw_text();
        };

        let mut out = String::from(TRACEBACK_HEADER);
        out.push('\n');
        for frame in self.display_frames() {
            out.push_str(&format!("  {}\n", frame));
        }
        out.push_str(&traceback.kind);
        if let Some(message) = &traceback.message {
            out.push_str(": ");
            out.push_str(message);
        }
        out.push('\n');
        out
    }

    /// Convert into a [`BoardError`]. With `raise_known`, a resolved
    /// exception kind becomes [`BoardError::Exception`].
    pub fn into_error(self, raise_known: bool) -> BoardError {
        match self.exception {
            Some(kind) if raise_known => BoardError::Exception {
                kind,
                message: self.message().map(str::to_string),
                remote: Box::new(self),
            },
            _ => BoardError::Remote(Box::new(self)),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.traceback {
            Some(tb) => match &tb.message {
                Some(message) => write!(f, "{}: {}", tb.kind, message),
                None => f.write_str(&tb.kind),
            },
            None => f.write_str(self.raw_text().trim_end()),
        }
    }
}

impl std::error::Error for RemoteError {}
