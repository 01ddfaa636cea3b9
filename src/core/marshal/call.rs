use crate::core::marshal::literal;
use crate::domain::function::RemoteFunction;
use crate::domain::value::Value;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

/// Marks the start of the encoded return value in the program's output.
pub const BEGIN_MARKER: &str = "BEGINMARKER>";
/// Marks the end of the encoded return value.
pub const END_MARKER: &str = "<ENDMARKER";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarshalError {
    #[error("output is missing the result markers")]
    MissingMarkers,

    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(String),

    #[error("argument {0} has no literal form")]
    Unencodable(String),
}

/// One invocation of a [`RemoteFunction`].
#[derive(Debug, Clone)]
pub struct RemoteCall {
    function: RemoteFunction,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    timeout: Option<Duration>,
    reset_first: bool,
}

impl RemoteCall {
    pub fn new(function: RemoteFunction) -> Self {
        Self {
            function,
            args: Vec::new(),
            kwargs: Vec::new(),
            timeout: None,
            reset_first: true,
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.push((name.into(), value.into()));
        self
    }

    /// Bound on the remote function's run time; the board default applies
    /// when unset.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Keep interpreter state from earlier submissions.
    pub fn keep_session(mut self) -> Self {
        self.reset_first = false;
        self
    }

    pub fn function(&self) -> &RemoteFunction {
        &self.function
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &[(String, Value)] {
        &self.kwargs
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn resets_first(&self) -> bool {
        self.reset_first
    }
}

/// Turns calls into something the device runs, and its output back into a
/// value.
pub trait CallCodec: Send {
    fn encode(&self, call: &RemoteCall) -> Result<String, MarshalError>;

    fn decode(&self, output: &[u8]) -> Result<Value, MarshalError>;
}

/// Ships the function's definition as source text, followed by an
/// invocation line and a print of the result inside the marker envelope.
#[derive(Debug, Clone, Default)]
pub struct SourceCodec {
    decorator_strip: Option<Regex>,
}

impl SourceCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blank out leading decorator lines up to and including the first one
    /// matching `pattern`. Lines are blanked, not removed, so remote line
    /// numbers still match the local definition.
    pub fn strip_decorators(mut self, pattern: Regex) -> Self {
        self.decorator_strip = Some(pattern);
        self
    }

    fn definition(&self, source: &str) -> String {
        let pattern = match &self.decorator_strip {
            Some(pattern) if source.starts_with('@') => pattern,
            _ => return source.to_string(),
        };

        let mut done = false;
        let lines: Vec<&str> = source
            .lines()
            .map(|line| {
                if done {
                    line
                } else if pattern.is_match(line) {
                    done = true;
                    ""
                } else if line.starts_with('@') {
                    ""
                } else {
                    line
                }
            })
            .collect();
        lines.join("\n")
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn encode_value(value: &Value) -> Result<String, MarshalError> {
    if value.is_encodable() {
        Ok(value.to_string())
    } else {
        Err(MarshalError::Unencodable(value.to_string()))
    }
}

impl CallCodec for SourceCodec {
    fn encode(&self, call: &RemoteCall) -> Result<String, MarshalError> {
        let function = call.function();
        if !is_identifier(&function.name) {
            return Err(MarshalError::InvalidIdentifier(function.name.clone()));
        }

        let mut arguments = Vec::with_capacity(call.args().len() + call.kwargs().len());
        for value in call.args() {
            arguments.push(encode_value(value)?);
        }
        for (name, value) in call.kwargs() {
            if !is_identifier(name) {
                return Err(MarshalError::InvalidIdentifier(name.clone()));
            }
            arguments.push(format!("{}={}", name, encode_value(value)?));
        }

        let mut source = self.definition(&function.source);
        source.push_str("\n\n");
        source.push_str(&format!("res = {}({})\n", function.name, arguments.join(", ")));
        source.push_str(&format!(
            "print('{}' + repr(res) + '{}')\n",
            BEGIN_MARKER, END_MARKER
        ));
        Ok(source)
    }

    fn decode(&self, output: &[u8]) -> Result<Value, MarshalError> {
        let text = String::from_utf8_lossy(output);
        let payload = extract_envelope(&text).ok_or(MarshalError::MissingMarkers)?;
        Ok(literal::decode(payload))
    }
}

/// The text strictly between the first begin marker and the end marker
/// that follows it.
pub fn extract_envelope(output: &str) -> Option<&str> {
    let start = output.find(BEGIN_MARKER)? + BEGIN_MARKER.len();
    let rest = &output[start..];
    let end = rest.find(END_MARKER)?;
    Some(&rest[..end])
}
