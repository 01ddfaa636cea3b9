/// Name the device gives to source pasted at the prompt.
pub const ANONYMOUS_SOURCE: &str = "<stdin>";

/// A function defined locally whose source is shipped to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFunction {
    /// Function name as defined in `source`
    pub name: String,
    /// Full definition text, starting at its first line
    pub source: String,
    /// Local file the definition lives in
    pub file: String,
    /// 1-based line of the definition's first line in `file`
    pub first_line: u32,
}

impl RemoteFunction {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            file: ANONYMOUS_SOURCE.to_string(),
            first_line: 1,
        }
    }

    /// Record where the definition lives locally, for traceback splicing.
    pub fn defined_at(mut self, file: impl Into<String>, first_line: u32) -> Self {
        self.file = file.into();
        self.first_line = first_line.max(1);
        self
    }
}
