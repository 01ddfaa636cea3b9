use std::fmt;

/// Every byte exchanged with the device since the last REPL reset.
///
/// Attached unredacted to transport, timeout, protocol and remote errors so a
/// failed exchange can be replayed by eye.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLog {
    bytes: Vec<u8>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex rendering, for logs where control bytes matter.
    pub fn hex_dump(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Display for SessionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes.escape_ascii())
    }
}

impl From<&[u8]> for SessionLog {
    fn from(data: &[u8]) -> Self {
        Self { bytes: data.to_vec() }
    }
}
