//! Byte channel to the device.
//!
//! The interpreter prompt has no length-prefixed framing, so every read
//! boundary is a literal byte sequence. [`Transport`] offers a draining read,
//! a polling read-until-delimiter with a wall-clock deadline, and paced
//! chunked writes. Every byte in either direction is appended to the
//! [`SessionLog`].

use crate::domain::config::TransportConfig;
use crate::domain::error::{BoardError, BoardResult};
use crate::domain::session_log::SessionLog;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use tracing::debug;

/// Raw byte channel underneath a [`Transport`].
pub trait Link: Send {
    /// Number of bytes that can be read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write and flush all of `data`.
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()>;
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_bytes(buf)
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write_bytes(data)
    }
}

/// Pacing parameters for a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    pub write_chunk_size: usize,
    pub write_pacing: Duration,
    pub poll_interval: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for TransportSettings {
    fn from(config: &TransportConfig) -> Self {
        Self {
            write_chunk_size: config.write_chunk_size.max(1),
            write_pacing: config.write_pacing(),
            poll_interval: config.poll_interval(),
        }
    }
}

pub struct Transport {
    link: Box<dyn Link>,
    settings: TransportSettings,
    log: SessionLog,
}

impl Transport {
    pub fn new(link: Box<dyn Link>, settings: TransportSettings) -> Self {
        Self {
            link,
            settings,
            log: SessionLog::new(),
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn io_error(&self, operation: &'static str, source: io::Error) -> BoardError {
        BoardError::Transport {
            operation,
            session: self.log.clone(),
            source,
        }
    }

    /// Drain whatever is pending without blocking.
    pub fn read(&mut self) -> BoardResult<Vec<u8>> {
        let pending = match self.link.bytes_available() {
            Ok(n) => n,
            Err(e) => return Err(self.io_error("read", e)),
        };
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut data = vec![0u8; pending];
        let n = match self.link.read_bytes(&mut data) {
            Ok(n) => n,
            Err(e) => return Err(self.io_error("read", e)),
        };
        data.truncate(n);
        self.log.append(&data);
        debug!("Drained {} bytes", n);
        Ok(data)
    }

    /// Poll byte-by-byte until the buffer ends with `delimiter`.
    ///
    /// `timeout` of `None` waits forever. Each byte is mirrored to `sink`
    /// as soon as it arrives.
    pub fn read_until(
        &mut self,
        delimiter: &[u8],
        timeout: Option<Duration>,
        sink: Option<&mut dyn Write>,
    ) -> BoardResult<Vec<u8>> {
        let (data, _) = self.read_until_any(&[delimiter], timeout, sink)?;
        Ok(data)
    }

    /// Like [`read_until`](Self::read_until) but stops at the first of several
    /// delimiters, returning which one matched.
    pub fn read_until_any(
        &mut self,
        delimiters: &[&[u8]],
        timeout: Option<Duration>,
        mut sink: Option<&mut dyn Write>,
    ) -> BoardResult<(Vec<u8>, usize)> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut data = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            if let Some(index) = delimiters.iter().position(|d| data.ends_with(d)) {
                return Ok((data, index));
            }

            // Holds even while bytes keep arriving
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let expected = delimiters
                    .iter()
                    .map(|d| d.escape_ascii().to_string())
                    .collect::<Vec<_>>()
                    .join("' or '");
                debug!("Timed out waiting for '{}' with {} bytes buffered", expected, data.len());
                return Err(BoardError::Timeout {
                    expected: format!("'{}'", expected),
                    buffered: data.len(),
                    session: self.log.clone(),
                });
            }

            let pending = match self.link.bytes_available() {
                Ok(n) => n,
                Err(e) => return Err(self.io_error("read", e)),
            };

            if pending > 0 {
                let n = match self.link.read_bytes(&mut byte) {
                    Ok(n) => n,
                    Err(e) => return Err(self.io_error("read", e)),
                };
                if n == 1 {
                    data.push(byte[0]);
                    self.log.append(&byte);
                    if let Some(out) = sink.as_mut() {
                        out.write_all(&byte)
                            .and_then(|_| out.flush())
                            .map_err(|e| BoardError::Output(e.to_string()))?;
                    }
                }
                continue;
            }

            std::thread::sleep(self.settings.poll_interval);
        }
    }

    /// Write `data` in chunks, pausing between chunks so the device's input
    /// buffer keeps up.
    pub fn write(&mut self, data: &[u8], chunk_size: Option<usize>) -> BoardResult<()> {
        let chunk_size = chunk_size.unwrap_or(self.settings.write_chunk_size).max(1);

        for chunk in data.chunks(chunk_size) {
            self.log.append(chunk);
            if let Err(e) = self.link.write_bytes(chunk) {
                return Err(self.io_error("write", e));
            }
            if !self.settings.write_pacing.is_zero() {
                std::thread::sleep(self.settings.write_pacing);
            }
        }
        debug!("Sent {} bytes", data.len());
        Ok(())
    }
}
