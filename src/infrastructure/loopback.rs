// Loopback module - In-memory link for tests and dry runs
use crate::core::transport::Link;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

/// Produces the device's reply to one written chunk.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct Shared {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    write_calls: usize,
    broken: bool,
    responder: Option<Responder>,
}

/// In-memory [`Link`]: bytes pushed through the handle (or produced by the
/// responder) become readable, and everything written is captured.
pub struct LoopbackLink {
    shared: Arc<Mutex<Shared>>,
}

/// Test-side view of a [`LoopbackLink`].
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "loopback link is broken")
}

impl LoopbackLink {
    pub fn pair() -> (Self, LoopbackHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            LoopbackHandle { shared },
        )
    }

    /// Link whose replies come from `responder`, called once per write.
    pub fn with_responder<F>(responder: F) -> (Self, LoopbackHandle)
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let (link, handle) = Self::pair();
        lock(&link.shared).responder = Some(Box::new(responder));
        (link, handle)
    }
}

impl LoopbackHandle {
    /// Make bytes readable on the link.
    pub fn push(&self, data: &[u8]) {
        lock(&self.shared).inbound.extend(data);
    }

    /// Everything written to the link so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.shared).written.clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.shared).written)
    }

    pub fn write_calls(&self) -> usize {
        lock(&self.shared).write_calls
    }

    pub fn pending(&self) -> usize {
        lock(&self.shared).inbound.len()
    }

    /// While broken, every link operation fails with an I/O error.
    pub fn set_broken(&self, broken: bool) {
        lock(&self.shared).broken = broken;
    }
}

impl Link for LoopbackLink {
    fn bytes_available(&mut self) -> io::Result<usize> {
        let shared = lock(&self.shared);
        if shared.broken {
            return Err(broken_pipe());
        }
        Ok(shared.inbound.len())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut shared = lock(&self.shared);
        if shared.broken {
            return Err(broken_pipe());
        }
        let n = buf.len().min(shared.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(shared.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        let mut shared = lock(&self.shared);
        if shared.broken {
            return Err(broken_pipe());
        }
        shared.written.extend_from_slice(data);
        shared.write_calls += 1;
        if let Some(mut responder) = shared.responder.take() {
            let reply = responder(data);
            shared.inbound.extend(reply);
            shared.responder = Some(responder);
        }
        Ok(())
    }
}
