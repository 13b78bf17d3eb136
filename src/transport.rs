//! The transport shim (§4.2): a single-datagram pull buffer bridging the
//! synchronous crypto engine to the async gateway transport.
//!
//! This is the literal "one datagram available exactly once, else
//! would-block" contract: `install` is called once per `Session::receive`
//! with the inbound ciphertext, and `take`/`peek_len` are the only ways the
//! engine may observe it.

/// Holds at most one pending inbound datagram.
///
/// Invariant (§3, invariant 2): at most one datagram is pending at any
/// time; it is consumed atomically by the next `take` call.
#[derive(Default)]
pub struct PullBuffer<'a> {
    pending: Option<&'a [u8]>,
}

impl<'a> PullBuffer<'a> {
    /// An empty buffer (no datagram pending).
    #[must_use]
    pub fn empty() -> Self {
        Self { pending: None }
    }

    /// Install a borrowed datagram, valid only for the lifetime of the
    /// `receive()` call that installed it.
    pub fn install(&mut self, datagram: &'a [u8]) {
        self.pending = Some(datagram);
    }

    /// `pull(buf, n)`: copy up to `n` bytes from the pending datagram into
    /// `buf`, clearing the available flag. Returns `None` ("would-block")
    /// if nothing is pending.
    pub fn pull(&mut self, buf: &mut [u8]) -> Option<usize> {
        let datagram = self.pending.take()?;
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Some(n)
    }

    /// `pull-timeout(ms)`: the current available byte count, 0 if empty.
    /// The crypto engine treats a non-zero return as "data is ready now".
    #[must_use]
    pub fn available(&self) -> usize {
        self.pending.map_or(0, <[u8]>::len)
    }

    /// True iff a datagram is currently pending.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
