//! The Gateway contract: the external collaborator that owns credentials,
//! performs the underlying datagram send, routes plaintext upward, and
//! maintains the two routing tables sessions register themselves in.
//!
//! This module only defines the *interface* (§6) plus an in-memory test
//! double used by the crate's own test suite; a real gateway (owning the
//! UDP socket, the event loop, and the upper-layer plaintext consumer) is
//! out of scope for this crate.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::session::Session;

/// Credential bundle handed to a session at construction time: the local
/// certificate material plus the priority string controlling handshake
/// parameters. Opaque to this crate — the gateway is the sole owner of
/// what goes in here.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Raw certificate bytes presented to the peer during the handshake.
    pub certificate: Vec<u8>,
    /// Priority string understood by the crypto engine (cipher/kx preference
    /// order); opaque beyond that.
    pub priority: String,
}

/// Opaque token returned by [`Gateway::register_endpoint`] /
/// [`Gateway::register_prefix`], handed back to [`Gateway::disconnect`] on
/// teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteHandle(pub u64);

/// The overlay peer identity: a 64-bit prefix derived from the peer's
/// certificate fingerprint (§4.6 step 10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix(pub u64);

/// External collaborator interface consumed by [`crate::session::Session`].
///
/// # Re-entrancy
///
/// `send` is invoked by the crypto engine's push hook while the session's
/// serialisation lock is held (§9, "Mutex around callbacks that
/// re-enter"). Implementations of this trait **must not** call back into
/// the same session synchronously from `send` — doing so will deadlock on
/// the session's lock. Dispatch any such re-entrant work via a channel or
/// `tokio::spawn` instead.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Local certificate credentials and priority string for the handshake.
    fn credentials(&self) -> Credentials;

    /// Non-blocking datagram transmit. Returns the number of bytes the
    /// transport accepted.
    async fn send(&self, buf: &[u8], endpoint: SocketAddr) -> Result<usize>;

    /// Register a session under its current endpoint. Returns a handle used
    /// to deregister it later.
    fn register_endpoint(&self, endpoint: SocketAddr, session: Arc<Session>) -> RouteHandle;

    /// Register a verified session under its peer prefix. Returns a handle
    /// used to deregister it later.
    fn register_prefix(&self, prefix: Prefix, session: Arc<Session>) -> RouteHandle;

    /// Remove a previously registered routing entry. Idempotent.
    fn disconnect(&self, handle: RouteHandle);

    /// Deliver decrypted plaintext upward.
    fn decrypted(&self, buf: &[u8]);
}

/// In-memory [`Gateway`] used by this crate's own tests. Mirrors the
/// corpus's `DashMap`-backed `RoutingTable` (lock-free concurrent routing)
/// but tracks both the endpoint table and the prefix table the
/// specification calls for, plus a record of delivered plaintext so tests
/// can assert on it.
#[derive(Default)]
pub struct MemoryGateway {
    credentials: Credentials,
    by_endpoint: DashMap<SocketAddr, Arc<Session>>,
    by_prefix: DashMap<Prefix, Arc<Session>>,
    handle_to_endpoint: DashMap<u64, SocketAddr>,
    handle_to_prefix: DashMap<u64, Prefix>,
    sent: DashMap<u64, Vec<(SocketAddr, Vec<u8>)>>,
    delivered: DashMap<u64, Vec<Vec<u8>>>,
    next_handle: std::sync::atomic::AtomicU64,
}

impl MemoryGateway {
    /// Create a new gateway with the given local credentials.
    #[must_use]
    pub fn new(credentials: Credentials) -> Arc<Self> {
        Arc::new(Self {
            credentials,
            ..Default::default()
        })
    }

    /// Look up a registered session by endpoint.
    #[must_use]
    pub fn by_endpoint(&self, endpoint: SocketAddr) -> Option<Arc<Session>> {
        self.by_endpoint.get(&endpoint).map(|e| Arc::clone(e.value()))
    }

    /// Look up a registered session by overlay prefix.
    #[must_use]
    pub fn by_prefix(&self, prefix: Prefix) -> Option<Arc<Session>> {
        self.by_prefix.get(&prefix).map(|e| Arc::clone(e.value()))
    }

    /// Number of endpoint-table entries currently registered.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.by_endpoint.len()
    }

    /// Number of prefix-table entries currently registered.
    #[must_use]
    pub fn prefix_count(&self) -> usize {
        self.by_prefix.len()
    }

    fn alloc_handle(&self) -> u64 {
        self.next_handle
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    fn credentials(&self) -> Credentials {
        self.credentials.clone()
    }

    async fn send(&self, buf: &[u8], endpoint: SocketAddr) -> Result<usize> {
        // Never invoke anything re-entrant on a Session here: see the
        // re-entrancy note on the trait.
        self.sent
            .entry(0)
            .or_default()
            .push((endpoint, buf.to_vec()));
        Ok(buf.len())
    }

    fn register_endpoint(&self, endpoint: SocketAddr, session: Arc<Session>) -> RouteHandle {
        self.by_endpoint.insert(endpoint, session);
        let handle = self.alloc_handle();
        self.handle_to_endpoint.insert(handle, endpoint);
        RouteHandle(handle)
    }

    fn register_prefix(&self, prefix: Prefix, session: Arc<Session>) -> RouteHandle {
        self.by_prefix.insert(prefix, session);
        let handle = self.alloc_handle();
        self.handle_to_prefix.insert(handle, prefix);
        RouteHandle(handle)
    }

    fn disconnect(&self, handle: RouteHandle) {
        if let Some((_, endpoint)) = self.handle_to_endpoint.remove(&handle.0) {
            self.by_endpoint.remove(&endpoint);
        }
        if let Some((_, prefix)) = self.handle_to_prefix.remove(&handle.0) {
            self.by_prefix.remove(&prefix);
        }
    }

    fn decrypted(&self, buf: &[u8]) {
        self.delivered.entry(0).or_default().push(buf.to_vec());
    }
}

impl MemoryGateway {
    /// All plaintext buffers delivered via `decrypted()`, in order.
    #[must_use]
    pub fn delivered(&self) -> Vec<Vec<u8>> {
        self.delivered.get(&0).map(|v| v.clone()).unwrap_or_default()
    }

    /// Take and clear every `(endpoint, buf)` pair handed to `send()` since
    /// the last drain. Used by tests and the session demo to relay datagrams
    /// between two independent `MemoryGateway`s standing in for two peers.
    pub fn drain_sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.sent.get_mut(&0).map(|mut v| std::mem::take(&mut v)).unwrap_or_default()
    }
}
