//! The `Session` state machine: handshake driving (§4.3), record I/O
//! (§4.4), liveness (§4.5), and the self-owned, reference-counted lifetime
//! model replacing the source's raw `delete this` (§9).
//!
//! Grounded on the teacher's `node::connection`/`node::node` pair — an
//! `Arc`-shared, `tokio::sync::Mutex`-guarded connection object driven by
//! both inbound packets and background timer tasks — generalized from the
//! teacher's QUIC-like multi-stream session down to the specification's
//! single-stream secure-datagram session, and from the teacher's plain
//! `Arc<Session>` ownership to the fully reference-counted destruction
//! model described in the design notes: the Gateway's routing-table
//! entries hold the only strong references, and `terminate()` drops them
//! and arms an uncancellable grace timer holding the session's last
//! reference.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex as AsyncMutex;

use crate::cert::Certificate;
use crate::config::{SessionTimeouts, VerificationPolicy};
use crate::crypto::{CryptoEngine, HandshakeStep, NoiseDtlsEngine, RecordStep, Role};
use crate::error::{Result, SessionError};
use crate::gateway::{Gateway, Prefix, RouteHandle};
use crate::keyring::{Keyring, Keyserver};
use crate::timer::{spawn_irrevocable, Timer};
use crate::transport::PullBuffer;
use crate::verify::{verify_peer_certificate, VerificationOutcome};

/// Shared, read-mostly collaborators every `Session` needs but none of them
/// own individually — passed in at construction and cloned cheaply.
pub struct SessionDeps {
    /// The owning gateway: credentials, transport, and routing tables.
    pub gateway: Arc<dyn Gateway>,
    /// Local keyring used to resolve peer fingerprints during verification.
    pub keyring: Arc<dyn Keyring>,
    /// Optional keyserver fallback for an unresolved fingerprint.
    pub keyserver: Option<Arc<dyn Keyserver>>,
    /// Certificate verification policy (import/keyserver/validity gates).
    pub policy: VerificationPolicy,
    /// Handshake, heartbeat, and destruction timing constants.
    pub timeouts: SessionTimeouts,
}

/// Mutable routing/lifecycle bookkeeping, guarded by a plain `std::sync`
/// mutex since it is only ever held across non-blocking sections.
#[derive(Default)]
struct Routing {
    endpoint_handle: Option<RouteHandle>,
    prefix_handle: Option<RouteHandle>,
    candidates: Vec<SocketAddr>,
}

/// One authenticated secure-datagram connection to a peer (§2, §3).
pub struct Session {
    self_weak: Weak<Session>,
    role: Role,
    deps: SessionDeps,
    engine: AsyncMutex<Box<dyn CryptoEngine>>,
    routing: std::sync::Mutex<Routing>,
    current_endpoint: std::sync::Mutex<SocketAddr>,

    verified: AtomicBool,
    verification_attempted: AtomicBool,
    handshake_completed: AtomicBool,
    terminating: AtomicBool,
    pings_missed: AtomicU8,

    retry_timer: Timer,
    heartbeat_timer: Timer,
}

impl Session {
    /// Client constructor (§4.1, §8 boundary scenario 1): given an ordered
    /// set of candidate endpoints, dial the first and hold the rest in
    /// reserve for fan-out on handshake timeout.
    #[must_use]
    pub fn connect(deps: SessionDeps, mut candidates: Vec<SocketAddr>) -> Option<Arc<Self>> {
        if candidates.is_empty() {
            return None;
        }
        let first = candidates.remove(0);
        // Stored reversed so `fan_out`'s `Vec::pop()` yields candidates in
        // their original left-to-right order (§8 boundary scenario 1).
        candidates.reverse();
        Some(Self::spawn(Role::Client, deps, first, candidates))
    }

    /// Server constructor: a peer has already been demultiplexed to a
    /// single endpoint by the `Gateway`; no fan-out candidates exist.
    #[must_use]
    pub fn accept(deps: SessionDeps, endpoint: SocketAddr) -> Arc<Self> {
        Self::spawn(Role::Server, deps, endpoint, Vec::new())
    }

    fn spawn(
        role: Role,
        deps: SessionDeps,
        endpoint: SocketAddr,
        candidates: Vec<SocketAddr>,
    ) -> Arc<Self> {
        let credentials = deps.gateway.credentials();
        let engine = NoiseDtlsEngine::new(
            role,
            credentials.certificate,
            deps.timeouts.retransmit,
            deps.timeouts.handshake_deadline,
        )
        .expect("noise engine construction is infallible for a valid static pattern");

        let session = Arc::new_cyclic(|weak| Session {
            self_weak: weak.clone(),
            role,
            deps,
            engine: AsyncMutex::new(Box::new(engine)),
            routing: std::sync::Mutex::new(Routing {
                endpoint_handle: None,
                prefix_handle: None,
                candidates,
            }),
            current_endpoint: std::sync::Mutex::new(endpoint),
            verified: AtomicBool::new(false),
            verification_attempted: AtomicBool::new(false),
            handshake_completed: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
            pings_missed: AtomicU8::new(0),
            retry_timer: Timer::new(),
            heartbeat_timer: Timer::new(),
        });

        let handle = session.deps.gateway.register_endpoint(endpoint, Arc::clone(&session));
        session.routing.lock().unwrap().endpoint_handle = Some(handle);

        tracing::info!("session constructed: role={:?} endpoint={}", role, endpoint);

        // §4.1/§4.3: only the client constructor kicks off the handshake
        // (it must speak first); a server session enters handshake on its
        // first `receive()`, once a peer has actually dialed it.
        if role == Role::Client {
            let kickoff = Arc::clone(&session);
            tokio::spawn(async move {
                kickoff.drive_handshake().await;
            });
        }

        session
    }

    /// Whether verification has completed successfully and this session is
    /// registered under its peer's overlay prefix.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.verified.load(Ordering::SeqCst)
    }

    /// Whether the handshake has completed (independent of verification
    /// outcome — see §8's invariant `verified ⇒ handshake_completed`).
    #[must_use]
    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_completed.load(Ordering::SeqCst)
    }

    /// The endpoint this session is currently talking to.
    #[must_use]
    pub fn current_endpoint(&self) -> SocketAddr {
        *self.current_endpoint.lock().unwrap()
    }

    fn self_arc(&self) -> Option<Arc<Self>> {
        self.self_weak.upgrade()
    }

    // ---------------------------------------------------------------
    // Handshake driving (§4.3)
    // ---------------------------------------------------------------

    /// Advance the handshake by one step with no new inbound data (the
    /// retry-timer path). The receive path below drives the same state
    /// machine with an installed datagram.
    async fn drive_handshake(self: &Arc<Self>) {
        let mut empty = PullBuffer::empty();
        self.step_handshake(&mut empty).await;
    }

    async fn step_handshake(self: &Arc<Self>, pull: &mut PullBuffer<'_>) {
        if self.terminating.load(Ordering::SeqCst) {
            return;
        }

        let endpoint = self.current_endpoint();
        let mut engine = self.engine.lock().await;

        let step = match engine.handshake_step(pull) {
            Ok(step) => step,
            Err(_) => {
                drop(engine);
                self.terminate().await;
                return;
            }
        };

        // Verification runs as soon as the peer's certificate becomes
        // available, which may be before the handshake itself completes
        // (real datagram-TLS libraries verify mid-handshake too; §4.6).
        if !self.verification_attempted.load(Ordering::SeqCst) {
            if let Some(peer_cert) = engine.peer_certificate().map(<[u8]>::to_vec) {
                self.verification_attempted.store(true, Ordering::SeqCst);
                match self.run_verification(&peer_cert).await {
                    Ok(outcome) => {
                        tracing::info!(
                            "peer certificate accepted: fingerprint={} prefix={:#018x}",
                            outcome.fingerprint_hex,
                            outcome.prefix.0
                        );
                        self.register_verified(outcome).await;
                    }
                    Err(alert) => {
                        tracing::warn!("peer certificate rejected: {}", alert);
                        if let Some(tag) = alert.alert() {
                            let _ = self
                                .deps
                                .gateway
                                .send(&[tag.wire_tag()], endpoint)
                                .await;
                        }
                        drop(engine);
                        self.terminate().await;
                        return;
                    }
                }
            }
        }

        match step {
            HandshakeStep::WouldBlock {
                outgoing,
                waiting_to_write,
            } => {
                if let Some(bytes) = outgoing {
                    let _ = self.deps.gateway.send(&bytes, endpoint).await;
                }
                let delay = engine.retransmit_delay();
                drop(engine);

                // §9 open question: only re-arm the retry timer when the
                // engine reports it is waiting to write. When it is
                // waiting to read instead, the next inbound datagram
                // drives the handshake via `receive()` and no timer is
                // needed.
                if waiting_to_write {
                    let weak = self.self_weak.clone();
                    self.retry_timer.arm(delay, move || async move {
                        if let Some(session) = weak.upgrade() {
                            session.retry_handshake().await;
                        }
                    });
                }
            }
            HandshakeStep::TimedOut => {
                tracing::warn!("handshake timed out against endpoint={}", endpoint);
                drop(engine);
                self.fan_out().await;
            }
            HandshakeStep::Complete { outgoing } => {
                if let Some(bytes) = outgoing {
                    let _ = self.deps.gateway.send(&bytes, endpoint).await;
                }
                engine.set_data_mtu(self.deps.timeouts.data_mtu);
                drop(engine);
                self.retry_timer.cancel();
                self.handshake_completed.store(true, Ordering::SeqCst);
                tracing::info!("handshake completed with endpoint={}", endpoint);

                // §4.3: the server arms the 30 s heartbeat timer and waits;
                // the client instead sends its first ping immediately,
                // which re-arms the same timer for the steady-state cadence.
                match self.role {
                    Role::Server => self.arm_heartbeat(),
                    Role::Client => Arc::clone(self).heartbeat_tick().await,
                }
            }
        }
    }

    /// Retry-timer callback: arms a hard handshake deadline (per design
    /// note in §9) before stepping the handshake again. The deadline is a
    /// backstop: the engine itself tracks the same 10 s window internally
    /// and reports `TimedOut` from `handshake_step` once exceeded, but this
    /// independent timer guarantees forward progress even if the engine's
    /// own accounting were to stall.
    async fn retry_handshake(self: Arc<Self>) {
        let weak = self.self_weak.clone();
        spawn_irrevocable(self.deps.timeouts.handshake_deadline, move || async move {
            if let Some(session) = weak.upgrade() {
                if !session.handshake_completed.load(Ordering::SeqCst) {
                    session.fan_out().await;
                }
            }
        });

        let mut empty = PullBuffer::empty();
        self.step_handshake(&mut empty).await;
    }

    async fn run_verification(
        &self,
        peer_cert_raw: &[u8],
    ) -> std::result::Result<VerificationOutcome, crate::verify::CertificateError> {
        // The real datagram-TLS library advertises, as part of the
        // handshake, the fingerprint of whichever subkey the peer actually
        // used to authenticate the session; this crate's engine carries
        // only the peer's full certificate, so the peer's own first
        // authentication-capable subkey on its presented certificate stands
        // in for that advertisement (§4.6 step 8 is then a real identity
        // check: it matches that id against the *locally trusted* copy of
        // the same peer, not merely against the bytes just received).
        let advertised_subkey_hex = Certificate::from_bytes(peer_cert_raw)
            .ok()
            .and_then(|c| {
                c.subkeys()
                    .into_iter()
                    .find(|(_, _, can_authenticate)| *can_authenticate)
                    .map(|(fingerprint_hex, _, _)| fingerprint_hex)
            })
            .unwrap_or_default();

        verify_peer_certificate(
            true,
            1,
            peer_cert_raw,
            &advertised_subkey_hex,
            &self.deps.policy,
            self.deps.keyring.as_ref(),
            self.deps.keyserver.as_deref(),
        )
        .await
    }

    async fn register_verified(self: &Arc<Self>, outcome: VerificationOutcome) {
        self.verified.store(true, Ordering::SeqCst);
        let handle = self
            .deps
            .gateway
            .register_prefix(outcome.prefix, Arc::clone(self));
        self.routing.lock().unwrap().prefix_handle = Some(handle);
    }

    /// Endpoint fan-out on handshake timeout (§4.1, §8 boundary scenario
    /// 1): terminate this session and, if candidates remain, spawn a
    /// successor against the next one.
    async fn fan_out(self: &Arc<Self>) {
        let next = self.routing.lock().unwrap().candidates.pop();
        self.terminate().await;
        if let Some(endpoint) = next {
            let remaining = {
                let mut routing = self.routing.lock().unwrap();
                std::mem::take(&mut routing.candidates)
            };
            tracing::info!(
                "fanning out to next candidate endpoint={} remaining={}",
                endpoint,
                remaining.len()
            );
            let deps = SessionDeps {
                gateway: Arc::clone(&self.deps.gateway),
                keyring: Arc::clone(&self.deps.keyring),
                keyserver: self.deps.keyserver.clone(),
                policy: self.deps.policy.clone(),
                timeouts: self.deps.timeouts.clone(),
            };
            let _ = Self::spawn(Role::Client, deps, endpoint, remaining);
        } else {
            tracing::warn!("candidate endpoints exhausted, giving up");
        }
    }

    // ---------------------------------------------------------------
    // Record I/O (§4.4)
    // ---------------------------------------------------------------

    /// Encrypt and transmit application data (§6, exposed `send`).
    pub async fn send(&self, plaintext: &[u8]) -> Result<()> {
        if self.terminating.load(Ordering::SeqCst) {
            return Err(SessionError::Terminating);
        }
        if !self.handshake_completed.load(Ordering::SeqCst) {
            return Err(SessionError::InvalidState(
                "send before handshake completion".into(),
            ));
        }
        let endpoint = self.current_endpoint();
        let mut engine = self.engine.lock().await;
        let datagrams = engine.record_send(plaintext)?;
        drop(engine);
        for datagram in datagrams {
            self.deps.gateway.send(&datagram, endpoint).await?;
        }
        Ok(())
    }

    /// Feed an inbound datagram (§6, exposed `receive`). Routes to the
    /// handshake driver or the record decoder depending on phase.
    pub async fn receive(self: &Arc<Self>, ciphertext: &[u8]) -> Result<()> {
        if self.terminating.load(Ordering::SeqCst) {
            return Err(SessionError::Terminating);
        }

        if !self.handshake_completed.load(Ordering::SeqCst) {
            let mut pull = PullBuffer::empty();
            pull.install(ciphertext);
            self.step_handshake(&mut pull).await;
            return Ok(());
        }

        let mut pull = PullBuffer::empty();
        pull.install(ciphertext);
        let mut scratch = vec![0u8; self.deps.timeouts.data_mtu];
        let mut engine = self.engine.lock().await;
        let step = engine.record_recv(&mut pull, &mut scratch)?;
        match step {
            RecordStep::Data(n) => {
                drop(engine);
                self.deps.gateway.decrypted(&scratch[..n]);
            }
            RecordStep::WouldBlock => {}
            RecordStep::HeartbeatPingReceived => {
                let pong = engine.heartbeat_pong()?;
                drop(engine);
                let endpoint = self.current_endpoint();
                self.deps.gateway.send(&pong, endpoint).await?;
            }
            RecordStep::HeartbeatPongReceived => {
                drop(engine);
                self.pings_missed.store(0, Ordering::SeqCst);
            }
            RecordStep::Alert { fatal } => {
                // §9 open question: fatal/warning is preserved but not
                // distinguished on receipt, matching the source. Any
                // pending alert terminates the session.
                tracing::warn!("alert received from peer (fatal={})", fatal);
                drop(engine);
                self.terminate().await;
            }
            RecordStep::Eof => {
                tracing::info!("peer closed the session");
                drop(engine);
                self.terminate().await;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Liveness (§4.5)
    // ---------------------------------------------------------------

    fn arm_heartbeat(self: &Arc<Self>) {
        let weak = self.self_weak.clone();
        let interval = self.deps.timeouts.heartbeat_interval;
        self.heartbeat_timer.arm(interval, move || async move {
            if let Some(session) = weak.upgrade() {
                session.heartbeat_tick().await;
            }
        });
    }

    async fn heartbeat_tick(self: Arc<Self>) {
        if self.terminating.load(Ordering::SeqCst) {
            return;
        }

        let missed = self.pings_missed.fetch_add(1, Ordering::SeqCst) + 1;
        if missed > self.deps.timeouts.missed_ping_limit {
            tracing::warn!("missed {} consecutive heartbeat pongs, terminating", missed);
            self.terminate().await;
            return;
        }

        let endpoint = self.current_endpoint();
        let mut engine = self.engine.lock().await;
        if let Ok(ping) = engine.heartbeat_ping(self.deps.timeouts.heartbeat_payload_len) {
            drop(engine);
            let _ = self.deps.gateway.send(&ping, endpoint).await;
        }

        self.arm_heartbeat();
    }

    // ---------------------------------------------------------------
    // Destruction (§4.1, §9)
    // ---------------------------------------------------------------

    /// Begin termination. Idempotent and takes precedence over all other
    /// work (§5). Sends a best-effort shutdown alert, deregisters both
    /// routing handles immediately, and arms an uncancellable grace timer
    /// that holds the session's last strong reference until it fires.
    pub async fn terminate(self: &Arc<Self>) {
        if self.terminating.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!(
            "terminating session: endpoint={} verified={}",
            self.current_endpoint(),
            self.is_verified()
        );

        self.retry_timer.cancel();
        self.heartbeat_timer.cancel();

        if self.handshake_completed.load(Ordering::SeqCst) {
            let endpoint = self.current_endpoint();
            let alert = {
                let mut engine = self.engine.lock().await;
                engine.shutdown_alert()
            };
            let _ = self.deps.gateway.send(&alert, endpoint).await;
        }

        let (endpoint_handle, prefix_handle) = {
            let mut routing = self.routing.lock().unwrap();
            (routing.endpoint_handle.take(), routing.prefix_handle.take())
        };
        if let Some(handle) = endpoint_handle {
            self.deps.gateway.disconnect(handle);
        }
        if let Some(handle) = prefix_handle {
            self.deps.gateway.disconnect(handle);
        }

        // The Gateway's routing tables held the only strong references;
        // they are now gone. Keep the session alive for the grace period
        // via a reference the timer itself owns, then let it drop.
        if let Some(last_ref) = self.self_arc() {
            spawn_irrevocable(self.deps.timeouts.destroy_grace, move || async move {
                drop(last_ref);
            });
        }
    }
}
