//! Concrete [`CryptoEngine`] built the way the teacher builds its Noise_XX
//! handshake engine (`snow::HandshakeState`/`TransportState`), generalized
//! to additionally exchange an OpenPGP certificate and to frame
//! post-handshake records with an application-level heartbeat/alert tag.
//!
//! # Design notes (grounded deviations from a real datagram-TLS library)
//!
//! - No Rust crate in this corpus implements "datagram TLS with an OpenPGP
//!   certificate type" — that combination is specific to GnuTLS (RFC 6091
//!   cert-type negotiation). This engine instead layers an OpenPGP
//!   certificate exchange as an authenticated Noise handshake payload: the
//!   certificate bytes are carried (and therefore integrity/confidentiality
//!   protected) inside the encrypted handshake message, but — unlike real
//!   TLS — the certificate's own key does not sign the Noise transcript.
//!   The Noise static key used for the DH exchange is a fresh,
//!   session-local X25519 key, not derived from the OpenPGP identity.
//!   Binding the two cryptographically would require the OpenPGP key's
//!   signing capability to sign the transcript hash, which is out of scope
//!   here; see `DESIGN.md`.
//! - Real DTLS heartbeat/alert messages are protocol-level; `snow` has no
//!   notion of either, so this engine frames them as a one-byte type tag
//!   ahead of the application payload inside the encrypted transport
//!   channel, exactly the way the teacher's own frame types
//!   (`wraith-core::frame::FrameType`) tag protocol data units.

use std::time::{Duration, Instant};

use snow::{Builder, HandshakeState, TransportState};
use zeroize::Zeroize;

use crate::crypto::engine::{CryptoEngine, HandshakeStep, RecordStep, Role};
use crate::error::{Result, SessionError};
use crate::transport::PullBuffer;

const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";
const MAX_MESSAGE_LEN: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HsPhase {
    /// Client: about to send msg1. Server: about to receive msg1.
    Start,
    /// Client: sent msg1, awaiting msg2. Server: received msg1, about to send msg2.
    AfterMsg1,
    /// Client: received msg2, about to send msg3. Server: sent msg2, awaiting msg3.
    AfterMsg2,
    Done,
}

/// Application-level frame tag for post-handshake records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FrameTag {
    Data = 0,
    HeartbeatPing = 1,
    HeartbeatPong = 2,
    AlertClose = 3,
    AlertWarning = 4,
}

impl FrameTag {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Data),
            1 => Some(Self::HeartbeatPing),
            2 => Some(Self::HeartbeatPong),
            3 => Some(Self::AlertClose),
            4 => Some(Self::AlertWarning),
            _ => None,
        }
    }
}

/// A Noise_XX-based stand-in for a datagram-TLS crypto session, carrying an
/// OpenPGP certificate exchange in its handshake payloads.
pub struct NoiseDtlsEngine {
    role: Role,
    phase: HsPhase,
    handshake: Option<HandshakeState>,
    transport: Option<TransportState>,

    local_cert: Vec<u8>,
    peer_cert: Option<Vec<u8>>,

    /// Last flight we sent but haven't seen a reply to; retransmitted
    /// verbatim if the handshake is stepped again with nothing new to read.
    pending_flight: Option<Vec<u8>>,

    started_at: Instant,
    total_timeout: Duration,
    retransmit: Duration,
    data_mtu: usize,
}

impl NoiseDtlsEngine {
    /// Build a new engine. `local_cert` is the raw OpenPGP certificate
    /// presented to the peer. `retransmit`/`total_timeout` correspond to
    /// `SessionTimeouts::retransmit`/`handshake_deadline` (§6: 500 ms / 10 s).
    pub fn new(
        role: Role,
        local_cert: Vec<u8>,
        retransmit: Duration,
        total_timeout: Duration,
    ) -> Result<Self> {
        let params = NOISE_PATTERN
            .parse()
            .map_err(|e| SessionError::handshake_owned(format!("bad noise pattern: {e:?}")))?;
        let mut keypair = Builder::new(params).generate_keypair()?;

        let params = NOISE_PATTERN
            .parse()
            .map_err(|e| SessionError::handshake_owned(format!("bad noise pattern: {e:?}")))?;
        let builder = Builder::new(params).local_private_key(&keypair.private);

        // `Builder::local_private_key` copies the bytes into its own
        // internal state; the local copy in `keypair` is no longer needed
        // and is wiped rather than left for the allocator to hand back
        // unzeroed.
        keypair.private.zeroize();

        let handshake = match role {
            Role::Client => builder.build_initiator()?,
            Role::Server => builder.build_responder()?,
        };

        Ok(Self {
            role,
            phase: HsPhase::Start,
            handshake: Some(handshake),
            transport: None,
            local_cert,
            peer_cert: None,
            pending_flight: None,
            started_at: Instant::now(),
            total_timeout,
            retransmit,
            data_mtu: 512,
        })
    }

    fn elapsed_timed_out(&self) -> bool {
        self.started_at.elapsed() > self.total_timeout
    }

    fn hs_mut(&mut self) -> Result<&mut HandshakeState> {
        self.handshake
            .as_mut()
            .ok_or_else(|| SessionError::handshake("handshake already completed"))
    }

    fn frame_and_encrypt(&mut self, tag: FrameTag, payload: &[u8]) -> Result<Vec<u8>> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| SessionError::handshake("transport not established"))?;
        let mut plain = Vec::with_capacity(payload.len() + 1);
        plain.push(tag as u8);
        plain.extend_from_slice(payload);
        let mut out = vec![0u8; plain.len() + 16];
        let n = transport.write_message(&plain, &mut out)?;
        out.truncate(n);
        Ok(out)
    }
}

impl CryptoEngine for NoiseDtlsEngine {
    fn role(&self) -> Role {
        self.role
    }

    fn is_handshake_complete(&self) -> bool {
        self.phase == HsPhase::Done
    }

    fn peer_certificate(&self) -> Option<&[u8]> {
        self.peer_cert.as_deref()
    }

    fn handshake_step(&mut self, pull: &mut PullBuffer) -> Result<HandshakeStep> {
        if self.phase == HsPhase::Done {
            return Ok(HandshakeStep::Complete { outgoing: None });
        }
        if self.elapsed_timed_out() {
            return Ok(HandshakeStep::TimedOut);
        }

        let mut in_buf = [0u8; MAX_MESSAGE_LEN];
        let incoming_len = pull.pull(&mut in_buf);

        match (self.role, self.phase) {
            (Role::Client, HsPhase::Start) => {
                // Send msg1 (e).
                let mut out = [0u8; MAX_MESSAGE_LEN];
                let n = self.hs_mut()?.write_message(&[], &mut out)?;
                let bytes = out[..n].to_vec();
                self.pending_flight = Some(bytes.clone());
                self.phase = HsPhase::AfterMsg1;
                // A flight was just sent and awaits the peer's reply: the
                // retry timer must be armed so a silent peer (§8 boundary
                // scenario 1) is retransmitted to and, eventually, timed
                // out, rather than waiting forever for an inbound datagram
                // that never arrives.
                Ok(HandshakeStep::WouldBlock {
                    outgoing: Some(bytes),
                    waiting_to_write: true,
                })
            }
            (Role::Client, HsPhase::AfterMsg1) => match incoming_len {
                None => {
                    // Nothing new; retransmit what we already sent.
                    Ok(HandshakeStep::WouldBlock {
                        outgoing: self.pending_flight.clone(),
                        waiting_to_write: true,
                    })
                }
                Some(n) => {
                    // Receive msg2 (e, ee, s, es) + server cert payload.
                    let mut payload = [0u8; MAX_MESSAGE_LEN];
                    let plen = self.hs_mut()?.read_message(&in_buf[..n], &mut payload)?;
                    self.peer_cert = Some(payload[..plen].to_vec());

                    // Send msg3 (s, se) + our cert payload.
                    let mut out = [0u8; MAX_MESSAGE_LEN];
                    let outn = self.hs_mut()?.write_message(&self.local_cert.clone(), &mut out)?;
                    let bytes = out[..outn].to_vec();
                    self.pending_flight = Some(bytes.clone());
                    self.phase = HsPhase::Done;

                    let hs = self.handshake.take().expect("handshake present");
                    self.transport = Some(hs.into_transport_mode()?);

                    Ok(HandshakeStep::Complete {
                        outgoing: Some(bytes),
                    })
                }
            },
            (Role::Server, HsPhase::Start) => match incoming_len {
                None => Ok(HandshakeStep::WouldBlock {
                    outgoing: None,
                    waiting_to_write: false,
                }),
                Some(n) => {
                    // Receive msg1 (e).
                    let mut scratch = [0u8; MAX_MESSAGE_LEN];
                    self.hs_mut()?.read_message(&in_buf[..n], &mut scratch)?;

                    // Send msg2 (e, ee, s, es) + our cert payload.
                    let mut out = [0u8; MAX_MESSAGE_LEN];
                    let outn = self.hs_mut()?.write_message(&self.local_cert.clone(), &mut out)?;
                    let bytes = out[..outn].to_vec();
                    self.pending_flight = Some(bytes.clone());
                    self.phase = HsPhase::AfterMsg1;
                    // Same reasoning as the client's first flight above:
                    // msg2 is now outstanding and must be retransmitted (or
                    // time out) if the client goes silent.
                    Ok(HandshakeStep::WouldBlock {
                        outgoing: Some(bytes),
                        waiting_to_write: true,
                    })
                }
            },
            (Role::Server, HsPhase::AfterMsg1) => match incoming_len {
                None => Ok(HandshakeStep::WouldBlock {
                    outgoing: self.pending_flight.clone(),
                    waiting_to_write: true,
                }),
                Some(n) => {
                    // Receive msg3 (s, se) + client cert payload.
                    let mut payload = [0u8; MAX_MESSAGE_LEN];
                    let plen = self.hs_mut()?.read_message(&in_buf[..n], &mut payload)?;
                    self.peer_cert = Some(payload[..plen].to_vec());
                    self.phase = HsPhase::Done;

                    let hs = self.handshake.take().expect("handshake present");
                    self.transport = Some(hs.into_transport_mode()?);

                    Ok(HandshakeStep::Complete { outgoing: None })
                }
            },
            (_, HsPhase::AfterMsg2 | HsPhase::Done) => {
                // AfterMsg2 is unreachable in this 3-message pattern given
                // the transitions above; Done is handled at the top.
                Ok(HandshakeStep::Complete { outgoing: None })
            }
        }
    }

    fn set_data_mtu(&mut self, mtu: usize) {
        self.data_mtu = mtu;
    }

    fn record_send(&mut self, plaintext: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        if plaintext.is_empty() {
            out.push(self.frame_and_encrypt(FrameTag::Data, plaintext)?);
            return Ok(out);
        }
        for chunk in plaintext.chunks(self.data_mtu) {
            out.push(self.frame_and_encrypt(FrameTag::Data, chunk)?);
        }
        Ok(out)
    }

    fn record_recv(&mut self, pull: &mut PullBuffer, dst: &mut [u8]) -> Result<RecordStep> {
        let mut in_buf = [0u8; MAX_MESSAGE_LEN];
        let Some(n) = pull.pull(&mut in_buf) else {
            return Ok(RecordStep::WouldBlock);
        };

        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| SessionError::handshake("record_recv before handshake completion"))?;

        let mut plain = [0u8; MAX_MESSAGE_LEN];
        let plen = transport.read_message(&in_buf[..n], &mut plain)?;
        if plen == 0 {
            return Ok(RecordStep::Eof);
        }

        let Some(tag) = FrameTag::from_byte(plain[0]) else {
            return Ok(RecordStep::Eof);
        };
        let payload = &plain[1..plen];

        match tag {
            FrameTag::Data => {
                let n = payload.len().min(dst.len());
                dst[..n].copy_from_slice(&payload[..n]);
                Ok(RecordStep::Data(n))
            }
            FrameTag::HeartbeatPing => Ok(RecordStep::HeartbeatPingReceived),
            FrameTag::HeartbeatPong => Ok(RecordStep::HeartbeatPongReceived),
            FrameTag::AlertClose => Ok(RecordStep::Alert { fatal: true }),
            FrameTag::AlertWarning => Ok(RecordStep::Alert { fatal: false }),
        }
    }

    fn heartbeat_ping(&mut self, payload_len: usize) -> Result<Vec<u8>> {
        self.frame_and_encrypt(FrameTag::HeartbeatPing, &vec![0u8; payload_len])
    }

    fn heartbeat_pong(&mut self) -> Result<Vec<u8>> {
        self.frame_and_encrypt(FrameTag::HeartbeatPong, &[])
    }

    fn shutdown_alert(&mut self) -> Vec<u8> {
        self.frame_and_encrypt(FrameTag::AlertClose, &[])
            .unwrap_or_default()
    }

    fn retransmit_delay(&self) -> Duration {
        self.retransmit
    }

    fn waiting_to_write(&self) -> bool {
        !self.is_handshake_complete() && self.pending_flight.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeouts() -> (Duration, Duration) {
        (Duration::from_millis(500), Duration::from_secs(10))
    }

    #[test]
    fn full_handshake_exchanges_certificates() {
        let (retransmit, total) = timeouts();
        let mut client =
            NoiseDtlsEngine::new(Role::Client, b"client-cert".to_vec(), retransmit, total)
                .unwrap();
        let mut server =
            NoiseDtlsEngine::new(Role::Server, b"server-cert".to_vec(), retransmit, total)
                .unwrap();

        let mut empty = PullBuffer::empty();

        // msg1: client -> server
        let step1 = client.handshake_step(&mut empty).unwrap();
        let msg1 = match step1 {
            HandshakeStep::WouldBlock { outgoing: Some(b), .. } => b,
            _ => panic!("expected msg1"),
        };

        let mut pull = PullBuffer::empty();
        pull.install(&msg1);
        let step2 = server.handshake_step(&mut pull).unwrap();
        let msg2 = match step2 {
            HandshakeStep::WouldBlock { outgoing: Some(b), .. } => b,
            _ => panic!("expected msg2"),
        };

        let mut pull = PullBuffer::empty();
        pull.install(&msg2);
        let step3 = client.handshake_step(&mut pull).unwrap();
        let msg3 = match step3 {
            HandshakeStep::Complete { outgoing: Some(b) } => b,
            _ => panic!("expected msg3 + complete"),
        };
        assert!(client.is_handshake_complete());
        assert_eq!(client.peer_certificate(), Some(b"server-cert".as_slice()));

        let mut pull = PullBuffer::empty();
        pull.install(&msg3);
        let step4 = server.handshake_step(&mut pull).unwrap();
        assert!(matches!(step4, HandshakeStep::Complete { outgoing: None }));
        assert!(server.is_handshake_complete());
        assert_eq!(server.peer_certificate(), Some(b"client-cert".as_slice()));
    }

    #[test]
    fn record_round_trip() {
        let (retransmit, total) = timeouts();
        let mut client =
            NoiseDtlsEngine::new(Role::Client, b"c".to_vec(), retransmit, total).unwrap();
        let mut server =
            NoiseDtlsEngine::new(Role::Server, b"s".to_vec(), retransmit, total).unwrap();

        drive_handshake(&mut client, &mut server);

        client.set_data_mtu(1280);
        server.set_data_mtu(1280);

        let datagrams = client.record_send(b"hello overlay").unwrap();
        assert_eq!(datagrams.len(), 1);

        let mut pull = PullBuffer::empty();
        pull.install(&datagrams[0]);
        let mut dst = [0u8; 64];
        match server.record_recv(&mut pull, &mut dst).unwrap() {
            RecordStep::Data(n) => assert_eq!(&dst[..n], b"hello overlay"),
            _ => panic!("expected data"),
        }
    }

    #[test]
    fn heartbeat_ping_pong_round_trip() {
        let (retransmit, total) = timeouts();
        let mut client =
            NoiseDtlsEngine::new(Role::Client, b"c".to_vec(), retransmit, total).unwrap();
        let mut server =
            NoiseDtlsEngine::new(Role::Server, b"s".to_vec(), retransmit, total).unwrap();
        drive_handshake(&mut client, &mut server);

        let ping = server.heartbeat_ping(256).unwrap();
        let mut pull = PullBuffer::empty();
        pull.install(&ping);
        let mut dst = [0u8; 16];
        assert!(matches!(
            client.record_recv(&mut pull, &mut dst).unwrap(),
            RecordStep::HeartbeatPingReceived
        ));

        let pong = client.heartbeat_pong().unwrap();
        let mut pull = PullBuffer::empty();
        pull.install(&pong);
        assert!(matches!(
            server.record_recv(&mut pull, &mut dst).unwrap(),
            RecordStep::HeartbeatPongReceived
        ));
    }

    fn drive_handshake(client: &mut NoiseDtlsEngine, server: &mut NoiseDtlsEngine) {
        let mut empty = PullBuffer::empty();
        let msg1 = match client.handshake_step(&mut empty).unwrap() {
            HandshakeStep::WouldBlock { outgoing: Some(b), .. } => b,
            _ => panic!(),
        };
        let mut pull = PullBuffer::empty();
        pull.install(&msg1);
        let msg2 = match server.handshake_step(&mut pull).unwrap() {
            HandshakeStep::WouldBlock { outgoing: Some(b), .. } => b,
            _ => panic!(),
        };
        let mut pull = PullBuffer::empty();
        pull.install(&msg2);
        let msg3 = match client.handshake_step(&mut pull).unwrap() {
            HandshakeStep::Complete { outgoing: Some(b) } => b,
            _ => panic!(),
        };
        let mut pull = PullBuffer::empty();
        pull.install(&msg3);
        assert!(matches!(
            server.handshake_step(&mut pull).unwrap(),
            HandshakeStep::Complete { .. }
        ));
    }
}
